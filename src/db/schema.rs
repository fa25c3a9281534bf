use std::ops::Bound;
use std::sync::atomic::Ordering;

use crate::codec::header::RecordHeader;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Id;
use crate::idx;
use crate::kind::kind::{IndexDef, IndexDelta, Permission};
use crate::kind::{Kind, KindId};
use crate::kvs::cookie;

use super::{decode_record, Database};

const ADMIN_PRINCIPAL: &str = "*";

fn require_owner_or_admin(owner: &str, caller: &str) -> Result<()> {
    if caller == owner || caller == ADMIN_PRINCIPAL {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::AccessDenied, format!("{caller} is not permitted to administer this kind")))
    }
}

/// `[lower, upper)` spanning every entry ever written under this exact
/// namespace prefix, regardless of composite key or `_id` suffix.
fn namespace_range(namespace: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let mut upper = namespace.to_vec();
    upper.push(0xFF);
    (Bound::Included(namespace.to_vec()), Bound::Excluded(upper))
}

impl Database {
    /// Registers a new kind, or updates an existing one's schema. A brand
    /// new kind may be declared by any caller (they become its owner); an
    /// existing kind's schema may only be changed by a caller holding
    /// `Permission::Extend` on it, or the owner, or the admin principal.
    /// A non-empty `IndexDelta` triggers a reindex pass over every
    /// mounted shard's live documents of that kind before returning.
    pub fn put_kind(&self, caller: &str, kind: Kind) -> Result<KindId> {
        if let Some(existing) = self.kinds.get(&kind.id) {
            let schema = existing.schema.read();
            let allowed = caller == schema.owner
                || caller == ADMIN_PRINCIPAL
                || schema.permissions.is_allowed(caller, Permission::Extend);
            if !allowed {
                return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not extend {}", kind.id)));
            }
        }

        let (entry, delta) = self.kinds.put_kind(kind, self.config.default_kind_quota)?;
        if !delta.is_empty() {
            for shard_id in self.shards.mounted_ids() {
                self.reindex_kind(shard_id, entry.kind_id, &delta)?;
            }
        }
        Ok(entry.kind_id)
    }

    /// Removes a kind's schema along with every live document, index
    /// entry, and accrued usage it has on every mounted shard.
    pub fn del_kind(&self, caller: &str, kind_id: &str) -> Result<()> {
        let entry = self.kinds.require(kind_id)?;
        require_owner_or_admin(&entry.schema.read().owner, caller)?;

        for shard_id in self.shards.mounted_ids() {
            self.purge_kind_from_shard(shard_id, entry.kind_id)?;
        }
        self.search_cache.invalidate_kind(entry.kind_id);
        self.watches.notify_kind_changed(entry.kind_id);
        self.kinds.del_kind(kind_id)?;
        Ok(())
    }

    /// Replaces the permission grants on a kind. Gated the same way
    /// schema changes are: owner, admin, or an existing `Extend` grant.
    pub fn put_permissions(&self, caller: &str, kind_id: &str, grants: Vec<(String, Permission)>) -> Result<()> {
        let entry = self.kinds.require(kind_id)?;
        {
            let schema = entry.schema.read();
            let allowed = caller == schema.owner
                || caller == ADMIN_PRINCIPAL
                || schema.permissions.is_allowed(caller, Permission::Extend);
            if !allowed {
                return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not change permissions on {kind_id}")));
            }
        }
        let mut schema = entry.schema.write();
        for (principal, perm) in grants {
            schema.permissions.allow(principal, perm);
        }
        Ok(())
    }

    /// Sets a kind's byte quota. A negative quota exempts the kind from
    /// quota enforcement entirely.
    pub fn put_quotas(&self, caller: &str, kind_id: &str, quota: i64) -> Result<()> {
        let entry = self.kinds.require(kind_id)?;
        require_owner_or_admin(&entry.schema.read().owner, caller)?;
        entry.quota.store(quota, Ordering::SeqCst);
        Ok(())
    }

    /// Rebuilds a kind's changed indexes from the documents actually
    /// stored on `shard_id`: every index named in `delta.removed` or
    /// `delta.modified` has its entire prior keyspace wiped (the old
    /// property/collation shape isn't retained, so entries can't be
    /// diffed incrementally), then every live document is re-walked to
    /// populate `added` and `modified` indexes under their new
    /// definitions.
    fn reindex_kind(&self, shard_id: u32, kind_id: KindId, delta: &IndexDelta) -> Result<()> {
        let txn = self.begin_txn();

        for index in delta.removed.iter().chain(&delta.modified) {
            let namespace = idx::index_namespace(kind_id, &index.name);
            let (lower, upper) = namespace_range(&namespace);
            for (key, _) in txn.scan_range(shard_id, cookie::INDEXES, lower, upper)? {
                txn.delete(shard_id, cookie::INDEXES, &key)?;
            }
        }

        let rebuilding: Vec<&IndexDef> = delta.added.iter().chain(&delta.modified).collect();
        if !rebuilding.is_empty() {
            let entry = self
                .kinds
                .entry_for_kind_id(kind_id)
                .ok_or_else(|| Error::new(ErrorKind::KindNotRegistered, "kind vanished mid-reindex"))?;
            let kind_str = entry.schema.read().id.clone();
            for (key, bytes) in txn.scan_cookie(shard_id, cookie::OBJECTS)? {
                let (header, _) = RecordHeader::decode(&bytes)?;
                if header.kind_id != kind_id {
                    continue;
                }
                let id = Id::from_be_bytes(key.as_slice().try_into().map_err(|_| {
                    Error::new(ErrorKind::StorageCorrupt, "object key is not a 16-byte id")
                })?);
                let props = {
                    let tokens = entry.tokens.lock();
                    decode_record(&bytes, &tokens)?.1
                };
                let doc = crate::core::types::Document { id, kind: kind_str.clone(), rev: header.rev, del: header.del, props };
                for index in &rebuilding {
                    txn.apply_index_diffs(shard_id, kind_id, [*index], id, None, Some(&doc))?;
                }
            }
        }

        txn.commit()
    }

    /// Deletes every object and index entry belonging to `kind_id` on
    /// `shard_id`. Used by `del_kind`; unlike a normal `del` this leaves
    /// no tombstone, since the kind itself is going away.
    fn purge_kind_from_shard(&self, shard_id: u32, kind_id: KindId) -> Result<()> {
        let txn = self.begin_txn();
        for (key, bytes) in txn.scan_cookie(shard_id, cookie::OBJECTS)? {
            let (header, _) = RecordHeader::decode(&bytes)?;
            if header.kind_id == kind_id {
                txn.delete(shard_id, cookie::OBJECTS, &key)?;
            }
        }
        if let Some(entry) = self.kinds.entry_for_kind_id(kind_id) {
            for index in &entry.schema.read().indexes {
                let namespace = idx::index_namespace(kind_id, &index.name);
                let (lower, upper) = namespace_range(&namespace);
                for (key, _) in txn.scan_range(shard_id, cookie::INDEXES, lower, upper)? {
                    txn.delete(shard_id, cookie::INDEXES, &key)?;
                }
            }
        }
        txn.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::{Value, MAIN_SHARD};
    use crate::kind::kind::IndexProp;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        (dir, Database::open(config).unwrap())
    }

    #[test]
    fn new_kind_may_be_declared_by_anyone() {
        let (_dir, db) = open_db();
        db.put_kind("app1", Kind::new("Test:1", "app1")).unwrap();
        assert!(db.kinds.get("Test:1").is_some());
    }

    #[test]
    fn stranger_cannot_extend_someone_elses_kind() {
        let (_dir, db) = open_db();
        db.put_kind("app1", Kind::new("Test:1", "app1")).unwrap();
        let updated = Kind::new("Test:1", "app1").with_index(IndexDef::new("byX", vec![IndexProp::new("x")]));
        let err = db.put_kind("app2", updated).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AccessDenied);
    }

    #[test]
    fn owner_may_add_an_index_and_existing_documents_are_reindexed() {
        let (_dir, db) = open_db();
        let mut kind = Kind::new("Test:1", "app1");
        kind.permissions.allow("app1", Permission::Create);
        kind.permissions.allow("app1", Permission::Read);
        db.put_kind("app1", kind).unwrap();

        let mut props = HashMap::new();
        props.insert("x".to_string(), Value::Int(5));
        let result = db.put("app1", "Test:1", None, MAIN_SHARD, None, props).unwrap();

        let updated = Kind::new("Test:1", "app1").with_index(IndexDef::new("byX", vec![IndexProp::new("x")]));
        db.put_kind("app1", updated).unwrap();

        let txn = db.begin_txn();
        let rows = txn.scan_cookie(MAIN_SHARD, cookie::INDEXES).unwrap();
        assert_eq!(rows.len(), 1);
        let _ = result;
    }

    #[test]
    fn del_kind_removes_documents_and_schema() {
        let (_dir, db) = open_db();
        let mut kind = Kind::new("Test:1", "app1");
        kind.permissions.allow("app1", Permission::Create);
        db.put_kind("app1", kind).unwrap();
        db.put("app1", "Test:1", None, MAIN_SHARD, None, HashMap::new()).unwrap();

        db.del_kind("app1", "Test:1").unwrap();
        assert!(db.kinds.get("Test:1").is_none());

        let txn = db.begin_txn();
        assert!(txn.scan_cookie(MAIN_SHARD, cookie::OBJECTS).unwrap().is_empty());
    }

    #[test]
    fn put_permissions_grants_take_effect() {
        let (_dir, db) = open_db();
        db.put_kind("app1", Kind::new("Test:1", "app1")).unwrap();
        db.put_permissions("app1", "Test:1", vec![("app2".to_string(), Permission::Create)]).unwrap();
        assert!(db.kinds.get("Test:1").unwrap().schema.read().permissions.is_allowed("app2", Permission::Create));
    }

    #[test]
    fn put_quotas_updates_the_entrys_quota() {
        let (_dir, db) = open_db();
        db.put_kind("app1", Kind::new("Test:1", "app1")).unwrap();
        db.put_quotas("app1", "Test:1", 42).unwrap();
        assert_eq!(db.kinds.get("Test:1").unwrap().quota.load(Ordering::SeqCst), 42);
    }
}
