//! Diagnostic shard viewer: enumerates a shard's cookies and, for the
//! object cookie, decodes each record's header and resolvable property
//! names. Named out of scope as a product in its own right; this is the
//! small core-facing seam a standalone CLI viewer would sit on top of.

use crate::codec::header::RecordHeader;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Id;
use crate::db::Database;
use crate::kvs::cookie;

/// One record inside the `objects` cookie, decoded as far as the live
/// kind registry allows. A kind dropped since the record was written
/// still shows its header fields, just no resolved name/properties.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub id: String,
    pub kind_id: u32,
    pub kind_name: Option<String>,
    pub rev: i64,
    pub del: bool,
    pub prop_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CookieSummary {
    pub name: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ShardSummary {
    pub shard_id: u32,
    pub cookies: Vec<CookieSummary>,
    pub objects: Vec<ObjectSummary>,
}

const COOKIES: &[(&[u8], &str)] = &[
    (cookie::OBJECTS, "objects"),
    (cookie::INDEXES, "indexes"),
    (cookie::KINDS, "kinds"),
    (cookie::INDEX_IDS, "indexIds"),
    (cookie::SEQ, "seq"),
];

impl Database {
    /// Builds a `ShardSummary` for `shard_id`: entry counts per cookie,
    /// plus a decoded listing of every object record, honoring each
    /// kind's own token map where the kind is still registered.
    pub fn describe_shard(&self, shard_id: u32) -> Result<ShardSummary> {
        let txn = self.begin_txn();
        let mut cookies = Vec::with_capacity(COOKIES.len());
        for (cookie, name) in COOKIES {
            let entries = txn.scan_cookie(shard_id, cookie)?;
            cookies.push(CookieSummary { name: name.to_string(), entry_count: entries.len() });
        }

        let mut objects = Vec::new();
        for (key, bytes) in txn.scan_cookie(shard_id, cookie::OBJECTS)? {
            let (header, _) = RecordHeader::decode(&bytes)?;
            let id = Id::from_be_bytes(key.as_slice().try_into().map_err(|_| Error::new(ErrorKind::StorageCorrupt, "object key is not a 16-byte id"))?);
            let (kind_name, prop_names) = match self.kinds.entry_for_kind_id(header.kind_id) {
                Some(entry) => {
                    let name = entry.schema.read().id.clone();
                    let props = crate::db::decode_record(&bytes, &entry.tokens.lock()).map(|(_, props)| {
                        let mut names: Vec<String> = props.into_keys().collect();
                        names.sort();
                        names
                    }).unwrap_or_default();
                    (Some(name), props)
                }
                None => (None, Vec::new()),
            };
            objects.push(ObjectSummary { id: id.to_base64(), kind_id: header.kind_id, kind_name, rev: header.rev, del: header.del, prop_names });
        }

        Ok(ShardSummary { shard_id, cookies, objects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::{Value, MAIN_SHARD};
    use crate::kind::{Kind, Permission};
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn describe_shard_lists_every_cookie_and_decodes_objects() {
        let dir = tempdir().unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        let db = Database::open(config).unwrap();

        let mut kind = Kind::new("Item:1", "alice");
        kind.permissions.allow("alice", Permission::Create);
        db.put_kind("alice", kind).unwrap();
        let mut props = HashMap::new();
        props.insert("name".to_string(), Value::String("widget".to_string()));
        db.put("alice", "Item:1", None, MAIN_SHARD, None, props).unwrap();

        let summary = db.describe_shard(MAIN_SHARD).unwrap();
        assert_eq!(summary.shard_id, MAIN_SHARD);
        assert!(summary.cookies.iter().any(|c| c.name == "objects" && c.entry_count >= 1));
        let obj = summary.objects.iter().find(|o| o.kind_name.as_deref() == Some("Item:1")).unwrap();
        assert_eq!(obj.prop_names, vec!["name".to_string()]);
    }
}
