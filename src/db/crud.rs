use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::codec::header::RecordHeader;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, Id, Value, MAIN_SHARD};
use crate::idx;
use crate::kind::kind::IndexDef;
use crate::kind::{KindId, Permission};
use crate::kvs::cookie;
use crate::txn::Transaction;

use super::{decode_record, encode_record, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutResult {
    pub id: Id,
    pub rev: i64,
}

/// One operation inside an atomic `batch` request.
pub enum BatchOp {
    Put { kind: String, id: Option<Id>, shard_id: u32, expected_rev: Option<i64>, props: HashMap<String, Value> },
    Get { id: Id },
    Del { id: Id, expected_rev: Option<i64> },
    Merge { id: Id, expected_rev: Option<i64>, props: HashMap<String, Value> },
}

pub enum BatchOpResult {
    Put(PutResult),
    Get(Option<Document>),
    Del(i64),
    Merge(PutResult),
}

/// The post-commit bookkeeping one write produces: quota usage to credit
/// against the kind, and the before/after document images every index
/// needs re-diffed against to decide which watchers to fire. Kept as
/// plain data (not a closure) so it survives past the transaction's own
/// lifetime without needing a `'static` capture of `&Database`.
struct WriteOutcome {
    kind_id: KindId,
    id: Id,
    old: Option<Document>,
    new: Option<Document>,
    usage_delta: i64,
}

impl Database {
    /// A write targets a specific shard explicitly (unlike a query, which
    /// scans whichever shards it's allowed to); that shard must be both
    /// mounted and active. Mounted-but-inactive is a distinct failure
    /// from not-mounted-at-all, since a shard can be marked inactive
    /// in place without ever being unmounted.
    fn require_writable_shard(&self, shard_id: u32) -> Result<()> {
        if !self.shards.is_mounted(shard_id) {
            return Err(Error::new(ErrorKind::InvalidShardId, format!("shard not mounted: {shard_id}")));
        }
        if !self.shards.is_active(shard_id) {
            return Err(Error::new(ErrorKind::ShardInactive, format!("shard is inactive: {shard_id}")));
        }
        Ok(())
    }

    /// Rejects a write whose accumulated per-kind usage deltas would push
    /// any kind over its quota. A kind with a negative quota is
    /// unmetered (`putQuotas` sets this for kinds exempted from billing).
    pub(crate) fn check_quota(&self, deltas: &HashMap<KindId, i64>) -> Result<()> {
        for (&kind_id, &delta) in deltas {
            if delta <= 0 {
                continue;
            }
            if let Some(entry) = self.kinds.entry_for_kind_id(kind_id) {
                let quota = entry.quota.load(Ordering::SeqCst);
                if quota < 0 {
                    continue;
                }
                let usage = entry.usage.load(Ordering::SeqCst);
                if usage + delta > quota {
                    return Err(Error::new(
                        ErrorKind::QuotaExceeded,
                        format!("kind {kind_id} would exceed its quota ({usage} + {delta} > {quota})"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Fires every watcher whose armed range covers a key that changed
    /// membership between `old` and `new` on this index: entries that
    /// appeared, and entries that disappeared, both mean "this watcher's
    /// result set may have changed".
    fn notify_index_changes(&self, kind_id: KindId, index: &IndexDef, id: Id, old: Option<&Document>, new: Option<&Document>) {
        let keys_for = |doc: Option<&Document>| -> HashSet<Vec<u8>> {
            match doc {
                Some(d) if !d.del || index.inc_del => idx::extract_keys(index, d).into_iter().collect(),
                _ => HashSet::new(),
            }
        };
        let old_keys = keys_for(old);
        let new_keys = keys_for(new);
        let namespace = idx::index_namespace(kind_id, &index.name);
        for composite in old_keys.symmetric_difference(&new_keys) {
            let mut key = namespace.clone();
            key.extend_from_slice(composite);
            key.extend_from_slice(&id.to_be_bytes());
            self.watches.notify_write(kind_id, &index.name, &key);
        }
    }

    fn apply_effects(&self, effects: &[WriteOutcome]) {
        let mut touched = HashSet::new();
        for effect in effects {
            if let Some(entry) = self.kinds.entry_for_kind_id(effect.kind_id) {
                entry.usage.fetch_add(effect.usage_delta, Ordering::SeqCst);
                let schema = entry.schema.read();
                for index in &schema.indexes {
                    self.notify_index_changes(effect.kind_id, index, effect.id, effect.old.as_ref(), effect.new.as_ref());
                }
            }
            touched.insert(effect.kind_id);
        }
        for kind_id in touched {
            self.search_cache.invalidate_kind(kind_id);
        }
        if !effects.is_empty() {
            self.note_commit();
        }
    }

    fn put_in(
        &self,
        txn: &Transaction,
        caller: &str,
        kind: &str,
        id: Option<Id>,
        shard_id: u32,
        expected_rev: Option<i64>,
        props: HashMap<String, Value>,
    ) -> Result<(PutResult, WriteOutcome)> {
        let entry = self.kinds.require(kind)?;
        self.require_writable_shard(shard_id)?;
        let id = match id {
            Some(id) => {
                if id.shard_id() != shard_id {
                    return Err(Error::new(ErrorKind::InvalidArgument, "id's embedded shard does not match shard_id"));
                }
                id
            }
            None => Id::new(shard_id, txn.next_sequence_value(shard_id, "id")? as u128),
        };

        let key = id.to_be_bytes();
        let existing = txn.get(shard_id, cookie::OBJECTS, &key)?;
        let (old_doc, old_len, rev) = match &existing {
            Some(bytes) => {
                let (header, old_props) = {
                    let tokens = entry.tokens.lock();
                    decode_record(bytes, &tokens)?
                };
                if let Some(expected) = expected_rev {
                    if header.rev != expected {
                        return Err(Error::new(ErrorKind::RevisionConflict, format!("expected rev {expected}, found {}", header.rev)));
                    }
                }
                let doc = Document { id, kind: kind.to_string(), rev: header.rev, del: header.del, props: old_props };
                let diff_doc = if header.del { None } else { Some(doc) };
                (diff_doc, bytes.len() as i64, header.rev + 1)
            }
            None => {
                if expected_rev.is_some() {
                    return Err(Error::new(ErrorKind::RevisionConflict, "object does not exist"));
                }
                (None, 0, 1)
            }
        };

        let perm = if old_doc.is_some() { Permission::Update } else { Permission::Create };
        if !entry.schema.read().permissions.is_allowed(caller, perm) {
            return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not write {kind}")));
        }

        for name in props.keys() {
            entry.tokens.lock().add_token(name)?;
        }
        let bytes = {
            let tokens = entry.tokens.lock();
            encode_record(entry.kind_id, rev, false, &props, &tokens)?
        };
        let new_len = bytes.len() as i64;

        if shard_id == MAIN_SHARD {
            txn.record_usage(entry.kind_id, new_len - old_len);
        }
        txn.put(shard_id, cookie::OBJECTS, &key, bytes);

        let new_doc = Document { id, kind: kind.to_string(), rev, del: false, props };
        {
            let schema = entry.schema.read();
            txn.apply_index_diffs(shard_id, entry.kind_id, &schema.indexes, id, old_doc.as_ref(), Some(&new_doc))?;
        }

        let outcome = WriteOutcome { kind_id: entry.kind_id, id, old: old_doc, new: Some(new_doc), usage_delta: new_len - old_len };
        Ok((PutResult { id, rev }, outcome))
    }

    fn get_in(&self, txn: &Transaction, caller: &str, id: Id) -> Result<Option<Document>> {
        let shard_id = id.shard_id();
        if !self.shards.is_mounted(shard_id) {
            return Err(Error::new(ErrorKind::InvalidShardId, format!("shard not mounted: {shard_id}")));
        }
        let bytes = match txn.get(shard_id, cookie::OBJECTS, &id.to_be_bytes())? {
            Some(b) => b,
            None => return Ok(None),
        };
        let (header, _) = RecordHeader::decode(&bytes)?;
        let entry = self
            .kinds
            .entry_for_kind_id(header.kind_id)
            .ok_or_else(|| Error::new(ErrorKind::KindNotRegistered, "object's kind is no longer registered"))?;
        if !entry.schema.read().permissions.is_allowed(caller, Permission::Read) {
            return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not read this object")));
        }
        if header.del {
            return Ok(None);
        }
        let (_, props) = {
            let tokens = entry.tokens.lock();
            decode_record(&bytes, &tokens)?
        };
        let kind = entry.schema.read().id.clone();
        Ok(Some(Document { id, kind, rev: header.rev, del: false, props }))
    }

    fn del_in(&self, txn: &Transaction, caller: &str, id: Id, expected_rev: Option<i64>) -> Result<(i64, WriteOutcome)> {
        let shard_id = id.shard_id();
        self.require_writable_shard(shard_id)?;
        let key = id.to_be_bytes();
        let bytes = txn
            .get(shard_id, cookie::OBJECTS, &key)?
            .ok_or_else(|| Error::new(ErrorKind::ObjectNotFound, format!("no such object: {id}")))?;
        let (header, _) = RecordHeader::decode(&bytes)?;
        if header.del {
            return Err(Error::new(ErrorKind::ObjectNotFound, format!("no such object: {id}")));
        }
        if let Some(expected) = expected_rev {
            if header.rev != expected {
                return Err(Error::new(ErrorKind::RevisionConflict, format!("expected rev {expected}, found {}", header.rev)));
            }
        }
        let entry = self
            .kinds
            .entry_for_kind_id(header.kind_id)
            .ok_or_else(|| Error::new(ErrorKind::KindNotRegistered, "object's kind is no longer registered"))?;
        if !entry.schema.read().permissions.is_allowed(caller, Permission::Delete) {
            return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not delete this object")));
        }

        let kind = entry.schema.read().id.clone();
        let (_, old_props) = {
            let tokens = entry.tokens.lock();
            decode_record(&bytes, &tokens)?
        };
        let old_doc = Document { id, kind: kind.clone(), rev: header.rev, del: false, props: old_props };

        let rev = header.rev + 1;
        let new_bytes = {
            let tokens = entry.tokens.lock();
            encode_record(entry.kind_id, rev, true, &HashMap::new(), &tokens)?
        };
        let delta = new_bytes.len() as i64 - bytes.len() as i64;
        if shard_id == MAIN_SHARD {
            txn.record_usage(entry.kind_id, delta);
        }
        txn.put(shard_id, cookie::OBJECTS, &key, new_bytes);

        let new_doc = Document { id, kind, rev, del: true, props: HashMap::new() };
        {
            let schema = entry.schema.read();
            txn.apply_index_diffs(shard_id, entry.kind_id, &schema.indexes, id, Some(&old_doc), Some(&new_doc))?;
        }

        let outcome = WriteOutcome { kind_id: entry.kind_id, id, old: Some(old_doc), new: Some(new_doc), usage_delta: delta };
        Ok((rev, outcome))
    }

    fn merge_in(
        &self,
        txn: &Transaction,
        caller: &str,
        id: Id,
        expected_rev: Option<i64>,
        patch: HashMap<String, Value>,
    ) -> Result<(PutResult, WriteOutcome)> {
        let shard_id = id.shard_id();
        self.require_writable_shard(shard_id)?;
        let key = id.to_be_bytes();
        let bytes = txn
            .get(shard_id, cookie::OBJECTS, &key)?
            .ok_or_else(|| Error::new(ErrorKind::ObjectNotFound, format!("no such object: {id}")))?;
        let (header, _) = RecordHeader::decode(&bytes)?;
        if header.del {
            return Err(Error::new(ErrorKind::ObjectNotFound, format!("no such object: {id}")));
        }
        if let Some(expected) = expected_rev {
            if header.rev != expected {
                return Err(Error::new(ErrorKind::RevisionConflict, format!("expected rev {expected}, found {}", header.rev)));
            }
        }
        let entry = self
            .kinds
            .entry_for_kind_id(header.kind_id)
            .ok_or_else(|| Error::new(ErrorKind::KindNotRegistered, "object's kind is no longer registered"))?;
        if !entry.schema.read().permissions.is_allowed(caller, Permission::Update) {
            return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not update this object")));
        }

        let kind = entry.schema.read().id.clone();
        let (_, mut props) = {
            let tokens = entry.tokens.lock();
            decode_record(&bytes, &tokens)?
        };
        let old_doc = Document { id, kind: kind.clone(), rev: header.rev, del: false, props: props.clone() };
        for (k, v) in patch {
            props.insert(k, v);
        }
        for name in props.keys() {
            entry.tokens.lock().add_token(name)?;
        }

        let rev = header.rev + 1;
        let new_bytes = {
            let tokens = entry.tokens.lock();
            encode_record(entry.kind_id, rev, false, &props, &tokens)?
        };
        let delta = new_bytes.len() as i64 - bytes.len() as i64;
        if shard_id == MAIN_SHARD {
            txn.record_usage(entry.kind_id, delta);
        }
        txn.put(shard_id, cookie::OBJECTS, &key, new_bytes);

        let new_doc = Document { id, kind, rev, del: false, props };
        {
            let schema = entry.schema.read();
            txn.apply_index_diffs(shard_id, entry.kind_id, &schema.indexes, id, Some(&old_doc), Some(&new_doc))?;
        }

        let outcome = WriteOutcome { kind_id: entry.kind_id, id, old: Some(old_doc), new: Some(new_doc), usage_delta: delta };
        Ok((PutResult { id, rev }, outcome))
    }

    pub fn put(
        &self,
        caller: &str,
        kind: &str,
        id: Option<Id>,
        shard_id: u32,
        expected_rev: Option<i64>,
        props: HashMap<String, Value>,
    ) -> Result<PutResult> {
        let started = Instant::now();
        let txn = self.begin_txn();
        let (result, effect) = self.put_in(&txn, caller, kind, id, shard_id, expected_rev, props)?;
        txn.commit_with_quota_check(|deltas| self.check_quota(deltas))?;
        self.apply_effects(&[effect]);
        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.profiler.record(caller, "crud", "put", started.elapsed());
        Ok(result)
    }

    pub fn get(&self, caller: &str, id: Id) -> Result<Option<Document>> {
        let started = Instant::now();
        let txn = self.begin_txn();
        let result = self.get_in(&txn, caller, id)?;
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.profiler.record(caller, "crud", "get", started.elapsed());
        Ok(result)
    }

    pub fn del(&self, caller: &str, id: Id, expected_rev: Option<i64>) -> Result<i64> {
        let started = Instant::now();
        let txn = self.begin_txn();
        let (rev, effect) = self.del_in(&txn, caller, id, expected_rev)?;
        txn.commit_with_quota_check(|deltas| self.check_quota(deltas))?;
        self.apply_effects(&[effect]);
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.profiler.record(caller, "crud", "del", started.elapsed());
        Ok(rev)
    }

    pub fn merge(&self, caller: &str, id: Id, expected_rev: Option<i64>, props: HashMap<String, Value>) -> Result<PutResult> {
        let started = Instant::now();
        let txn = self.begin_txn();
        let (result, effect) = self.merge_in(&txn, caller, id, expected_rev, props)?;
        txn.commit_with_quota_check(|deltas| self.check_quota(deltas))?;
        self.apply_effects(&[effect]);
        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.profiler.record(caller, "crud", "merge", started.elapsed());
        Ok(result)
    }

    /// Runs every operation in `ops` against one shared transaction: any
    /// operation's error aborts the whole batch before the transaction is
    /// ever committed, so a batch is all-or-nothing.
    pub fn batch(&self, caller: &str, ops: Vec<BatchOp>) -> Result<Vec<BatchOpResult>> {
        let started = Instant::now();
        let txn = self.begin_txn();
        let mut results = Vec::with_capacity(ops.len());
        let mut effects = Vec::new();

        for op in ops {
            match op {
                BatchOp::Put { kind, id, shard_id, expected_rev, props } => {
                    let (r, e) = self.put_in(&txn, caller, &kind, id, shard_id, expected_rev, props)?;
                    effects.push(e);
                    results.push(BatchOpResult::Put(r));
                }
                BatchOp::Get { id } => {
                    let r = self.get_in(&txn, caller, id)?;
                    results.push(BatchOpResult::Get(r));
                }
                BatchOp::Del { id, expected_rev } => {
                    let (rev, e) = self.del_in(&txn, caller, id, expected_rev)?;
                    effects.push(e);
                    results.push(BatchOpResult::Del(rev));
                }
                BatchOp::Merge { id, expected_rev, props } => {
                    let (r, e) = self.merge_in(&txn, caller, id, expected_rev, props)?;
                    effects.push(e);
                    results.push(BatchOpResult::Merge(r));
                }
            }
        }

        txn.commit_with_quota_check(|deltas| self.check_quota(deltas))?;
        self.apply_effects(&effects);
        self.profiler.record(caller, "crud", "batch", started.elapsed());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::MAIN_SHARD;
    use crate::kind::Kind;
    use tempfile::tempdir;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
        (dir, Database::open(config).unwrap())
    }

    fn register(db: &Database, id: &str) {
        let mut kind = Kind::new(id, "owner");
        kind.permissions.allow("app1", Permission::Create);
        kind.permissions.allow("app1", Permission::Read);
        kind.permissions.allow("app1", Permission::Update);
        kind.permissions.allow("app1", Permission::Delete);
        db.kinds.put_kind(kind, 10_000_000).unwrap();
    }

    fn props(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (_dir, db) = open_db();
        register(&db, "Test:1");
        let p = props(&[("name", Value::String("Alice".to_string()))]);
        let result = db.put("app1", "Test:1", None, MAIN_SHARD, None, p).unwrap();
        assert_eq!(result.rev, 1);

        let doc = db.get("app1", result.id).unwrap().unwrap();
        assert_eq!(doc.get("name"), Some(&Value::String("Alice".to_string())));
    }

    #[test]
    fn put_twice_then_get_increments_revision() {
        let (_dir, db) = open_db();
        register(&db, "Test:1");
        let id = Id::new(MAIN_SHARD, 1);
        db.put("app1", "Test:1", Some(id), MAIN_SHARD, None, HashMap::new()).unwrap();
        let second = db.put("app1", "Test:1", Some(id), MAIN_SHARD, None, HashMap::new()).unwrap();
        assert_eq!(second.rev, 2);
    }

    #[test]
    fn put_with_stale_expected_rev_is_revision_conflict() {
        let (_dir, db) = open_db();
        register(&db, "Test:1");
        let id = Id::new(MAIN_SHARD, 1);
        db.put("app1", "Test:1", Some(id), MAIN_SHARD, None, HashMap::new()).unwrap();
        let err = db.put("app1", "Test:1", Some(id), MAIN_SHARD, Some(99), HashMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RevisionConflict);
    }

    #[test]
    fn get_after_del_is_none() {
        let (_dir, db) = open_db();
        register(&db, "Test:1");
        let result = db.put("app1", "Test:1", None, MAIN_SHARD, None, HashMap::new()).unwrap();
        db.del("app1", result.id, None).unwrap();
        assert!(db.get("app1", result.id).unwrap().is_none());
    }

    #[test]
    fn del_missing_object_is_object_not_found() {
        let (_dir, db) = open_db();
        register(&db, "Test:1");
        let err = db.del("app1", Id::new(MAIN_SHARD, 1), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ObjectNotFound);
    }

    #[test]
    fn merge_combines_with_existing_props() {
        let (_dir, db) = open_db();
        register(&db, "Test:1");
        let p = props(&[("a", Value::Int(1))]);
        let result = db.put("app1", "Test:1", None, MAIN_SHARD, None, p).unwrap();
        db.merge("app1", result.id, None, props(&[("b", Value::Int(2))])).unwrap();

        let doc = db.get("app1", result.id).unwrap().unwrap();
        assert_eq!(doc.get("a"), Some(&Value::Int(1)));
        assert_eq!(doc.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn caller_without_create_permission_is_denied() {
        let (_dir, db) = open_db();
        db.kinds.put_kind(Kind::new("Test:1", "owner"), 10_000_000).unwrap();
        let err = db.put("stranger", "Test:1", None, MAIN_SHARD, None, HashMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AccessDenied);
    }

    #[test]
    fn put_beyond_quota_is_rejected() {
        let (_dir, db) = open_db();
        let mut kind = Kind::new("Test:1", "owner");
        kind.permissions.allow("app1", Permission::Create);
        db.kinds.put_kind(kind, 8).unwrap();
        let p = props(&[("name", Value::String("a long string value".to_string()))]);
        let err = db.put("app1", "Test:1", None, MAIN_SHARD, None, p).unwrap_err();
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn batch_runs_every_op_in_one_transaction() {
        let (_dir, db) = open_db();
        register(&db, "Test:1");
        let id = Id::new(MAIN_SHARD, 5);
        let ops = vec![
            BatchOp::Put { kind: "Test:1".to_string(), id: Some(id), shard_id: MAIN_SHARD, expected_rev: None, props: HashMap::new() },
            BatchOp::Get { id },
        ];
        let results = db.batch("app1", ops).unwrap();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], BatchOpResult::Get(Some(_))));
    }

    #[test]
    fn batch_failure_leaves_nothing_committed() {
        let (_dir, db) = open_db();
        register(&db, "Test:1");
        let id = Id::new(MAIN_SHARD, 1);
        let ops = vec![
            BatchOp::Put { kind: "Test:1".to_string(), id: Some(id), shard_id: MAIN_SHARD, expected_rev: None, props: HashMap::new() },
            BatchOp::Del { id: Id::new(MAIN_SHARD, 999), expected_rev: None },
        ];
        assert!(db.batch("app1", ops).is_err());
        assert!(db.get("app1", id).unwrap().is_none());
    }

    #[test]
    fn put_to_an_inactive_shard_is_rejected() {
        use crate::shard::ShardInfo;

        let (_dir, db) = open_db();
        register(&db, "Test:1");
        db.mount_shard("*", ShardInfo::new(3, false, true)).unwrap();
        db.set_shard_active("*", 3, false).unwrap();

        let err = db.put("app1", "Test:1", None, 3, None, HashMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShardInactive);
    }

    #[test]
    fn quota_is_charged_only_on_the_main_shard() {
        use crate::shard::ShardInfo;

        let (_dir, db) = open_db();
        let mut kind = Kind::new("Test:1", "owner");
        kind.permissions.allow("app1", Permission::Create);
        let (entry, _) = db.kinds.put_kind(kind, 10_000_000).unwrap();
        db.mount_shard("*", ShardInfo::new(3, false, true)).unwrap();

        let p = props(&[("name", Value::String("a long string value".to_string()))]);
        db.put("app1", "Test:1", None, 3, None, p).unwrap();
        assert_eq!(entry.usage.load(Ordering::SeqCst), 0, "a removable shard's write must not touch kind usage");

        let p = props(&[("name", Value::String("another long value".to_string()))]);
        db.put("app1", "Test:1", None, MAIN_SHARD, None, p).unwrap();
        assert!(entry.usage.load(Ordering::SeqCst) > 0, "a main-shard write still updates usage");
    }
}
