use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::error::{Error, ErrorKind, Result};
use crate::kind::kind::{IndexDelta, Kind};
use crate::kind::token::TokenMap;
use crate::kind::KindId;

/// Everything the engine tracks about one registered kind. The schema and
/// token map are independently lockable so a read of the schema never
/// blocks on token allocation and vice versa — matching spec.md §5's
/// "kind registry: read/write lock, schema mutation exclusive" plus "token
/// map: per-kind mutex".
pub struct KindEntry {
    pub kind_id: KindId,
    pub schema: RwLock<Kind>,
    pub tokens: Mutex<TokenMap>,
    pub content_hash: std::sync::atomic::AtomicU32,
    pub quota: AtomicI64,
    pub usage: AtomicI64,
}

impl KindEntry {
    pub fn content_hash(&self) -> u32 {
        self.content_hash.load(Ordering::SeqCst)
    }
}

fn compute_content_hash(kind: &Kind) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind.id.as_bytes());
    for index in &kind.indexes {
        hasher.update(index.name.as_bytes());
        for prop in &index.props {
            hasher.update(prop.path.as_bytes());
        }
    }
    hasher.finalize()
}

/// In-memory mapping from kind-id to `KindEntry`, persisted in the `kinds`
/// cookie by the owning `Database`. Put-kind is idempotent when the
/// schema's content hash is unchanged; otherwise the caller receives an
/// `IndexDelta` describing the reindex pass it must run inside the
/// enclosing transaction.
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<KindEntry>>>,
    next_kind_id: AtomicU32,
}

impl Registry {
    pub fn new() -> Self {
        Registry { entries: RwLock::new(HashMap::new()), next_kind_id: AtomicU32::new(1) }
    }

    pub fn get(&self, id: &str) -> Option<Arc<KindEntry>> {
        self.entries.read().get(id).cloned()
    }

    pub fn require(&self, id: &str) -> Result<Arc<KindEntry>> {
        self.get(id).ok_or_else(|| Error::new(ErrorKind::KindNotRegistered, format!("kind not registered: {id}")))
    }

    /// Registers or updates `kind`. Returns the entry and the computed
    /// `IndexDelta`; an empty delta means the put was idempotent.
    pub fn put_kind(&self, kind: Kind, default_quota: u64) -> Result<(Arc<KindEntry>, IndexDelta)> {
        let new_hash = compute_content_hash(&kind);
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get(&kind.id) {
            if existing.content_hash() == new_hash {
                return Ok((existing.clone(), IndexDelta::default()));
            }
            let delta = {
                let old_schema = existing.schema.read();
                IndexDelta::compute(&old_schema.indexes, &kind.indexes)
            };
            *existing.schema.write() = kind;
            existing.content_hash.store(new_hash, Ordering::SeqCst);
            return Ok((existing.clone(), delta));
        }

        let kind_id = self.next_kind_id.fetch_add(1, Ordering::SeqCst);
        let delta = IndexDelta::compute(&[], &kind.indexes);
        let entry = Arc::new(KindEntry {
            kind_id,
            tokens: Mutex::new(TokenMap::new()),
            content_hash: std::sync::atomic::AtomicU32::new(new_hash),
            quota: AtomicI64::new(default_quota as i64),
            usage: AtomicI64::new(0),
            schema: RwLock::new(kind.clone()),
        });
        entries.insert(kind.id.clone(), entry.clone());
        Ok((entry, delta))
    }

    pub fn del_kind(&self, id: &str) -> Result<Arc<KindEntry>> {
        self.entries.write().remove(id).ok_or_else(|| Error::new(ErrorKind::KindNotRegistered, format!("kind not registered: {id}")))
    }

    pub fn kind_id_for(&self, id: &str) -> Option<KindId> {
        self.entries.read().get(id).map(|e| e.kind_id)
    }

    /// Current content hash for the kind with this numeric id, or `None`
    /// if no registered kind has it. Used by `shard::Pool::mount` to decide
    /// which kinds need a dropGarbage pass on a remounted shard.
    pub fn kind_hash_for(&self, kind_id: KindId) -> Option<u32> {
        self.entries.read().values().find(|e| e.kind_id == kind_id).map(|e| e.content_hash())
    }

    /// Snapshot of every registered kind's numeric id and current content
    /// hash, used to refresh a `ShardInfo.kind_hashes` after mounting.
    pub fn all_kind_hashes(&self) -> HashMap<KindId, u32> {
        self.entries.read().values().map(|e| (e.kind_id, e.content_hash())).collect()
    }

    /// Resolves a numeric kind id back to its entry. Used wherever only the
    /// id decoded from a `RecordHeader` is in hand and the full schema
    /// (string id, tokens, permissions) is needed, e.g. `get`/`del`.
    pub fn entry_for_kind_id(&self, kind_id: KindId) -> Option<Arc<KindEntry>> {
        self.entries.read().values().find(|e| e.kind_id == kind_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::kind::{IndexDef, IndexProp};

    #[test]
    fn put_kind_is_idempotent_for_unchanged_schema() {
        let registry = Registry::new();
        let kind = Kind::new("Test:1", "owner").with_index(IndexDef::new("byX", vec![IndexProp::new("x")]));
        let (_, delta1) = registry.put_kind(kind.clone(), 1000).unwrap();
        assert!(!delta1.is_empty());
        let (_, delta2) = registry.put_kind(kind, 1000).unwrap();
        assert!(delta2.is_empty());
    }

    #[test]
    fn put_kind_schema_change_reports_delta_and_keeps_kind_id() {
        let registry = Registry::new();
        let kind = Kind::new("Test:1", "owner").with_index(IndexDef::new("byX", vec![IndexProp::new("x")]));
        let (entry, _) = registry.put_kind(kind, 1000).unwrap();
        let kind_id = entry.kind_id;

        let updated = Kind::new("Test:1", "owner")
            .with_index(IndexDef::new("byX", vec![IndexProp::new("x")]))
            .with_index(IndexDef::new("byY", vec![IndexProp::new("y")]));
        let (entry2, delta) = registry.put_kind(updated, 1000).unwrap();
        assert_eq!(entry2.kind_id, kind_id);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].name, "byY");
    }

    #[test]
    fn del_kind_removes_entry() {
        let registry = Registry::new();
        registry.put_kind(Kind::new("Test:1", "owner"), 1000).unwrap();
        registry.del_kind("Test:1").unwrap();
        assert!(registry.get("Test:1").is_none());
    }

    #[test]
    fn entry_for_kind_id_resolves_back_to_the_registered_entry() {
        let registry = Registry::new();
        let (entry, _) = registry.put_kind(Kind::new("Test:1", "owner"), 1000).unwrap();
        let found = registry.entry_for_kind_id(entry.kind_id).unwrap();
        assert_eq!(found.schema.read().id, "Test:1");
        assert!(registry.entry_for_kind_id(9999).is_none());
    }
}
