use std::collections::HashMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::config::Config;
use crate::core::error::Result;
use crate::kvs::checkpoint::Checkpoint;
use crate::kvs::cookie::{self, cookie_bounds};
use crate::kvs::engine::{KvEngine, KvPair};
use crate::kvs::file_lock::FileLock;
use crate::kvs::iter::merge_overlay;
use crate::kvs::layout::ShardLayout;
use crate::kvs::memtable::MemEngine;
use crate::kvs::sequence::Sequence;
use crate::kvs::txn::Overlay;
use crate::kvs::wal::{Wal, WalEntry};

/// One shard's durable keyspace: an in-memory `MemEngine` kept consistent
/// with a WAL + periodic checkpoint on disk, plus the shard's named
/// sequence generators. Owned by `shard::Pool` behind an `Arc`.
pub struct Store {
    pub shard_id: u32,
    layout: ShardLayout,
    engine: MemEngine,
    wal: Mutex<Wal>,
    _lock: FileLock,
    writes_since_checkpoint: Mutex<usize>,
    checkpoint_every: usize,
    sequences: RwLock<HashMap<String, Arc<Sequence>>>,
    sequence_page_size: u64,
}

impl Store {
    pub fn open(shards_root: &Path, shard_id: u32, config: &Config) -> Result<Self> {
        let layout = ShardLayout::new(shards_root, shard_id)?;
        let lock = FileLock::acquire(&layout)?;

        let engine = MemEngine::new();
        let checkpoint = Checkpoint::load(&layout)?;
        let wal_sequence = checkpoint.as_ref().map(|c| c.wal_sequence).unwrap_or(0);
        if let Some(checkpoint) = checkpoint {
            engine.restore(checkpoint.entries)?;
        }

        for entry in Wal::replay(&layout, wal_sequence)? {
            match entry.value {
                Some(v) => engine.put(entry.key, v)?,
                None => {
                    engine.delete(&entry.key)?;
                }
            }
        }

        let wal = Wal::open(&layout, wal_sequence)?;

        Ok(Store {
            shard_id,
            layout,
            engine,
            wal: Mutex::new(wal),
            _lock: lock,
            writes_since_checkpoint: Mutex::new(0),
            checkpoint_every: config.wal_checkpoint_entries,
            sequences: RwLock::new(HashMap::new()),
            sequence_page_size: config.sequence_page_size,
        })
    }

    pub fn begin(&self) -> Overlay {
        Overlay::new()
    }

    pub fn get(&self, overlay: &Overlay, cookie: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        let full_key = cookie::prefix_key(cookie, key);
        match overlay.get(&full_key) {
            Some(Some(v)) => Ok(Some(v.clone())),
            Some(None) => Ok(None),
            None => self.engine.get(&full_key),
        }
    }

    pub fn put(&self, overlay: &mut Overlay, cookie: &[u8], key: &[u8], value: Vec<u8>) {
        overlay.put(cookie::prefix_key(cookie, key), value);
    }

    pub fn delete(&self, overlay: &mut Overlay, cookie: &[u8], key: &[u8]) {
        overlay.delete(cookie::prefix_key(cookie, key));
    }

    /// Scans one sub-database, merging committed base contents with this
    /// transaction's uncommitted overlay (overlay wins on conflicting keys).
    pub fn scan_cookie(&self, overlay: &Overlay, cookie: &[u8]) -> Result<Vec<KvPair>> {
        let (lower, upper) = cookie_bounds(cookie);
        let start = Bound::Included(lower.clone());
        let end = Bound::Excluded(upper.clone());
        let base = self.engine.range(start.clone(), end.clone())?;
        let overlay_entries = overlay.entries_in_range(&start, &end);
        let merged = merge_overlay(base, overlay_entries);
        Ok(strip_cookie(merged, cookie))
    }

    /// Scans a sub-range within one sub-database, keys given relative to
    /// the cookie (the caller's index/primary byte range, not prefixed).
    pub fn scan_range(
        &self,
        overlay: &Overlay,
        cookie: &[u8],
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
    ) -> Result<Vec<KvPair>> {
        let full_start = map_bound(&start, |k| cookie::prefix_key(cookie, k));
        let full_end = map_bound(&end, |k| cookie::prefix_key(cookie, k));
        let base = self.engine.range(full_start.clone(), full_end.clone())?;
        let overlay_entries = overlay.entries_in_range(&full_start, &full_end);
        let merged = merge_overlay(base, overlay_entries);
        Ok(strip_cookie(merged, cookie))
    }

    /// Applies every overlay write to the engine and WAL. Per spec.md
    /// §4.2, a storage I/O failure here is fatal to the enclosing
    /// transaction but not the process.
    pub fn commit(&self, overlay: Overlay) -> Result<()> {
        if overlay.is_empty() {
            return Ok(());
        }
        let entries = overlay.into_entries();
        let wal_entries: Vec<WalEntry> =
            entries.iter().map(|(k, v)| WalEntry { key: k.clone(), value: v.clone() }).collect();

        self.wal.lock().append_batch(&wal_entries)?;
        for (key, value) in entries {
            match value {
                Some(v) => self.engine.put(key, v)?,
                None => {
                    self.engine.delete(&key)?;
                }
            }
        }

        let mut count = self.writes_since_checkpoint.lock();
        *count += wal_entries.len();
        if *count >= self.checkpoint_every {
            *count = 0;
            drop(count);
            self.checkpoint()?;
        }
        Ok(())
    }

    pub fn checkpoint(&self) -> Result<()> {
        let entries = self.engine.snapshot()?;
        let mut wal = self.wal.lock();
        let new_sequence = wal.sequence() + 1;
        Checkpoint::new(new_sequence, entries).save(&self.layout)?;
        wal.rotate(&self.layout, new_sequence)
    }

    /// Best-effort reclamation: force a checkpoint now, truncating the
    /// current WAL to whatever writes land after it.
    pub fn compact(&self) -> Result<()> {
        self.checkpoint()
    }

    pub fn sequence(&self, name: &str) -> Result<Arc<Sequence>> {
        if let Some(seq) = self.sequences.read().get(name) {
            return Ok(seq.clone());
        }
        let mut sequences = self.sequences.write();
        if let Some(seq) = sequences.get(name) {
            return Ok(seq.clone());
        }
        let seq = Arc::new(Sequence::load(&self.engine, name, self.sequence_page_size)?);
        sequences.insert(name.to_string(), seq.clone());
        Ok(seq)
    }

    pub fn next_sequence_value(&self, name: &str) -> Result<u64> {
        self.sequence(name)?.next_value(&self.engine, name)
    }

    /// Reserves `count` contiguous sequence values, returning the first.
    pub fn reserve_sequence_values(&self, name: &str, count: u64) -> Result<u64> {
        self.sequence(name)?.reserve(&self.engine, name, count)
    }

    pub fn object_count(&self) -> usize {
        self.engine.len()
    }
}

fn map_bound(bound: &Bound<Vec<u8>>, f: impl Fn(&[u8]) -> Vec<u8>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(f(k)),
        Bound::Excluded(k) => Bound::Excluded(f(k)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn strip_cookie(pairs: Vec<KvPair>, cookie: &[u8]) -> Vec<KvPair> {
    let prefix_len = cookie.len() + 1;
    pairs.into_iter().map(|(k, v)| (k[prefix_len..].to_vec(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_commit_then_get_survives_in_same_store() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), 0, &config).unwrap();

        let mut overlay = store.begin();
        store.put(&mut overlay, cookie::OBJECTS, b"id1", b"doc1".to_vec());
        store.commit(overlay).unwrap();

        let overlay = store.begin();
        assert_eq!(store.get(&overlay, cookie::OBJECTS, b"id1").unwrap(), Some(b"doc1".to_vec()));
    }

    #[test]
    fn recovers_from_wal_after_reopen() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        {
            let store = Store::open(dir.path(), 0, &config).unwrap();
            let mut overlay = store.begin();
            store.put(&mut overlay, cookie::OBJECTS, b"id1", b"doc1".to_vec());
            store.commit(overlay).unwrap();
        }
        let reopened = Store::open(dir.path(), 0, &config).unwrap();
        let overlay = reopened.begin();
        assert_eq!(reopened.get(&overlay, cookie::OBJECTS, b"id1").unwrap(), Some(b"doc1".to_vec()));
    }

    #[test]
    fn overlay_is_visible_before_commit_and_isolated_per_transaction() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), 0, &config).unwrap();

        let mut overlay = store.begin();
        store.put(&mut overlay, cookie::OBJECTS, b"id1", b"doc1".to_vec());
        assert_eq!(store.get(&overlay, cookie::OBJECTS, b"id1").unwrap(), Some(b"doc1".to_vec()));

        let other_overlay = store.begin();
        assert_eq!(store.get(&other_overlay, cookie::OBJECTS, b"id1").unwrap(), None);
    }

    #[test]
    fn scan_cookie_strips_prefix_and_merges_overlay() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), 0, &config).unwrap();

        let mut overlay = store.begin();
        store.put(&mut overlay, cookie::OBJECTS, b"a", b"1".to_vec());
        store.commit(overlay).unwrap();

        let mut overlay = store.begin();
        store.put(&mut overlay, cookie::OBJECTS, b"b", b"2".to_vec());
        let rows = store.scan_cookie(&overlay, cookie::OBJECTS).unwrap();
        assert_eq!(rows, vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }
}
