use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::core::error::Result;
use crate::kvs::engine::{KvEngine, KvPair};

/// In-memory ordered engine: a `BTreeMap` behind a single `RwLock`. Durable
/// across restarts only via the owning `Store`'s WAL + checkpoint, not on
/// its own.
#[derive(Default)]
pub struct MemEngine {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemEngine {
    pub fn new() -> Self {
        MemEngine { map: RwLock::new(BTreeMap::new()) }
    }
}

impl KvEngine for MemEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.map.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.map.write().remove(key).is_some())
    }

    fn range(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Result<Vec<KvPair>> {
        Ok(self
            .map
            .read()
            .range((start, end))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn snapshot(&self) -> Result<Vec<KvPair>> {
        Ok(self.map.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn restore(&self, entries: Vec<KvPair>) -> Result<()> {
        let mut map = self.map.write();
        map.clear();
        map.extend(entries);
        Ok(())
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let engine = MemEngine::new();
        engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(engine.delete(b"a").unwrap());
        assert_eq!(engine.get(b"a").unwrap(), None);
    }

    #[test]
    fn range_is_ascending_by_byte_order() {
        let engine = MemEngine::new();
        for k in [b"c".to_vec(), b"a".to_vec(), b"b".to_vec()] {
            engine.put(k.clone(), k).unwrap();
        }
        let got: Vec<Vec<u8>> = engine
            .range(Bound::Unbounded, Bound::Unbounded)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(got, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn snapshot_restore_roundtrips() {
        let engine = MemEngine::new();
        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        let snap = engine.snapshot().unwrap();

        let restored = MemEngine::new();
        restored.restore(snap).unwrap();
        assert_eq!(restored.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
