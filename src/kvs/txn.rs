use std::collections::HashMap;
use std::ops::Bound;

/// A transaction's uncommitted writes against one shard's keyspace.
/// `None` records a delete so reads see a tombstone rather than falling
/// through to the base engine. Reads consult the overlay first, then the
/// base store — this is the "overlay/base" semantics `kvs::Store` exposes.
#[derive(Debug, Default)]
pub struct Overlay {
    writes: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Overlay {
    pub fn new() -> Self {
        Overlay::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// `Some(Some(v))` = overlay has a value, `Some(None)` = overlay has a
    /// tombstone, `None` = overlay doesn't know about this key.
    pub fn get(&self, key: &[u8]) -> Option<Option<&Vec<u8>>> {
        self.writes.get(key).map(|v| v.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Overlay entries whose key falls in `[start, end)`, unsorted.
    pub fn entries_in_range(&self, start: &Bound<Vec<u8>>, end: &Bound<Vec<u8>>) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.writes
            .iter()
            .filter(|(k, _)| in_bounds(k, start, end))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn into_entries(self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.writes.into_iter().collect()
    }
}

fn in_bounds(key: &[u8], start: &Bound<Vec<u8>>, end: &Bound<Vec<u8>>) -> bool {
    let above_start = match start {
        Bound::Included(s) => key >= s.as_slice(),
        Bound::Excluded(s) => key > s.as_slice(),
        Bound::Unbounded => true,
    };
    let below_end = match end {
        Bound::Included(e) => key <= e.as_slice(),
        Bound::Excluded(e) => key < e.as_slice(),
        Bound::Unbounded => true,
    };
    above_start && below_end
}
