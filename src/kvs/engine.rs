use std::ops::Bound;

use crate::core::error::Result;

pub type KvPair = (Vec<u8>, Vec<u8>);

/// The pluggable ordered byte-keyed store a `kvs::Store` sits on top of.
/// `MemEngine` is the only implementation shipped here; a durable
/// LSM/B-tree engine could replace it without touching anything above this
/// trait.
pub trait KvEngine: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
    fn delete(&self, key: &[u8]) -> Result<bool>;
    /// All entries whose key falls in `[start, end)` (per `Bound`), in
    /// ascending byte order.
    fn range(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Result<Vec<KvPair>>;
    fn snapshot(&self) -> Result<Vec<KvPair>>;
    fn restore(&self, entries: Vec<KvPair>) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
