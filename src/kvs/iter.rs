use crate::kvs::engine::KvPair;

/// Merges a base range scan with overlay entries covering the same range,
/// overlay taking precedence and tombstones (`None`) dropping the base
/// entry entirely. Both inputs may arrive in any order; the result is
/// sorted ascending by key.
pub fn merge_overlay(base: Vec<KvPair>, overlay: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> Vec<KvPair> {
    use std::collections::BTreeMap;
    let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> =
        base.into_iter().map(|(k, v)| (k, Some(v))).collect();
    for (k, v) in overlay {
        merged.insert(k, v);
    }
    merged.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect()
}

/// K-way merge across a pool of shards' already-sorted ranges. The number
/// of shards mounted at once is small, so a linear scan for the minimum
/// head element per step is simpler than a heap and costs nothing in
/// practice.
pub struct PoolIterator {
    sources: Vec<(u32, std::iter::Peekable<std::vec::IntoIter<KvPair>>)>,
}

impl PoolIterator {
    pub fn new(shard_ranges: Vec<(u32, Vec<KvPair>)>) -> Self {
        let sources = shard_ranges.into_iter().map(|(id, v)| (id, v.into_iter().peekable())).collect();
        PoolIterator { sources }
    }
}

impl Iterator for PoolIterator {
    /// (shard-id, (key, value)) — the shard id lets callers resolve which
    /// shard's store to fetch the primary record from.
    type Item = (u32, KvPair);

    fn next(&mut self) -> Option<Self::Item> {
        let mut min_idx: Option<usize> = None;
        let mut min_key: Option<&[u8]> = None;
        for (i, (_, it)) in self.sources.iter().enumerate() {
            if let Some((k, _)) = it.peek() {
                if min_key.is_none_or(|mk| k.as_slice() < mk) {
                    min_key = Some(k.as_slice());
                    min_idx = Some(i);
                }
            }
        }
        let idx = min_idx?;
        let (shard_id, it) = &mut self.sources[idx];
        let pair = it.next().unwrap();
        Some((*shard_id, pair))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_put_shadows_base_and_delete_removes_it() {
        let base = vec![(b"a".to_vec(), b"base".to_vec()), (b"b".to_vec(), b"base".to_vec())];
        let overlay = vec![(b"a".to_vec(), Some(b"overlay".to_vec())), (b"b".to_vec(), None)];
        let merged = merge_overlay(base, overlay);
        assert_eq!(merged, vec![(b"a".to_vec(), b"overlay".to_vec())]);
    }

    #[test]
    fn pool_iterator_yields_global_ascending_order() {
        let shard_a = vec![(b"b".to_vec(), b"1".to_vec()), (b"d".to_vec(), b"1".to_vec())];
        let shard_b = vec![(b"a".to_vec(), b"2".to_vec()), (b"c".to_vec(), b"2".to_vec())];
        let it = PoolIterator::new(vec![(0, shard_a), (1, shard_b)]);
        let keys: Vec<Vec<u8>> = it.map(|(_, (k, _))| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }
}
