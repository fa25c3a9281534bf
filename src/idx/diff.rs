use std::collections::HashSet;

use crate::core::types::{Document, Id};
use crate::idx::extractor::extract_keys;
use crate::kind::kind::IndexDef;
use crate::kind::KindId;
use crate::kvs::cookie;
use crate::kvs::{Overlay, Store};

/// The part of an index entry key before its composite sort-key: the
/// owning kind and index name, namespacing one index's entries off from
/// every other index's. Exposed so `query`'s range bounds (composite-only)
/// and `watch`'s armed ranges can be translated into this same keyspace.
pub fn index_namespace(kind_id: KindId, index_name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + index_name.len() + 1);
    out.extend_from_slice(&kind_id.to_be_bytes());
    out.extend_from_slice(index_name.as_bytes());
    out.push(0);
    out
}

/// Builds the full `indexes` cookie key for one index entry: the owning
/// kind and index name namespace separate indexes from each other, the
/// composite sort-key prefix orders entries for range scans, and the
/// trailing `_id` bytes make every entry unique even when several
/// documents share the same sort key.
fn entry_key(kind_id: KindId, index_name: &str, composite: &[u8], id: Id) -> Vec<u8> {
    let mut out = index_namespace(kind_id, index_name);
    out.extend_from_slice(composite);
    out.extend_from_slice(&id.to_be_bytes());
    out
}

/// Returns the set of key prefixes `doc` contributes to `index`, or none
/// if the document is absent or (for indexes that don't opt into
/// `inc_del`) tombstoned.
fn keys_for(index: &IndexDef, doc: Option<&Document>) -> HashSet<Vec<u8>> {
    match doc {
        Some(d) if d.del && !index.inc_del => HashSet::new(),
        Some(d) => extract_keys(index, d).into_iter().collect(),
        None => HashSet::new(),
    }
}

/// Applies one index's write-time delta for a single document transition:
/// entries present in the old state but not the new are deleted, entries
/// present in the new state but not the old are inserted, and entries in
/// both are left untouched. Called once per index on every put/delete.
pub fn apply_diff(
    store: &Store,
    overlay: &mut Overlay,
    kind_id: KindId,
    index: &IndexDef,
    id: Id,
    old: Option<&Document>,
    new: Option<&Document>,
) {
    let old_keys = keys_for(index, old);
    let new_keys = keys_for(index, new);

    for composite in old_keys.difference(&new_keys) {
        let key = entry_key(kind_id, &index.name, composite, id);
        store.delete(overlay, cookie::INDEXES, &key);
    }
    for composite in new_keys.difference(&old_keys) {
        let key = entry_key(kind_id, &index.name, composite, id);
        store.put(overlay, cookie::INDEXES, &key, Vec::new());
    }
}

/// Applies `apply_diff` across every index a kind defines, for one
/// document transition.
pub fn apply_diffs<'a>(
    store: &Store,
    overlay: &mut Overlay,
    kind_id: KindId,
    indexes: impl IntoIterator<Item = &'a IndexDef>,
    id: Id,
    old: Option<&Document>,
    new: Option<&Document>,
) {
    for index in indexes {
        apply_diff(store, overlay, kind_id, index, id, old, new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::Value;
    use crate::kind::kind::IndexProp;
    use tempfile::tempdir;

    fn doc(id: Id, name: &str) -> Document {
        let mut d = Document::new(id, "Test:1");
        d.props.insert("name".to_string(), Value::String(name.to_string()));
        d
    }

    #[test]
    fn insert_then_update_moves_the_index_entry() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), 0, &config).unwrap();
        let index = IndexDef::new("byName", vec![IndexProp::new("name")]);
        let id = Id::new(0, 1);

        let mut overlay = store.begin();
        let v1 = doc(id, "Alice");
        apply_diff(&store, &mut overlay, 7, &index, id, None, Some(&v1));
        store.commit(overlay).unwrap();

        let overlay = store.begin();
        let rows = store.scan_cookie(&overlay, cookie::INDEXES).unwrap();
        assert_eq!(rows.len(), 1);

        let mut overlay = store.begin();
        let v2 = doc(id, "Bob");
        apply_diff(&store, &mut overlay, 7, &index, id, Some(&v1), Some(&v2));
        store.commit(overlay).unwrap();

        let overlay = store.begin();
        let rows = store.scan_cookie(&overlay, cookie::INDEXES).unwrap();
        assert_eq!(rows.len(), 1, "old entry replaced, not accumulated");
    }

    #[test]
    fn delete_removes_the_index_entry() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), 0, &config).unwrap();
        let index = IndexDef::new("byName", vec![IndexProp::new("name")]);
        let id = Id::new(0, 1);

        let mut overlay = store.begin();
        let v1 = doc(id, "Alice");
        apply_diff(&store, &mut overlay, 7, &index, id, None, Some(&v1));
        store.commit(overlay).unwrap();

        let mut overlay = store.begin();
        apply_diff(&store, &mut overlay, 7, &index, id, Some(&v1), None);
        store.commit(overlay).unwrap();

        let overlay = store.begin();
        let rows = store.scan_cookie(&overlay, cookie::INDEXES).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn index_namespace_prefixes_every_entry_of_that_index() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), 0, &config).unwrap();
        let index = IndexDef::new("byName", vec![IndexProp::new("name")]);
        let id = Id::new(0, 1);

        let mut overlay = store.begin();
        apply_diff(&store, &mut overlay, 7, &index, id, None, Some(&doc(id, "Alice")));
        store.commit(overlay).unwrap();

        let overlay = store.begin();
        let rows = store.scan_cookie(&overlay, cookie::INDEXES).unwrap();
        let namespace = index_namespace(7, "byName");
        assert!(rows[0].0.starts_with(&namespace));
    }

    #[test]
    fn unchanged_property_leaves_entry_untouched() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), 0, &config).unwrap();
        let index = IndexDef::new("byName", vec![IndexProp::new("name")]);
        let id = Id::new(0, 1);

        let mut overlay = store.begin();
        let v1 = doc(id, "Alice");
        apply_diff(&store, &mut overlay, 7, &index, id, None, Some(&v1));
        store.commit(overlay).unwrap();

        let mut overlay = store.begin();
        apply_diff(&store, &mut overlay, 7, &index, id, Some(&v1), Some(&v1));
        assert!(overlay.is_empty(), "no-op diff writes nothing");
    }
}
