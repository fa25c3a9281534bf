use parking_lot::Mutex;

use crate::core::error::Result;
use crate::core::types::{Document, Id};

/// Loads documents for `ids` across up to `workers` threads. The id list
/// is split into contiguous chunks so each thread owns a disjoint slice
/// of the output buffer directly (`split_at_mut`) rather than contending
/// on a shared lock per write.
pub fn load_documents_parallel<F>(ids: &[Id], workers: usize, loader: F) -> Result<Vec<Option<Document>>>
where
    F: Fn(Id) -> Result<Option<Document>> + Sync,
{
    let mut results: Vec<Option<Document>> = (0..ids.len()).map(|_| None).collect();
    if ids.is_empty() {
        return Ok(results);
    }

    let workers = workers.max(1).min(ids.len());
    let chunk_size = ids.len().div_ceil(workers);
    let errors: Mutex<Vec<crate::core::error::Error>> = Mutex::new(Vec::new());

    crossbeam::thread::scope(|scope| {
        let mut remaining_ids = ids;
        let mut remaining_out = results.as_mut_slice();
        while !remaining_ids.is_empty() {
            let take = chunk_size.min(remaining_ids.len());
            let (id_chunk, rest_ids) = remaining_ids.split_at(take);
            let (out_chunk, rest_out) = remaining_out.split_at_mut(take);
            remaining_ids = rest_ids;
            remaining_out = rest_out;
            let loader = &loader;
            let errors = &errors;
            scope.spawn(move |_| {
                for (slot, &id) in out_chunk.iter_mut().zip(id_chunk) {
                    match loader(id) {
                        Ok(doc) => *slot = doc,
                        Err(e) => errors.lock().push(e),
                    }
                }
            });
        }
    })
    .expect("worker thread panicked while loading documents");

    let mut errors = errors.into_inner();
    if let Some(e) = errors.pop() {
        return Err(e);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Value;

    #[test]
    fn loads_documents_preserving_input_order() {
        let ids: Vec<Id> = (1..=20).map(|i| Id::new(0, i)).collect();
        let results = load_documents_parallel(&ids, 4, |id| {
            let mut doc = Document::new(id, "Test:1");
            doc.props.insert("n".to_string(), Value::Int(id.local_id() as i64));
            Ok(Some(doc))
        })
        .unwrap();

        assert_eq!(results.len(), 20);
        for (i, doc) in results.into_iter().enumerate() {
            assert_eq!(doc.unwrap().id, ids[i]);
        }
    }

    #[test]
    fn missing_documents_surface_as_none() {
        let ids = vec![Id::new(0, 1), Id::new(0, 2)];
        let results = load_documents_parallel(&ids, 2, |id| {
            if id.local_id() == 1 {
                Ok(None)
            } else {
                Ok(Some(Document::new(id, "Test:1")))
            }
        })
        .unwrap();
        assert!(results[0].is_none());
        assert!(results[1].is_some());
    }

    #[test]
    fn a_loader_error_propagates() {
        let ids = vec![Id::new(0, 1)];
        let result = load_documents_parallel(&ids, 1, |_| {
            Err(crate::core::error::Error::new(crate::core::error::ErrorKind::Io, "boom"))
        });
        assert!(result.is_err());
    }
}
