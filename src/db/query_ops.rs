use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Instant;

use log::warn;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, Id, Value};
use crate::idx;
use crate::kind::collation::{fold, Collation};
use crate::kind::kind::IndexDef;
use crate::kind::registry::KindEntry;
use crate::kind::{KindId, Permission};
use crate::kvs::cookie;
use crate::query::ast::{Clause, Op};
use crate::query::{self, Cursor, Query, MAX_LIMIT};
use crate::search::{self, CacheKey};
use crate::txn::Transaction;
use crate::watch::Watch;

use super::{decode_record, Database};

pub struct FindResult {
    pub documents: Vec<Document>,
    pub page: Option<String>,
}

fn values_equal(a: &Value, b: &Value, collation: Collation) -> bool {
    crate::idx::sortkey::encode_segment(a, collation) == crate::idx::sortkey::encode_segment(b, collation)
}

/// `=`/`≠` treat either side being an array as membership: a document
/// property holding an array matches if any element equals the clause's
/// value, and a clause whose value is an array matches if the property
/// equals any of its elements.
fn eq_matches(actual: &Value, target: &Value, collation: Collation) -> bool {
    match (actual, target) {
        (Value::Array(items), _) => items.iter().any(|v| eq_matches(v, target, collation)),
        (_, Value::Array(items)) => items.iter().any(|v| eq_matches(actual, v, collation)),
        _ => values_equal(actual, target, collation),
    }
}

fn folded_str(value: &Value, collation: Collation) -> Option<String> {
    value.as_str().map(|s| fold(s, collation))
}

fn clause_matches(doc: &Document, clause: &Clause) -> bool {
    let collation = clause.collation.unwrap_or(Collation::Tertiary);
    let actual = doc.get(&clause.prop).cloned().unwrap_or(Value::Null);

    match clause.op {
        Op::Eq => eq_matches(&actual, &clause.value, collation),
        Op::Ne => !eq_matches(&actual, &clause.value, collation),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let ord = crate::idx::sortkey::encode_segment(&actual, collation)
                .cmp(&crate::idx::sortkey::encode_segment(&clause.value, collation));
            match clause.op {
                Op::Lt => ord == Ordering::Less,
                Op::Le => ord != Ordering::Greater,
                Op::Gt => ord == Ordering::Greater,
                Op::Ge => ord != Ordering::Less,
                _ => unreachable!("covered by outer match"),
            }
        }
        Op::Prefix => match (folded_str(&actual, collation), folded_str(&clause.value, collation)) {
            (Some(a), Some(b)) => a.starts_with(b.as_str()),
            _ => false,
        },
        Op::Substring => match (folded_str(&actual, collation), folded_str(&clause.value, collation)) {
            (Some(a), Some(b)) => a.contains(b.as_str()),
            _ => false,
        },
        Op::Search => match (folded_str(&actual, collation), folded_str(&clause.value, collation)) {
            (Some(a), Some(b)) => crate::analysis::Analyzer::whitespace().tokenize(&a).iter().any(|t| *t == b),
            _ => false,
        },
    }
}

/// Re-checks every where/filter clause against the fully loaded document.
/// The index range scan only narrows candidates by its leading
/// equality/inequality prefix; every clause (covered or not) is
/// re-evaluated here so correctness never depends on how much of the
/// predicate the chosen index happened to cover.
fn filters_pass(doc: &Document, clauses: &[Clause]) -> bool {
    clauses.iter().all(|c| clause_matches(doc, c))
}

/// A fingerprint of everything about a query that affects which ids
/// match, deliberately excluding `page`/`limit` (those only affect how
/// many of the matching ids a given call sees).
fn query_fingerprint(query: &Query) -> String {
    format!(
        "{}|{:?}|{:?}|{:?}|{:?}|{}|{}|{}",
        query.from,
        query.where_clauses,
        query.filter_clauses,
        query.order_by,
        query.distinct,
        query.desc,
        query.include_deleted,
        query.ignore_inactive_shards,
    )
}

fn prefix_bound(namespace: &[u8], bound: Bound<Vec<u8>>, is_lower: bool) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(b) => {
            let mut key = namespace.to_vec();
            key.extend_from_slice(&b);
            Bound::Included(key)
        }
        Bound::Excluded(b) => {
            let mut key = namespace.to_vec();
            key.extend_from_slice(&b);
            Bound::Excluded(key)
        }
        Bound::Unbounded if is_lower => Bound::Included(namespace.to_vec()),
        Bound::Unbounded => {
            let mut key = namespace.to_vec();
            key.push(0xFF);
            Bound::Excluded(key)
        }
    }
}

struct ScanOutcome {
    documents: Vec<Document>,
    page: Option<String>,
    end_key: Option<Vec<u8>>,
    kind_id: KindId,
    index_name: String,
    ranges: Vec<(Bound<Vec<u8>>, Bound<Vec<u8>>)>,
}

impl Database {
    /// Picks an index covering `query`, scans it (merged across every
    /// mounted shard, since an index's entries for one kind are scattered
    /// across whichever shard each matching document lives on), and
    /// returns a `Cursor` over the matching range plus the full-keyspace
    /// range bounds a `Watch` would need to arm the same query.
    fn scan_index(
        &self,
        txn: &Transaction,
        entry: &Arc<KindEntry>,
        query: &Query,
    ) -> Result<(String, Vec<(Bound<Vec<u8>>, Bound<Vec<u8>>)>, Cursor)> {
        let (index_name, lower, upper) = {
            let schema = entry.schema.read();
            let choice = query::select_index(&schema, query).ok_or_else(|| {
                Error::new(ErrorKind::InvalidQuery, format!("no index on {} covers this query", query.from))
            })?;
            let (lower, upper) = query::build_range(&choice, query);
            (choice.index.name.clone(), lower, upper)
        };

        let namespace = idx::index_namespace(entry.kind_id, &index_name);
        let full_lower = prefix_bound(&namespace, lower, true);
        let full_upper = prefix_bound(&namespace, upper, false);

        let shard_ids = if query.ignore_inactive_shards { self.shards.active_ids() } else { self.shards.mounted_ids() };
        let mut rows = Vec::new();
        for shard_id in shard_ids {
            rows.extend(txn.scan_range(shard_id, cookie::INDEXES, full_lower.clone(), full_upper.clone())?);
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let distinct = query.distinct.is_some();
        let cursor = match &query.page {
            Some(page) => Cursor::resume(rows, query.desc, distinct, page)?,
            None => Cursor::new(rows, query.desc, distinct),
        };
        Ok((index_name, vec![(full_lower, full_upper)], cursor))
    }

    fn fetch_document(&self, txn: &Transaction, entry: &KindEntry, id: Id) -> Result<Option<Document>> {
        let shard_id = id.shard_id();
        let bytes = match txn.get(shard_id, cookie::OBJECTS, &id.to_be_bytes())? {
            Some(b) => b,
            None => return Ok(None),
        };
        let (header, props) = {
            let tokens = entry.tokens.lock();
            decode_record(&bytes, &tokens)?
        };
        let kind = entry.schema.read().id.clone();
        Ok(Some(Document { id, kind, rev: header.rev, del: header.del, props }))
    }

    /// Streams an index range in order, fetching and filtering each
    /// candidate, stopping once `limit` documents have passed. This is
    /// the `find` path: no global sort, the index's own order is the
    /// result order. Shared by `find` and `watch` (which arms against
    /// the same range and boundary this produces) and by `search` when
    /// `immediateReturn` asks to skip materialization.
    fn run_find(&self, caller: &str, query: &Query) -> Result<ScanOutcome> {
        query::validate(query)?;
        let entry = self.kinds.require(&query.from)?;
        if !entry.schema.read().permissions.is_allowed(caller, Permission::Read) {
            return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not read {}", query.from)));
        }

        let txn = self.begin_txn();
        let (index_name, ranges, mut cursor) = self.scan_index(&txn, &entry, query)?;

        let limit = query.limit.map(|l| l.min(MAX_LIMIT)).unwrap_or(MAX_LIMIT);
        let mut documents = Vec::new();
        while documents.len() < limit {
            let id = match cursor.next() {
                Some((_, id)) => id,
                None => break,
            };
            match self.fetch_document(&txn, &entry, id)? {
                Some(doc) if doc.del && !query.include_deleted => continue,
                Some(doc) if !filters_pass(&doc, &query.where_clauses) || !filters_pass(&doc, &query.filter_clauses) => continue,
                Some(doc) => documents.push(doc),
                None => {
                    warn!("index entry for {id} on {}/{index_name} has no primary record, skipping", query.from);
                    continue;
                }
            }
        }

        let page = if documents.len() == limit { cursor.page_token() } else { None };
        let end_key = cursor.page_token();
        Ok(ScanOutcome { documents, page, end_key, kind_id: entry.kind_id, index_name, ranges })
    }

    pub fn find(&self, caller: &str, query: Query) -> Result<FindResult> {
        let started = Instant::now();
        let outcome = self.run_find(caller, &query)?;
        self.find_count.fetch_add(1, AtomicOrdering::Relaxed);
        self.profiler.record(caller, "query", "find", started.elapsed());
        Ok(FindResult { documents: outcome.documents, page: outcome.page })
    }

    /// Arms a live query: evaluates it once (exactly like `find`) and
    /// registers a `Watch` covering the same index range, whose boundary
    /// is the edge of what this call actually delivered. Any later write
    /// that changes membership inside that delivered range fires
    /// `on_fire` exactly once; the watch then deactivates.
    pub fn watch(&self, caller: &str, query: Query, on_fire: impl Fn() + Send + Sync + 'static) -> Result<(FindResult, Arc<Watch>)> {
        let started = Instant::now();
        let outcome = self.run_find(caller, &query)?;
        let watch = Watch::new(outcome.kind_id, outcome.index_name.clone(), outcome.ranges.clone(), query.desc);
        watch.on_fire(move |_| on_fire());
        watch.activate(outcome.end_key.clone());
        self.watches.register(watch.clone());
        self.profiler.record(caller, "query", "watch", started.elapsed());
        Ok((FindResult { documents: outcome.documents, page: outcome.page }, watch))
    }

    /// The `search` path: gathers every candidate id an index range
    /// covers (via the revision-keyed cache when possible), then
    /// materializes, sorts, dedupes and paginates in memory. With
    /// `immediateReturn` set this instead streams like `find`, since
    /// that flag means no ordering was requested and stopping at `limit`
    /// matches is enough.
    pub fn search(&self, caller: &str, query: Query) -> Result<FindResult> {
        let started = Instant::now();
        query::validate(&query)?;
        let entry = self.kinds.require(&query.from)?;
        if !entry.schema.read().permissions.is_allowed(caller, Permission::Read) {
            return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not read {}", query.from)));
        }

        let limit = query.limit.map(|l| l.min(MAX_LIMIT)).unwrap_or(MAX_LIMIT);

        if query.immediate_return {
            let outcome = self.run_find(caller, &query)?;
            self.search_count.fetch_add(1, AtomicOrdering::Relaxed);
            self.profiler.record(caller, "query", "search", started.elapsed());
            return Ok(FindResult { documents: outcome.documents, page: outcome.page });
        }

        let txn = self.begin_txn();
        let kind_revision = entry.content_hash() as u64;
        let cache_key = CacheKey::new(entry.kind_id, query_fingerprint(&query), kind_revision);

        let candidate_ids = match self.search_cache.get(&cache_key) {
            Some(ids) => ids,
            None => {
                let (_, _ranges, mut cursor) = self.scan_index(&txn, &entry, &query)?;
                let mut ids = Vec::new();
                while ids.len() < self.config.search_max_materialized_ids {
                    match cursor.next() {
                        Some((_, id)) => ids.push(id),
                        None => break,
                    }
                }
                let ids = Arc::new(ids);
                self.search_cache.put(cache_key, ids.clone());
                ids
            }
        };

        let where_clauses = query.where_clauses.clone();
        let filter_clauses = query.filter_clauses.clone();
        let include_deleted = query.include_deleted;
        let from = query.from.clone();
        let loader = |id: Id| -> Result<Option<Document>> {
            match self.fetch_document(&txn, &entry, id)? {
                Some(doc) if doc.del && !include_deleted => Ok(None),
                Some(doc) if !filters_pass(&doc, &where_clauses) || !filters_pass(&doc, &filter_clauses) => Ok(None),
                Some(doc) => Ok(Some(doc)),
                None => {
                    warn!("index entry for {id} on {from} has no primary record, skipping");
                    Ok(None)
                }
            }
        };

        let mut unpaginated_query = query.clone();
        unpaginated_query.limit = None;
        let mut documents =
            search::materialize((*candidate_ids).clone(), &unpaginated_query, self.config.search_max_materialized_ids, self.config.search_worker_threads, loader)?;

        let page = if documents.len() > limit { Some(documents[limit].id.to_base64()) } else { None };
        documents.truncate(limit);

        self.search_count.fetch_add(1, AtomicOrdering::Relaxed);
        self.profiler.record(caller, "query", "search", started.elapsed());
        Ok(FindResult { documents, page })
    }
}
