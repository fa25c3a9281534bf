use std::collections::HashMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, Id, MAIN_SHARD};
use crate::idx;
use crate::kind::kind::IndexDef;
use crate::kind::KindId;
use crate::kvs::{KvPair, Overlay, Store};
use crate::txn::state::TxnState;

static TXN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Looks up the `Store` backing a shard. Implemented by `shard::Pool`;
/// kept as a trait here so `txn` doesn't depend on the shard-mounting
/// machinery, only on "give me the store for this shard id".
pub trait ShardSource: Send + Sync {
    fn store(&self, shard_id: u32) -> Result<Arc<Store>>;
}

struct SubTxn {
    store: Arc<Store>,
    overlay: Overlay,
}

/// A transaction spanning one or more shards. Sub-transactions are forked
/// lazily: the first operation against a shard opens its overlay, shards
/// never touched never pay for one. Commit applies every non-main shard
/// first and the main shard last, so a crash between sub-commits always
/// leaves the main shard's kind/index bookkeeping consistent with
/// whichever data shards did land — full cross-shard atomicity isn't
/// attempted, matching the source engine's own documented best-effort
/// guarantee for multi-shard writes.
pub struct Transaction {
    id: u64,
    source: Arc<dyn ShardSource>,
    state: RwLock<TxnState>,
    subs: Mutex<HashMap<u32, SubTxn>>,
    usage_deltas: Mutex<HashMap<KindId, i64>>,
    post_commit: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Transaction {
    pub fn begin(source: Arc<dyn ShardSource>) -> Self {
        Transaction {
            id: TXN_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
            source,
            state: RwLock::new(TxnState::Active),
            subs: Mutex::new(HashMap::new()),
            usage_deltas: Mutex::new(HashMap::new()),
            post_commit: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TxnState {
        *self.state.read()
    }

    fn check_active(&self) -> Result<()> {
        if *self.state.read() != TxnState::Active {
            return Err(Error::new(ErrorKind::Internal, "transaction is not active"));
        }
        Ok(())
    }

    fn with_sub<R>(&self, shard_id: u32, f: impl FnOnce(&Store, &Overlay) -> R) -> Result<R> {
        self.check_active()?;
        let mut subs = self.subs.lock();
        if !subs.contains_key(&shard_id) {
            let store = self.source.store(shard_id)?;
            let overlay = store.begin();
            subs.insert(shard_id, SubTxn { store, overlay });
        }
        let sub = subs.get(&shard_id).unwrap();
        Ok(f(&sub.store, &sub.overlay))
    }

    fn with_sub_mut<R>(&self, shard_id: u32, f: impl FnOnce(&Store, &mut Overlay) -> R) -> Result<R> {
        self.check_active()?;
        let mut subs = self.subs.lock();
        if !subs.contains_key(&shard_id) {
            let store = self.source.store(shard_id)?;
            let overlay = store.begin();
            subs.insert(shard_id, SubTxn { store, overlay });
        }
        let sub = subs.get_mut(&shard_id).unwrap();
        Ok(f(&sub.store, &mut sub.overlay))
    }

    pub fn get(&self, shard_id: u32, cookie: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_sub(shard_id, |store, overlay| store.get(overlay, cookie, key))?
    }

    pub fn put(&self, shard_id: u32, cookie: &[u8], key: &[u8], value: Vec<u8>) -> Result<()> {
        self.with_sub_mut(shard_id, |store, overlay| store.put(overlay, cookie, key, value))
    }

    pub fn delete(&self, shard_id: u32, cookie: &[u8], key: &[u8]) -> Result<()> {
        self.with_sub_mut(shard_id, |store, overlay| store.delete(overlay, cookie, key))
    }

    pub fn scan_cookie(&self, shard_id: u32, cookie: &[u8]) -> Result<Vec<KvPair>> {
        self.with_sub(shard_id, |store, overlay| store.scan_cookie(overlay, cookie))?
    }

    pub fn scan_range(
        &self,
        shard_id: u32,
        cookie: &[u8],
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
    ) -> Result<Vec<KvPair>> {
        self.with_sub(shard_id, |store, overlay| store.scan_range(overlay, cookie, start, end))?
    }

    pub fn next_sequence_value(&self, shard_id: u32, name: &str) -> Result<u64> {
        self.with_sub(shard_id, |store, _| store.next_sequence_value(name))?
    }

    pub fn reserve_sequence_values(&self, shard_id: u32, name: &str, count: u64) -> Result<u64> {
        self.with_sub(shard_id, |store, _| store.reserve_sequence_values(name, count))?
    }

    /// Runs `idx::apply_diffs` against this shard's forked sub-transaction.
    /// Kept on `Transaction` rather than exposing the raw `(Store, Overlay)`
    /// pair `idx` wants, so index maintenance participates in the same
    /// commit/rollback as every other write in the enclosing transaction.
    pub fn apply_index_diffs<'a>(
        &self,
        shard_id: u32,
        kind_id: KindId,
        indexes: impl IntoIterator<Item = &'a IndexDef>,
        id: Id,
        old: Option<&Document>,
        new: Option<&Document>,
    ) -> Result<()> {
        self.with_sub_mut(shard_id, |store, overlay| {
            idx::apply_diffs(store, overlay, kind_id, indexes, id, old, new);
        })
    }

    /// Accumulates a signed byte-size delta against a kind's quota, to be
    /// checked at commit time. Positive for writes, negative for deletes.
    pub fn record_usage(&self, kind_id: KindId, delta: i64) {
        *self.usage_deltas.lock().entry(kind_id).or_insert(0) += delta;
    }

    pub fn usage_deltas(&self) -> HashMap<KindId, i64> {
        self.usage_deltas.lock().clone()
    }

    /// Registers a callback to run once every sub-transaction has
    /// committed. Used to fire watch notifications only after their
    /// triggering write is durable.
    pub fn on_commit(&self, hook: impl FnOnce() + Send + 'static) {
        self.post_commit.lock().push(Box::new(hook));
    }

    /// Commits every forked sub-transaction, main shard last, then runs
    /// post-commit hooks. `check_quota` is invoked with the accumulated
    /// per-kind usage deltas before anything is written; returning an
    /// error aborts the whole transaction with nothing applied.
    pub fn commit_with_quota_check(
        &self,
        check_quota: impl FnOnce(&HashMap<KindId, i64>) -> Result<()>,
    ) -> Result<()> {
        check_quota(&self.usage_deltas())?;
        self.commit()
    }

    /// Commits every forked sub-transaction, non-main shards first and
    /// the main shard last. A non-main shard that fails to commit does
    /// not stop the rest: every remaining shard (including main) is
    /// still attempted, and the failures are collected and returned
    /// together once all of them have been tried. The transaction's
    /// state always ends terminal (`Committed` if every shard landed,
    /// `Aborted` otherwise) — it never gets stuck in `Preparing`.
    pub fn commit(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != TxnState::Active {
                return Err(Error::new(ErrorKind::Internal, "transaction is not active"));
            }
            *state = TxnState::Preparing;
        }

        let mut subs = self.subs.lock();
        let mut shard_ids: Vec<u32> = subs.keys().copied().collect();
        shard_ids.sort_by_key(|&id| (id == MAIN_SHARD, id));
        let total = shard_ids.len();

        let mut failures: Vec<(u32, Error)> = Vec::new();
        for shard_id in shard_ids {
            let sub = subs.remove(&shard_id).expect("collected from this map");
            if let Err(err) = sub.store.commit(sub.overlay) {
                failures.push((shard_id, err));
            }
        }
        drop(subs);

        if failures.is_empty() {
            *self.state.write() = TxnState::Committed;
            for hook in self.post_commit.lock().drain(..) {
                hook();
            }
            Ok(())
        } else {
            *self.state.write() = TxnState::Aborted;
            self.post_commit.lock().clear();
            let detail = failures.iter().map(|(shard_id, err)| format!("shard {shard_id}: {err}")).collect::<Vec<_>>().join("; ");
            Err(Error::new(ErrorKind::Internal, format!("{} of {total} shard(s) failed to commit: {detail}", failures.len())))
        }
    }

    pub fn rollback(&self) -> Result<()> {
        *self.state.write() = TxnState::Aborted;
        self.subs.lock().clear();
        self.usage_deltas.lock().clear();
        self.post_commit.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::kvs::cookie;
    use tempfile::tempdir;

    struct SingleShard(Arc<Store>);

    impl ShardSource for SingleShard {
        fn store(&self, shard_id: u32) -> Result<Arc<Store>> {
            if shard_id == self.0.shard_id {
                Ok(self.0.clone())
            } else {
                Err(Error::new(ErrorKind::InvalidShardId, "no such shard"))
            }
        }
    }

    fn open_store() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let store = Arc::new(Store::open(dir.path(), MAIN_SHARD, &config).unwrap());
        (dir, store)
    }

    #[test]
    fn put_then_commit_is_visible_in_a_later_transaction() {
        let (_dir, store) = open_store();
        let source: Arc<dyn ShardSource> = Arc::new(SingleShard(store.clone()));

        let txn = Transaction::begin(source.clone());
        txn.put(MAIN_SHARD, cookie::OBJECTS, b"a", b"1".to_vec()).unwrap();
        txn.commit().unwrap();

        let txn2 = Transaction::begin(source);
        assert_eq!(txn2.get(MAIN_SHARD, cookie::OBJECTS, b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_discards_writes() {
        let (_dir, store) = open_store();
        let source: Arc<dyn ShardSource> = Arc::new(SingleShard(store));

        let txn = Transaction::begin(source.clone());
        txn.put(MAIN_SHARD, cookie::OBJECTS, b"a", b"1".to_vec()).unwrap();
        txn.rollback().unwrap();

        let txn2 = Transaction::begin(source);
        assert_eq!(txn2.get(MAIN_SHARD, cookie::OBJECTS, b"a").unwrap(), None);
    }

    #[test]
    fn operations_after_commit_are_rejected() {
        let (_dir, store) = open_store();
        let source: Arc<dyn ShardSource> = Arc::new(SingleShard(store));
        let txn = Transaction::begin(source);
        txn.commit().unwrap();
        assert!(txn.put(MAIN_SHARD, cookie::OBJECTS, b"a", b"1".to_vec()).is_err());
    }

    #[test]
    fn quota_check_rejecting_aborts_before_any_write_lands() {
        let (_dir, store) = open_store();
        let source: Arc<dyn ShardSource> = Arc::new(SingleShard(store.clone()));

        let txn = Transaction::begin(source.clone());
        txn.put(MAIN_SHARD, cookie::OBJECTS, b"a", b"1".to_vec()).unwrap();
        txn.record_usage(7, 1);
        let result = txn.commit_with_quota_check(|_deltas| {
            Err(Error::new(ErrorKind::QuotaExceeded, "over quota"))
        });
        assert!(result.is_err());

        let txn2 = Transaction::begin(source);
        assert_eq!(txn2.get(MAIN_SHARD, cookie::OBJECTS, b"a").unwrap(), None);
    }

    #[test]
    fn apply_index_diffs_is_visible_after_commit() {
        use crate::kind::kind::IndexProp;

        let (_dir, store) = open_store();
        let source: Arc<dyn ShardSource> = Arc::new(SingleShard(store));
        let index = IndexDef::new("byName", vec![IndexProp::new("name")]);
        let id = Id::new(0, 1);
        let mut doc = Document::new(id, "Test:1");
        doc.props.insert("name".to_string(), crate::core::types::Value::String("Alice".to_string()));

        let txn = Transaction::begin(source.clone());
        txn.apply_index_diffs(MAIN_SHARD, 7, [&index], id, None, Some(&doc)).unwrap();
        txn.commit().unwrap();

        let txn2 = Transaction::begin(source);
        let rows = txn2.scan_cookie(MAIN_SHARD, cookie::INDEXES).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn post_commit_hook_runs_after_commit_succeeds() {
        let (_dir, store) = open_store();
        let source: Arc<dyn ShardSource> = Arc::new(SingleShard(store));
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();

        let txn = Transaction::begin(source);
        txn.on_commit(move || fired2.store(true, Ordering::SeqCst));
        txn.commit().unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }
}
