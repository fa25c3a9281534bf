use std::ops::Bound;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::kind::KindId;
use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WatchState {
    Pending = 0,
    Active = 1,
    Invalid = 2,
}

impl WatchState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WatchState::Pending,
            1 => WatchState::Active,
            _ => WatchState::Invalid,
        }
    }
}

fn key_in_bounds(key: &[u8], range: &(Bound<Vec<u8>>, Bound<Vec<u8>>)) -> bool {
    let lower_ok = match &range.0 {
        Bound::Included(b) => key >= b.as_slice(),
        Bound::Excluded(b) => key > b.as_slice(),
        Bound::Unbounded => true,
    };
    let upper_ok = match &range.1 {
        Bound::Included(b) => key <= b.as_slice(),
        Bound::Excluded(b) => key < b.as_slice(),
        Bound::Unbounded => true,
    };
    lower_ok && upper_ok
}

/// One armed query's live-update subscription: an index, the key ranges
/// the query traverses, and an `end_key` marking the edge of the result
/// set already delivered to the caller. Grounded on the original
/// watcher's range-vector plus single fire-then-invalidate contract.
pub struct Watch {
    pub kind_id: KindId,
    pub index_name: String,
    ranges: Vec<(Bound<Vec<u8>>, Bound<Vec<u8>>)>,
    desc: bool,
    state: AtomicU8,
    end_key: Mutex<Option<Vec<u8>>>,
    signal: Signal<()>,
    fire_lock: Mutex<()>,
}

impl Watch {
    pub fn new(
        kind_id: KindId,
        index_name: impl Into<String>,
        ranges: Vec<(Bound<Vec<u8>>, Bound<Vec<u8>>)>,
        desc: bool,
    ) -> Arc<Self> {
        Arc::new(Watch {
            kind_id,
            index_name: index_name.into(),
            ranges,
            desc,
            state: AtomicU8::new(WatchState::Pending as u8),
            end_key: Mutex::new(None),
            signal: Signal::new(),
            fire_lock: Mutex::new(()),
        })
    }

    pub fn state(&self) -> WatchState {
        WatchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn on_fire(&self, handler: impl Fn(()) + Send + Sync + 'static) {
        self.signal.connect(handler);
    }

    /// Transitions Pending -> Active once the caller has drained the
    /// initial result set. `end_key` is the first unseen key, or `None`
    /// for +infinity (the query was fully exhausted).
    pub fn activate(&self, end_key: Option<Vec<u8>>) -> bool {
        let ok = self
            .state
            .compare_exchange(
                WatchState::Pending as u8,
                WatchState::Active as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if ok {
            *self.end_key.lock() = end_key;
        }
        ok
    }

    /// Whether a write to `key` on `index_name` should fire this watcher:
    /// same index, currently active, inside one of the armed ranges, and
    /// on the not-yet-delivered side of `end_key`.
    pub fn matches_write(&self, index_name: &str, key: &[u8]) -> bool {
        if self.index_name != index_name || self.state() != WatchState::Active {
            return false;
        }
        if !self.ranges.iter().any(|r| key_in_bounds(key, r)) {
            return false;
        }
        match &*self.end_key.lock() {
            None => true,
            Some(end) => {
                if self.desc {
                    key.as_ref() > end.as_slice()
                } else {
                    key.as_ref() < end.as_slice()
                }
            }
        }
    }

    /// Fires exactly once: the first caller to transition the watcher out
    /// of `Active` wins and invokes the signal; later calls (including
    /// concurrent racers) are no-ops. Used for index writes, kind/index
    /// deletion, and shard-status changes.
    pub fn fire(&self) {
        let _serialize = self.fire_lock.lock();
        let was_active = self
            .state
            .compare_exchange(
                WatchState::Active as u8,
                WatchState::Invalid as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if was_active {
            self.signal.fire(());
        }
    }

    /// Cancel by the subscriber: Invalid without firing the signal.
    pub fn cancel(&self) {
        self.state.store(WatchState::Invalid as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn range(lo: &[u8], hi: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        (Bound::Included(lo.to_vec()), Bound::Excluded(hi.to_vec()))
    }

    #[test]
    fn pending_watch_never_matches() {
        let watch = Watch::new(1, "byX", vec![range(b"a", b"z")], false);
        assert!(!watch.matches_write("byX", b"m"));
    }

    #[test]
    fn active_watch_matches_inside_range_before_end_key() {
        let watch = Watch::new(1, "byX", vec![range(b"a", b"z")], false);
        watch.activate(Some(b"m".to_vec()));
        assert!(watch.matches_write("byX", b"b"));
        assert!(!watch.matches_write("byX", b"n"));
    }

    #[test]
    fn fire_is_single_shot() {
        let watch = Watch::new(1, "byX", vec![range(b"a", b"z")], false);
        watch.activate(None);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        watch.on_fire(move |_| { c.fetch_add(1, Ordering::SeqCst); });
        watch.fire();
        watch.fire();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(watch.state(), WatchState::Invalid);
    }

    #[test]
    fn cancel_invalidates_without_firing() {
        let watch = Watch::new(1, "byX", vec![range(b"a", b"z")], false);
        watch.activate(None);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        watch.on_fire(move |_| { f.fetch_add(1, Ordering::SeqCst); });
        watch.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(watch.state(), WatchState::Invalid);
    }
}
