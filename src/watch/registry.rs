use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::kind::KindId;
use crate::watch::watcher::{Watch, WatchState};

/// All armed watchers, keyed by the index they're watching. A write,
/// kind deletion, or shard-status change looks up (or in the
/// shard-status case, walks) this map to find who to fire.
#[derive(Default)]
pub struct WatchRegistry {
    by_index: RwLock<HashMap<(KindId, String), Vec<Arc<Watch>>>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        WatchRegistry::default()
    }

    pub fn register(&self, watch: Arc<Watch>) {
        let key = (watch.kind_id, watch.index_name.clone());
        self.by_index.write().entry(key).or_default().push(watch);
    }

    /// Fires every watcher on `index_name` whose range covers `key`, then
    /// drops invalidated entries from the registry.
    pub fn notify_write(&self, kind_id: KindId, index_name: &str, key: &[u8]) {
        let key_tuple = (kind_id, index_name.to_string());
        let watches = {
            let registry = self.by_index.read();
            registry.get(&key_tuple).cloned().unwrap_or_default()
        };
        for watch in &watches {
            if watch.matches_write(index_name, key) {
                watch.fire();
            }
        }
        self.prune(&key_tuple);
    }

    /// Fires every watcher on any index of `kind_id`, on kind/index
    /// deletion touching them.
    pub fn notify_kind_changed(&self, kind_id: KindId) {
        let keys: Vec<(KindId, String)> = {
            let registry = self.by_index.read();
            registry.keys().filter(|(k, _)| *k == kind_id).cloned().collect()
        };
        for key in keys {
            let watches = self.by_index.read().get(&key).cloned().unwrap_or_default();
            for watch in &watches {
                watch.fire();
            }
            self.prune(&key);
        }
    }

    /// A shard activation/mount/unmount change can affect the result set
    /// of any query, so every active watcher fires. Coarse-grained, as
    /// the engine's design explicitly allows.
    pub fn notify_shard_status_changed(&self) {
        let all_keys: Vec<(KindId, String)> = self.by_index.read().keys().cloned().collect();
        for key in all_keys {
            let watches = self.by_index.read().get(&key).cloned().unwrap_or_default();
            for watch in &watches {
                watch.fire();
            }
            self.prune(&key);
        }
    }

    fn prune(&self, key: &(KindId, String)) {
        let mut registry = self.by_index.write();
        if let Some(list) = registry.get_mut(key) {
            list.retain(|w| w.state() != WatchState::Invalid);
            if list.is_empty() {
                registry.remove(key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_index.read().values().map(|v| v.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Bound;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn range(lo: &[u8], hi: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        (Bound::Included(lo.to_vec()), Bound::Excluded(hi.to_vec()))
    }

    #[test]
    fn notify_write_fires_and_prunes_matching_watcher() {
        let registry = WatchRegistry::new();
        let watch = Watch::new(1, "byX", vec![range(b"a", b"z")], false);
        watch.activate(None);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        watch.on_fire(move |_| { f.fetch_add(1, Ordering::SeqCst); });
        registry.register(watch);

        assert_eq!(registry.len(), 1);
        registry.notify_write(1, "byX", b"m");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn notify_kind_changed_fires_every_index_of_that_kind() {
        let registry = WatchRegistry::new();
        let w1 = Watch::new(1, "byX", vec![range(b"a", b"z")], false);
        let w2 = Watch::new(1, "byY", vec![range(b"a", b"z")], false);
        w1.activate(None);
        w2.activate(None);
        registry.register(w1.clone());
        registry.register(w2.clone());
        registry.notify_kind_changed(1);
        assert_eq!(w1.state(), crate::watch::watcher::WatchState::Invalid);
        assert_eq!(w2.state(), crate::watch::watcher::WatchState::Invalid);
    }
}
