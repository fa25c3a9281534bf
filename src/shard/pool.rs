use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;

use crate::codec::header::RecordHeader;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::kind::registry::Registry;
use crate::kind::KindId;
use crate::kvs::cookie;
use crate::kvs::store::Store;
use crate::shard::info::ShardInfo;
use crate::txn::ShardSource;

/// The always-mounted, always-active shard that anchors every transaction's
/// commit (spec.md §4.4/§4.9: non-main shards commit first, main shard last).
pub const MAIN_SHARD: u32 = 0;

struct Mounted {
    store: Arc<Store>,
    info: ShardInfo,
}

/// Owns every mounted shard's `Store`, keyed by shard id. Grounded on the
/// original's `Pool<Sel, Backend>`: a selector-keyed map of backends with
/// `Mount`/`Unmount`/`Select` — reworked here around `Arc<Store>` handles
/// instead of raw leveldb backends, and carrying `ShardInfo` device
/// metadata alongside each handle so mount can compare kind hashes.
///
/// Implements `txn::ShardSource` so `Transaction` can fork sub-transactions
/// against mounted shards without this module depending on `txn` in turn.
pub struct Pool {
    shards_root: PathBuf,
    config: Config,
    mounted: RwLock<HashMap<u32, Mounted>>,
}

impl Pool {
    pub fn new(shards_root: PathBuf, config: Config) -> Self {
        Pool { shards_root, config, mounted: RwLock::new(HashMap::new()) }
    }

    /// Mounts the main shard. Always active, never transient, never subject
    /// to dropGarbage (it's the system of record, not a removable device).
    pub fn mount_main(&self) -> Result<Arc<Store>> {
        let store = Arc::new(Store::open(&self.shards_root, MAIN_SHARD, &self.config)?);
        let info = ShardInfo::new(MAIN_SHARD, true, false);
        self.mounted.write().insert(MAIN_SHARD, Mounted { store: store.clone(), info });
        Ok(store)
    }

    /// Mounts `info`'s shard, opening (or reopening) its on-disk store. Any
    /// kind whose hash in `info.kind_hashes` no longer matches the live
    /// registry gets a dropGarbage pass run against this shard before it is
    /// marked active; `info.kind_hashes` is then refreshed to the
    /// registry's current values so the next mount starts from a clean
    /// baseline. Process restart begins with every non-main shard inactive:
    /// this is the explicit remount spec.md §4.9 requires.
    pub fn mount(&self, mut info: ShardInfo, registry: &Registry) -> Result<Arc<Store>> {
        let store = Arc::new(Store::open(&self.shards_root, info.id, &self.config)?);

        let stale: Vec<KindId> = info
            .kind_hashes
            .iter()
            .filter(|(&kind_id, &hash)| registry.kind_hash_for(kind_id) != Some(hash))
            .map(|(&kind_id, _)| kind_id)
            .collect();
        for kind_id in stale {
            warn!("shard {}: kind {} hash mismatch on mount, dropping garbage", info.id, kind_id);
            drop_garbage(&store, kind_id)?;
        }
        info.kind_hashes = registry.all_kind_hashes();
        info.active = true;

        info!("shard {} mounted ({} kinds tracked)", info.id, info.kind_hashes.len());
        self.mounted.write().insert(info.id, Mounted { store: store.clone(), info });
        Ok(store)
    }

    /// Drops the engine's handle to `shard_id`'s store entirely (device
    /// detach). Leaves the shard's on-disk files untouched; the shard
    /// becomes fully invisible, even with `ignoreInactiveShards=false`,
    /// since there's no longer a mounted store to scan. Distinct from
    /// `set_active(shard_id, false)`, which leaves the shard mounted.
    pub fn unmount(&self, shard_id: u32) -> Result<()> {
        if shard_id == MAIN_SHARD {
            return Err(Error::new(ErrorKind::InvalidShardId, "the main shard cannot be unmounted"));
        }
        let mut mounted = self.mounted.write();
        if mounted.remove(&shard_id).is_none() {
            return Err(Error::new(ErrorKind::InvalidShardId, format!("shard not mounted: {shard_id}")));
        }
        info!("shard {shard_id} unmounted");
        Ok(())
    }

    /// Flips `shard_id`'s `active` flag in place without touching its
    /// mount: the shard's store stays open and its data stays reachable
    /// to a query run with `ignoreInactiveShards=false`. The main shard
    /// is always active and can't be deactivated.
    pub fn set_active(&self, shard_id: u32, active: bool) -> Result<()> {
        if shard_id == MAIN_SHARD && !active {
            return Err(Error::new(ErrorKind::InvalidShardId, "the main shard cannot be made inactive"));
        }
        let mut mounted = self.mounted.write();
        let entry = mounted.get_mut(&shard_id).ok_or_else(|| Error::new(ErrorKind::InvalidShardId, format!("shard not mounted: {shard_id}")))?;
        entry.info.active = active;
        info!("shard {shard_id} marked {}", if active { "active" } else { "inactive" });
        Ok(())
    }

    pub fn is_mounted(&self, shard_id: u32) -> bool {
        self.mounted.read().contains_key(&shard_id)
    }

    pub fn mounted_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.mounted.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Mounted shards whose `active` flag is set. This is what a query
    /// with `ignoreInactiveShards=true` (the default) scans.
    pub fn active_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.mounted.read().iter().filter(|(_, m)| m.info.active).map(|(&id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_active(&self, shard_id: u32) -> bool {
        self.mounted.read().get(&shard_id).map(|m| m.info.active).unwrap_or(false)
    }

    pub fn info(&self, shard_id: u32) -> Option<ShardInfo> {
        self.mounted.read().get(&shard_id).map(|m| m.info.clone())
    }
}

impl ShardSource for Pool {
    fn store(&self, shard_id: u32) -> Result<Arc<Store>> {
        self.mounted
            .read()
            .get(&shard_id)
            .map(|m| m.store.clone())
            .ok_or_else(|| Error::new(ErrorKind::InvalidShardId, format!("shard not mounted: {shard_id}")))
    }
}

/// Deletes every primary record and index entry belonging to `kind_id`
/// within `store`. Run when a remounted shard's recorded kind-hash no
/// longer matches the live registry: the shard's existing entries for that
/// kind were built against a schema that no longer exists, so they're
/// dropped outright and will be rebuilt as that kind's documents are next
/// written, rather than trusted as-is.
fn drop_garbage(store: &Store, kind_id: KindId) -> Result<()> {
    let mut overlay = store.begin();

    for (key, value) in store.scan_cookie(&overlay, cookie::OBJECTS)? {
        if let Ok((header, _)) = RecordHeader::decode(&value) {
            if header.kind_id == kind_id {
                store.delete(&mut overlay, cookie::OBJECTS, &key);
            }
        }
    }

    let prefix = kind_id.to_be_bytes();
    for (key, _) in store.scan_cookie(&overlay, cookie::INDEXES)? {
        if key.starts_with(&prefix) {
            store.delete(&mut overlay, cookie::INDEXES, &key);
        }
    }

    store.commit(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::kind::{IndexDef, IndexProp, Kind};
    use tempfile::tempdir;

    #[test]
    fn mount_main_is_immediately_active() {
        let dir = tempdir().unwrap();
        let pool = Pool::new(dir.path().to_path_buf(), Config::default());
        pool.mount_main().unwrap();
        assert!(pool.is_mounted(MAIN_SHARD));
        assert!(pool.info(MAIN_SHARD).unwrap().active);
    }

    #[test]
    fn mount_then_unmount_roundtrip() {
        let dir = tempdir().unwrap();
        let pool = Pool::new(dir.path().to_path_buf(), Config::default());
        let registry = Registry::new();
        let info = ShardInfo::new(1, false, true);
        pool.mount(info, &registry).unwrap();
        assert!(pool.is_mounted(1));
        pool.unmount(1).unwrap();
        assert!(!pool.is_mounted(1));
    }

    #[test]
    fn unmounting_main_shard_is_rejected() {
        let dir = tempdir().unwrap();
        let pool = Pool::new(dir.path().to_path_buf(), Config::default());
        pool.mount_main().unwrap();
        assert!(pool.unmount(MAIN_SHARD).is_err());
    }

    #[test]
    fn set_active_flips_the_flag_without_unmounting() {
        let dir = tempdir().unwrap();
        let pool = Pool::new(dir.path().to_path_buf(), Config::default());
        let registry = Registry::new();
        pool.mount(ShardInfo::new(2, false, true), &registry).unwrap();
        assert!(pool.is_active(2));

        pool.set_active(2, false).unwrap();
        assert!(pool.is_mounted(2), "shard should stay mounted");
        assert!(!pool.is_active(2));
        assert_eq!(pool.active_ids(), Vec::<u32>::new());

        pool.set_active(2, true).unwrap();
        assert!(pool.is_active(2));
        assert_eq!(pool.active_ids(), vec![2]);
    }

    #[test]
    fn main_shard_cannot_be_made_inactive() {
        let dir = tempdir().unwrap();
        let pool = Pool::new(dir.path().to_path_buf(), Config::default());
        pool.mount_main().unwrap();
        assert!(pool.set_active(MAIN_SHARD, false).is_err());
    }

    #[test]
    fn shard_source_returns_error_for_unmounted_shard() {
        let dir = tempdir().unwrap();
        let pool = Pool::new(dir.path().to_path_buf(), Config::default());
        assert!(pool.store(7).is_err());
    }

    #[test]
    fn stale_kind_hash_triggers_drop_garbage_on_remount() {
        let dir = tempdir().unwrap();
        let config = Config::default();
        let registry = Registry::new();
        let kind = Kind::new("Test:1", "owner").with_index(IndexDef::new("byX", vec![IndexProp::new("x")]));
        let (entry, _) = registry.put_kind(kind, 1000).unwrap();
        let kind_id = entry.kind_id;

        // First mount: the shard has never seen this kind, so nothing stale.
        let pool = Pool::new(dir.path().to_path_buf(), config.clone());
        let store = pool.mount(ShardInfo::new(2, false, true), &registry).unwrap();

        let mut overlay = store.begin();
        let mut header = Vec::new();
        RecordHeader::new(kind_id, 1, false).encode(&mut header);
        header.extend_from_slice(b"body");
        store.put(&mut overlay, cookie::OBJECTS, b"obj1", header);
        store.commit(overlay).unwrap();
        pool.unmount(2).unwrap();

        // Schema change bumps the content hash; info.kind_hashes is now stale.
        let mut info = pool.info(2);
        assert!(info.is_none(), "unmount should drop the in-memory handle");
        let mut stale_info = ShardInfo::new(2, false, true);
        stale_info.kind_hashes.insert(kind_id, entry.content_hash().wrapping_add(1));
        let remounted = pool.mount(stale_info, &registry).unwrap();

        let overlay = remounted.begin();
        let objects = remounted.scan_cookie(&overlay, cookie::OBJECTS).unwrap();
        assert!(objects.is_empty(), "stale kind's primary records should be dropped");

        info = pool.info(2);
        assert_eq!(info.unwrap().kind_hashes.get(&kind_id), Some(&entry.content_hash()));
    }
}
