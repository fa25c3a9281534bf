use std::collections::HashMap;
use std::time::{Instant, SystemTime};

use crate::codec::header::RecordHeader;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, Id, Value, MAIN_SHARD};
use crate::kind::Permission;
use crate::kvs::cookie;
use crate::shard::{Pool, ShardInfo};
use crate::txn::ShardSource;

use super::{decode_record, encode_record, Database, SHARD_INFO_KIND};

const ADMIN_PRINCIPAL: &str = "*";

pub(crate) fn require_admin(caller: &str) -> Result<()> {
    if caller == ADMIN_PRINCIPAL {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::AccessDenied, format!("{caller} is not permitted to perform this operation")))
    }
}

/// Result of a `compact()`/maintenance reclamation pass, kept for
/// `purgeStatus` to report after the fact.
#[derive(Debug, Clone)]
pub struct PurgeReport {
    pub objects_reclaimed: u64,
    pub finished_at: SystemTime,
    pub duration: std::time::Duration,
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub uptime: std::time::Duration,
    pub start_wall_time: SystemTime,
    pub put_count: u64,
    pub get_count: u64,
    pub del_count: u64,
    pub find_count: u64,
    pub search_count: u64,
    pub mounted_shards: Vec<u32>,
    pub object_counts: HashMap<u32, usize>,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub ok: bool,
    pub mounted_shards: Vec<u32>,
    pub last_commit_time: Option<SystemTime>,
}

/// Encodes `info`'s fields into a flat property map; the inverse of
/// `document_to_shard_info`. `kind_hashes` is flattened to a decimal-keyed
/// object since document property keys are strings, not integers.
fn shard_info_to_props(info: &ShardInfo) -> HashMap<String, Value> {
    let mut props = HashMap::new();
    props.insert("active".to_string(), Value::Bool(info.active));
    props.insert("transient".to_string(), Value::Bool(info.transient));
    props.insert("timestamp".to_string(), Value::Int(info.timestamp));
    props.insert("idBase64".to_string(), Value::String(info.id_base64.clone()));
    props.insert("deviceId".to_string(), Value::String(info.device_id.clone()));
    props.insert("deviceUri".to_string(), Value::String(info.device_uri.clone()));
    props.insert("mountPath".to_string(), Value::String(info.mount_path.clone()));
    props.insert("deviceName".to_string(), Value::String(info.device_name.clone()));
    props.insert("databasePath".to_string(), Value::String(info.database_path.clone()));
    props.insert("parentDeviceId".to_string(), Value::String(info.parent_device_id.clone()));
    if let Some(desc) = &info.description {
        props.insert("description".to_string(), Value::String(desc.clone()));
    }
    let hashes: HashMap<String, Value> = info.kind_hashes.iter().map(|(k, v)| (k.to_string(), Value::Int(*v as i64))).collect();
    props.insert("kindHashes".to_string(), Value::Object(hashes));
    props
}

fn props_to_shard_info(shard_id: u32, props: &HashMap<String, Value>) -> ShardInfo {
    let mut info = ShardInfo::new(shard_id, false, false);
    info.active = props.get("active").and_then(|v| if let Value::Bool(b) = v { Some(*b) } else { None }).unwrap_or(false);
    info.transient = props.get("transient").and_then(|v| if let Value::Bool(b) = v { Some(*b) } else { None }).unwrap_or(false);
    info.timestamp = props.get("timestamp").and_then(Value::as_int).unwrap_or(0);
    info.id_base64 = props.get("idBase64").and_then(Value::as_str).unwrap_or_default().to_string();
    info.device_id = props.get("deviceId").and_then(Value::as_str).unwrap_or_default().to_string();
    info.device_uri = props.get("deviceUri").and_then(Value::as_str).unwrap_or_default().to_string();
    info.mount_path = props.get("mountPath").and_then(Value::as_str).unwrap_or_default().to_string();
    info.device_name = props.get("deviceName").and_then(Value::as_str).unwrap_or_default().to_string();
    info.database_path = props.get("databasePath").and_then(Value::as_str).unwrap_or_default().to_string();
    info.parent_device_id = props.get("parentDeviceId").and_then(Value::as_str).unwrap_or_default().to_string();
    info.description = props.get("description").and_then(Value::as_str).map(|s| s.to_string());
    if let Some(Value::Object(hashes)) = props.get("kindHashes") {
        for (k, v) in hashes {
            if let (Ok(kind_id), Some(hash)) = (k.parse::<u32>(), v.as_int()) {
                info.kind_hashes.insert(kind_id, hash as u32);
            }
        }
    }
    info
}

impl Database {
    fn shard_info_id(shard_id: u32) -> Id {
        Id::new(MAIN_SHARD, shard_id as u128)
    }

    /// Writes `info` as a document under the reserved shard-info kind in
    /// the main shard, keyed deterministically by shard id so lookup
    /// never needs an index.
    pub(crate) fn persist_shard_info(&self, info: &ShardInfo) -> Result<()> {
        let entry = self.kinds.require(SHARD_INFO_KIND)?;
        let id = Self::shard_info_id(info.id);
        let txn = self.begin_txn();
        let key = id.to_be_bytes();
        let rev = match txn.get(MAIN_SHARD, cookie::OBJECTS, &key)? {
            Some(bytes) => RecordHeader::decode(&bytes)?.0.rev + 1,
            None => 1,
        };
        let props = shard_info_to_props(info);
        for name in props.keys() {
            entry.tokens.lock().add_token(name)?;
        }
        let bytes = {
            let tokens = entry.tokens.lock();
            encode_record(entry.kind_id, rev, false, &props, &tokens)?
        };
        txn.put(MAIN_SHARD, cookie::OBJECTS, &key, bytes);
        txn.commit()
    }

    fn load_shard_info(&self, shard_id: u32) -> Result<Option<ShardInfo>> {
        let entry = self.kinds.require(SHARD_INFO_KIND)?;
        let txn = self.begin_txn();
        let key = Self::shard_info_id(shard_id).to_be_bytes();
        let bytes = match txn.get(MAIN_SHARD, cookie::OBJECTS, &key)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let (header, props) = {
            let tokens = entry.tokens.lock();
            decode_record(&bytes, &tokens)?
        };
        if header.del {
            return Ok(None);
        }
        Ok(Some(props_to_shard_info(shard_id, &props)))
    }

    /// Every persisted shard registration, mounted or not.
    pub fn load_shard_infos(&self) -> Result<Vec<ShardInfo>> {
        let entry = self.kinds.require(SHARD_INFO_KIND)?;
        let txn = self.begin_txn();
        let mut infos = Vec::new();
        for (key, bytes) in txn.scan_cookie(MAIN_SHARD, cookie::OBJECTS)? {
            let (header, _) = RecordHeader::decode(&bytes)?;
            if header.kind_id != entry.kind_id || header.del {
                continue;
            }
            let id = Id::from_be_bytes(key.as_slice().try_into().map_err(|_| Error::new(ErrorKind::StorageCorrupt, "shard info key is not a 16-byte id"))?);
            let (_, props) = {
                let tokens = entry.tokens.lock();
                decode_record(&bytes, &tokens)?
            };
            infos.push(props_to_shard_info(id.local_id() as u32, &props));
        }
        Ok(infos)
    }

    /// Mounts a shard (device-attach): opens its store, compares recorded
    /// kind hashes against the live registry (triggering a `dropGarbage`
    /// pass on mismatch), then persists the refreshed `ShardInfo`. A
    /// mount changes which shards a query can see, so every armed watch
    /// fires and the search cache is dropped.
    pub fn mount_shard(&self, caller: &str, info: ShardInfo) -> Result<()> {
        require_admin(caller)?;
        self.shards.mount(info.clone(), &self.kinds)?;
        let mounted = self.shards.info(info.id).unwrap_or(info);
        self.persist_shard_info(&mounted)?;
        self.watches.notify_shard_status_changed();
        self.search_cache.invalidate_all();
        Ok(())
    }

    /// Unmounts a shard (device-detach): fully invisible afterward, even
    /// to `ignoreInactiveShards=false`. The shard's on-disk files and
    /// persisted registration are left in place; only the in-memory
    /// handle and the `active` flag go away.
    pub fn unmount_shard(&self, caller: &str, shard_id: u32) -> Result<()> {
        require_admin(caller)?;
        if let Some(mut info) = self.load_shard_info(shard_id)? {
            info.active = false;
            self.shards.unmount(shard_id)?;
            self.persist_shard_info(&info)?;
        } else {
            self.shards.unmount(shard_id)?;
        }
        self.watches.notify_shard_status_changed();
        self.search_cache.invalidate_all();
        Ok(())
    }

    /// Flips a mounted shard's `active` flag without unmounting it: its
    /// data stays on disk and reachable, just excluded from queries that
    /// run with the default `ignoreInactiveShards=true`. This is the
    /// "mark shard inactive" operation spec scenarios exercise, distinct
    /// from `unmount_shard` which drops the shard's mount entirely.
    pub fn set_shard_active(&self, caller: &str, shard_id: u32, active: bool) -> Result<()> {
        require_admin(caller)?;
        self.shards.set_active(shard_id, active)?;
        if let Some(info) = self.shards.info(shard_id) {
            self.persist_shard_info(&info)?;
        }
        self.watches.notify_shard_status_changed();
        self.search_cache.invalidate_all();
        Ok(())
    }

    /// Reserves `count` contiguous object ids on `shard_id` for `kind`,
    /// without writing anything. The caller is expected to `put` each
    /// reserved id explicitly afterward.
    pub fn reserve_ids(&self, caller: &str, kind: &str, shard_id: u32, count: u64) -> Result<Vec<Id>> {
        let entry = self.kinds.require(kind)?;
        if !entry.schema.read().permissions.is_allowed(caller, Permission::Create) {
            return Err(Error::new(ErrorKind::AccessDenied, format!("{caller} may not create {kind}")));
        }
        if !self.shards.is_mounted(shard_id) {
            return Err(Error::new(ErrorKind::InvalidShardId, format!("shard not mounted: {shard_id}")));
        }
        let txn = self.begin_txn();
        let start = txn.reserve_sequence_values(shard_id, "id", count)?;
        txn.commit()?;
        Ok((0..count).map(|i| Id::new(shard_id, (start + i) as u128)).collect())
    }

    /// Forces a checkpoint (best-effort WAL reclamation) on every mounted
    /// shard.
    pub fn compact(&self, caller: &str) -> Result<()> {
        require_admin(caller)?;
        for shard_id in self.shards.mounted_ids() {
            self.shards.store(shard_id)?.compact()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        use std::sync::atomic::Ordering;
        let mounted_shards = self.shards.mounted_ids();
        let mut object_counts = HashMap::new();
        for shard_id in &mounted_shards {
            if let Ok(store) = self.shards.store(*shard_id) {
                object_counts.insert(*shard_id, store.object_count());
            }
        }
        Stats {
            uptime: self.uptime(),
            start_wall_time: self.start_wall_time(),
            put_count: self.put_count.load(Ordering::Relaxed),
            get_count: self.get_count.load(Ordering::Relaxed),
            del_count: self.del_count.load(Ordering::Relaxed),
            find_count: self.find_count.load(Ordering::Relaxed),
            search_count: self.search_count.load(Ordering::Relaxed),
            mounted_shards,
            object_counts,
        }
    }

    pub fn health_check(&self) -> HealthStatus {
        let mounted_shards = self.shards.mounted_ids();
        HealthStatus {
            ok: mounted_shards.contains(&MAIN_SHARD),
            mounted_shards,
            last_commit_time: *self.last_commit_time.read(),
        }
    }

    /// Permanently removes every tombstoned object (and any index entries
    /// it still held under `incDel`) across every mounted shard. Gated to
    /// the admin principal since it reclaims space store-wide, not per
    /// kind.
    pub fn purge(&self, caller: &str) -> Result<PurgeReport> {
        require_admin(caller)?;
        let started = Instant::now();
        let txn = self.begin_txn();
        let mut reclaimed = 0u64;

        for shard_id in self.shards.mounted_ids() {
            for (key, bytes) in txn.scan_cookie(shard_id, cookie::OBJECTS)? {
                let (header, _) = RecordHeader::decode(&bytes)?;
                if !header.del {
                    continue;
                }
                let id = Id::from_be_bytes(key.as_slice().try_into().map_err(|_| Error::new(ErrorKind::StorageCorrupt, "object key is not a 16-byte id"))?);
                if let Some(entry) = self.kinds.entry_for_kind_id(header.kind_id) {
                    let kind_str = entry.schema.read().id.clone();
                    let tombstone = Document { id, kind: kind_str, rev: header.rev, del: true, props: HashMap::new() };
                    let schema = entry.schema.read();
                    txn.apply_index_diffs(shard_id, header.kind_id, &schema.indexes, id, Some(&tombstone), None)?;
                }
                txn.delete(shard_id, cookie::OBJECTS, &key)?;
                reclaimed += 1;
            }
        }
        txn.commit()?;

        let report = PurgeReport { objects_reclaimed: reclaimed, finished_at: SystemTime::now(), duration: started.elapsed() };
        *self.last_purge.write() = Some(report.clone());
        Ok(report)
    }

    pub fn purge_status(&self, caller: &str) -> Result<Option<PurgeReport>> {
        require_admin(caller)?;
        Ok(self.last_purge.read().clone())
    }
}
