use std::collections::HashMap;

use crate::kind::KindId;

/// Device and lifecycle metadata for one shard, mirroring `MojDbShardInfo`'s
/// field set. The engine's main shard (id 0) is always implicitly mounted
/// and active; every other shard starts inactive on process restart and
/// requires an explicit `Pool::mount` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardInfo {
    pub id: u32,
    pub active: bool,
    pub transient: bool,
    pub timestamp: i64,
    pub id_base64: String,
    pub device_id: String,
    pub device_uri: String,
    pub mount_path: String,
    pub device_name: String,
    pub database_path: String,
    pub parent_device_id: String,
    /// Human-readable label copied from the device, cosmetic: surfaced in
    /// `stats`/`dump` output only, never compared during mount.
    pub description: Option<String>,
    /// Kind id -> content hash as last observed mounted on this device.
    /// Compared against the live registry on mount to decide which kinds
    /// need a `dropGarbage` pass.
    pub kind_hashes: HashMap<KindId, u32>,
}

impl ShardInfo {
    pub fn new(id: u32, active: bool, transient: bool) -> Self {
        ShardInfo {
            id,
            active,
            transient,
            timestamp: 0,
            id_base64: String::new(),
            device_id: String::new(),
            device_uri: String::new(),
            mount_path: String::new(),
            device_name: String::new(),
            database_path: String::new(),
            parent_device_id: String::new(),
            description: None,
            kind_hashes: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_shard_info_starts_inactive_with_no_kind_hashes() {
        let info = ShardInfo::new(3, false, true);
        assert_eq!(info.id, 3);
        assert!(!info.active);
        assert!(info.transient);
        assert!(info.kind_hashes.is_empty());
    }
}
