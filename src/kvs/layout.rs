use std::fs;
use std::path::PathBuf;

use crate::core::error::Result;

/// On-disk directory layout for one shard: a WAL directory, a checkpoint
/// file, and the `.lock` file guarding single-writer access.
#[derive(Debug, Clone)]
pub struct ShardLayout {
    pub base_dir: PathBuf,
    pub wal_dir: PathBuf,
}

impl ShardLayout {
    pub fn new(shards_root: &std::path::Path, shard_id: u32) -> Result<Self> {
        let base_dir = shards_root.join(format!("shard-{shard_id:08x}"));
        let wal_dir = base_dir.join("wal");
        fs::create_dir_all(&wal_dir)?;
        Ok(ShardLayout { base_dir, wal_dir })
    }

    pub fn wal_path(&self, sequence: u64) -> PathBuf {
        self.wal_dir.join(format!("wal_{sequence:08}.log"))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.base_dir.join("checkpoint.bin")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }
}
