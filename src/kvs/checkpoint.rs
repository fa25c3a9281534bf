use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::kvs::engine::KvPair;
use crate::kvs::layout::ShardLayout;

/// A full snapshot of a shard's keyspace plus the WAL sequence it was taken
/// at, so recovery knows which WAL segment to replay from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub wal_sequence: u64,
    pub entries: Vec<KvPair>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(wal_sequence: u64, entries: Vec<KvPair>) -> Self {
        Checkpoint { wal_sequence, entries, timestamp: Utc::now() }
    }

    pub fn load(layout: &ShardLayout) -> Result<Option<Self>> {
        let path = layout.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        Ok(Some(bincode::deserialize(&data)?))
    }

    pub fn save(&self, layout: &ShardLayout) -> Result<()> {
        let data = bincode::serialize(self)?;
        fs::write(layout.checkpoint_path(), data)?;
        Ok(())
    }
}
