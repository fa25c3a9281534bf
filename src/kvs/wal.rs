use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::kvs::layout::ShardLayout;

#[derive(Debug, Clone, Copy)]
pub enum SyncMode {
    Immediate,
    Batch,
}

/// A single write to the shard's keyspace. `value: None` records a
/// deletion so replay can distinguish "never written" from "tombstoned".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// Length-prefixed bincode WAL, fsynced immediately or every megabyte
/// depending on `sync_mode`.
pub struct Wal {
    file: File,
    position: u64,
    sequence: u64,
    sync_mode: SyncMode,
}

impl Wal {
    pub fn open(layout: &ShardLayout, sequence: u64) -> Result<Self> {
        let path = layout.wal_path(sequence);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Wal { file, position: 0, sequence, sync_mode: SyncMode::Batch })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn append_batch(&mut self, entries: &[WalEntry]) -> Result<()> {
        for entry in entries {
            let data = bincode::serialize(entry)?;
            let len = data.len() as u32;
            self.file.write_all(&len.to_le_bytes())?;
            self.file.write_all(&data)?;
            self.position += 4 + data.len() as u64;
        }
        match self.sync_mode {
            SyncMode::Immediate => self.file.sync_all()?,
            SyncMode::Batch if self.position / (1024 * 1024) > 0 => self.file.sync_all()?,
            _ => {}
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replays every entry in the WAL file for `sequence`. Returns an
    /// empty vec if the file doesn't exist yet (fresh shard).
    pub fn replay(layout: &ShardLayout, sequence: u64) -> Result<Vec<WalEntry>> {
        let path = layout.wal_path(sequence);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(path)?;
        let mut entries = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            if file.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)?;
            entries.push(bincode::deserialize(&buf)?);
        }
        Ok(entries)
    }

    /// Closes the current segment and opens a fresh one at `new_sequence`,
    /// called right after a checkpoint so old WAL segments can be deleted.
    pub fn rotate(&mut self, layout: &ShardLayout, new_sequence: u64) -> Result<()> {
        self.sync()?;
        *self = Wal::open(layout, new_sequence)?;
        Ok(())
    }
}
