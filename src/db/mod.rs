pub mod admin;
pub mod crud;
pub mod dump;
pub mod query_ops;
pub mod schema;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use log::info;
use parking_lot::RwLock;

use crate::codec::header::RecordHeader;
use crate::codec::{decode_value, encode_value};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::Value;
use crate::kind::{Kind, KindId, Registry, TokenMap};
use crate::profile::Auditor;
use crate::search::SearchCache;
use crate::shard::Pool;
use crate::txn::{ShardSource, Transaction};
use crate::watch::WatchRegistry;

/// Reserved kind holding one document per shard's `ShardInfo` in the main
/// shard's object store — no indexes, since lookup is always by shard id
/// embedded in the document's own `_id`.
pub(crate) const SHARD_INFO_KIND: &str = "com.jsondb.ShardInfo:1";

/// Ties every subsystem together: the shard pool, the kind registry, the
/// watch and search-cache layers, and a thin profiling auditor, plus the
/// monitoring counters `stats`/`healthCheck` report on. One `Database`
/// owns exactly one storage path.
pub struct Database {
    pub(crate) config: Config,
    pub(crate) shards: Arc<Pool>,
    pub(crate) kinds: Registry,
    pub(crate) watches: WatchRegistry,
    pub(crate) search_cache: SearchCache,
    pub(crate) profiler: Auditor,

    start_time: Instant,
    start_wall: SystemTime,

    pub(crate) put_count: AtomicU64,
    pub(crate) get_count: AtomicU64,
    pub(crate) del_count: AtomicU64,
    pub(crate) find_count: AtomicU64,
    pub(crate) search_count: AtomicU64,

    pub(crate) last_commit_time: RwLock<Option<SystemTime>>,
    pub(crate) last_checkpoint_time: RwLock<Option<SystemTime>>,
    pub(crate) last_purge: RwLock<Option<crate::db::admin::PurgeReport>>,
}

impl Database {
    /// Opens (or creates) the database at `config.storage_path`, mounting
    /// the main shard. Non-main shards are never auto-mounted — per-process
    /// restart, an operator or administrator must `mount_shard` them again.
    pub fn open(config: Config) -> Result<Self> {
        let shards = Arc::new(Pool::new(config.storage_path.clone(), config.clone()));
        shards.mount_main()?;

        let kinds = Registry::new();
        kinds.put_kind(Kind::new(SHARD_INFO_KIND, "system"), config.default_kind_quota)?;

        let db = Database {
            config: config.clone(),
            shards,
            kinds,
            watches: WatchRegistry::new(),
            search_cache: SearchCache::new(config.cache_size),
            profiler: Auditor::new(256),
            start_time: Instant::now(),
            start_wall: SystemTime::now(),
            put_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            find_count: AtomicU64::new(0),
            search_count: AtomicU64::new(0),
            last_commit_time: RwLock::new(None),
            last_checkpoint_time: RwLock::new(None),
            last_purge: RwLock::new(None),
        };
        info!("database opened at {:?}", db.config.storage_path);
        Ok(db)
    }

    pub(crate) fn begin_txn(&self) -> Transaction {
        Transaction::begin(self.shards.clone() as Arc<dyn ShardSource>)
    }

    pub(crate) fn note_commit(&self) {
        *self.last_commit_time.write() = Some(SystemTime::now());
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn start_wall_time(&self) -> SystemTime {
        self.start_wall
    }
}

/// Encodes a document's header plus property body for storage in the
/// `objects` cookie. Properties are wrapped in a `Value::Object` so the
/// same codec path used for nested object properties handles the
/// top-level document body too.
pub(crate) fn encode_record(
    kind_id: KindId,
    rev: i64,
    del: bool,
    props: &HashMap<String, Value>,
    tokens: &TokenMap,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    RecordHeader::new(kind_id, rev, del).encode(&mut out);
    encode_value(&mut out, &Value::Object(props.clone()), tokens)?;
    Ok(out)
}

pub(crate) fn decode_record(bytes: &[u8], tokens: &TokenMap) -> Result<(RecordHeader, HashMap<String, Value>)> {
    let (header, used) = RecordHeader::decode(bytes)?;
    let (value, _) = decode_value(&bytes[used..], tokens)?;
    let props = value.as_object().cloned().unwrap_or_default();
    Ok((header, props))
}
