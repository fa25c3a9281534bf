use std::path::PathBuf;

/// Engine-wide tunables, owned by the `Database` instance and passed by
/// reference into every subsystem that needs one. Replaces the teacher's
/// process-wide static option structs with an instance-owned value.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_path: PathBuf,

    /// Bound on the search cache's total entry count.
    pub cache_size: usize,
    pub memory_limit: usize,

    /// WAL is flushed to a checkpoint after this many entries.
    pub wal_checkpoint_entries: usize,
    /// WAL is flushed to a checkpoint after this many seconds, whichever
    /// comes first.
    pub wal_checkpoint_interval_secs: u64,

    /// Worker pool size for the search cursor's parallel document loads.
    pub search_worker_threads: usize,
    /// Bound on a search cursor's in-memory candidate-id materialization.
    pub search_max_materialized_ids: usize,

    /// Page size for durable sequence allocation: a restart may skip up to
    /// `sequence_page_size - 1` values.
    pub sequence_page_size: u64,

    /// Default per-kind quota (bytes of header+body across all live
    /// records of the kind), applied when a kind doesn't set its own.
    pub default_kind_quota: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./data"),
            cache_size: 1000,
            memory_limit: 100 * 1024 * 1024,
            wal_checkpoint_entries: 1000,
            wal_checkpoint_interval_secs: 60,
            search_worker_threads: num_cpus::get().max(1).min(8),
            search_max_materialized_ids: 10_000,
            sequence_page_size: 100,
            default_kind_quota: 10 * 1024 * 1024,
        }
    }
}
