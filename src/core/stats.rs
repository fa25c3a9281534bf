use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::search::CacheStats;

/// Snapshot of engine-wide counters, returned by the `stats` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub uptime_secs: u64,
    pub start_time: SystemTime,

    pub shard_count: usize,
    pub active_shard_count: usize,
    pub kind_count: usize,
    pub object_count: usize,
    pub deleted_object_count: usize,
    pub index_entry_count: u64,

    pub wal_size_bytes: u64,
    pub checkpoint_size_bytes: u64,

    pub search_cache: CacheStats,
    pub watch_count: usize,

    pub last_checkpoint_time: Option<SystemTime>,
    pub last_commit_time: Option<SystemTime>,
}

/// Health check status, following the usual healthy/degraded/unhealthy
/// tri-state with a reason string attached to the non-healthy cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub timestamp: SystemTime,
}
