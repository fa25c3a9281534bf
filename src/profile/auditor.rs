use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::core::error::{Error, ErrorKind, Result};

/// One timed operation recorded against a caller, grounded on the
/// original profiling engine's per-call stat payload (category, method,
/// duration). Kept thin: no query/request echoing, just enough to answer
/// "what did this caller do, and how long did it take".
#[derive(Debug, Clone)]
pub struct StatEntry {
    pub category: String,
    pub method: String,
    pub duration: Duration,
    pub timestamp: SystemTime,
}

/// Per-caller operation timing sink. Profiling is off by default for
/// every caller; `set_enabled` turns it on or off, admin-gated the same
/// way the original's `profile(application, enable)` call is: a caller
/// may toggle or read its own data, and the wildcard principal `"*"` (the
/// same admin convention `kind::PermissionMatrix` uses) may act on
/// anyone's.
pub struct Auditor {
    enabled: RwLock<HashSet<String>>,
    stats: RwLock<HashMap<String, Vec<StatEntry>>>,
    max_entries_per_caller: usize,
}

const ADMIN_PRINCIPAL: &str = "*";

impl Auditor {
    pub fn new(max_entries_per_caller: usize) -> Self {
        Auditor {
            enabled: RwLock::new(HashSet::new()),
            stats: RwLock::new(HashMap::new()),
            max_entries_per_caller,
        }
    }

    fn check_access(requester: &str, target: &str) -> Result<()> {
        if requester == target || requester == ADMIN_PRINCIPAL {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::AppProfileAdminRestriction,
                format!("{requester} is not permitted to act on profiling data for {target}"),
            ))
        }
    }

    /// Enables or disables profiling for `target`. Disabling also drops
    /// any stats already collected for it.
    pub fn set_enabled(&self, requester: &str, target: &str, enable: bool) -> Result<()> {
        Self::check_access(requester, target)?;
        if enable {
            self.enabled.write().insert(target.to_string());
        } else {
            self.enabled.write().remove(target);
            self.stats.write().remove(target);
        }
        Ok(())
    }

    pub fn is_enabled(&self, caller: &str) -> bool {
        self.enabled.read().contains(caller)
    }

    /// Records one timed operation for `caller`. A no-op when profiling
    /// isn't enabled for them, so callers can record unconditionally on
    /// every operation without checking `is_enabled` themselves.
    pub fn record(&self, caller: &str, category: &str, method: &str, duration: Duration) {
        if !self.is_enabled(caller) {
            return;
        }
        let mut stats = self.stats.write();
        let entries = stats.entry(caller.to_string()).or_default();
        entries.push(StatEntry {
            category: category.to_string(),
            method: method.to_string(),
            duration,
            timestamp: SystemTime::now(),
        });
        if entries.len() > self.max_entries_per_caller {
            entries.remove(0);
        }
    }

    /// Returns `target`'s recorded stats. `AppProfileDisabled` if
    /// profiling was never enabled for `target`, `AppProfileAdminRestriction`
    /// if `requester` isn't `target` or the admin principal.
    pub fn snapshot(&self, requester: &str, target: &str) -> Result<Vec<StatEntry>> {
        Self::check_access(requester, target)?;
        if !self.is_enabled(target) {
            return Err(Error::new(ErrorKind::AppProfileDisabled, format!("profiling is not enabled for {target}")));
        }
        Ok(self.stats.read().get(target).cloned().unwrap_or_default())
    }
}

impl Default for Auditor {
    fn default() -> Self {
        Auditor::new(256)
    }
}
