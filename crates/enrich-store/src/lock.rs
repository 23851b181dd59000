//! Advisory run tracking. Neither mechanism here is a cross-process mutex; they
//! only keep an operator from starting the same batch twice by accident.

use crate::error::{Result, StoreError};
use crate::layout::ScopeLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub scope: String,
    pub module: String,
    pub pid: u32,
    pub started_at: String,
}

/// In-process registry of active probe runs, owned by the application context.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    active: Arc<Mutex<BTreeMap<(String, String), RunInfo>>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), RunInfo>> {
        match self.active.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a run; returns false if one is already active for the pair.
    fn try_register(&self, info: RunInfo) -> bool {
        let key = (info.scope.clone(), info.module.clone());
        let mut m = self.map();
        if m.contains_key(&key) {
            return false;
        }
        m.insert(key, info);
        true
    }

    fn unregister(&self, scope: &str, module: &str, run_id: Uuid) {
        let mut m = self.map();
        let key = (scope.to_string(), module.to_string());
        if m.get(&key).map(|r| r.run_id == run_id).unwrap_or(false) {
            m.remove(&key);
        }
    }

    pub fn is_active(&self, scope: &str, module: &str) -> bool {
        self.map().contains_key(&(scope.to_string(), module.to_string()))
    }

    pub fn active(&self) -> Vec<RunInfo> {
        self.map().values().cloned().collect()
    }
}

/// Held for the duration of a batch; removes its marker and registry entry on drop.
pub struct ProbeLock {
    registry: ProbeRegistry,
    info: RunInfo,
    marker: PathBuf,
}

impl ProbeLock {
    /// Claim (scope, module). Refuses when the registry already tracks a run
    /// or a marker file is present, unless `force` is set.
    pub fn acquire(layout: &ScopeLayout, module: &str, registry: &ProbeRegistry, run_id: Uuid, force: bool) -> Result<Self> {
        let marker = layout.lock_marker(module)?;
        let busy = |reason: &str| StoreError::Busy {
            scope: layout.scope().to_string(),
            module: module.to_string(),
            reason: reason.to_string(),
        };
        if marker.exists() {
            if !force {
                return Err(busy("lock marker present"));
            }
            warn!(marker = %marker.display(), "overriding stale lock marker");
        }
        let info = RunInfo {
            run_id,
            scope: layout.scope().to_string(),
            module: module.to_string(),
            pid: std::process::id(),
            started_at: crate::now_rfc3339(),
        };
        if !registry.try_register(info.clone()) {
            return Err(busy("run registered in this process"));
        }
        let body = serde_json::to_vec(&info).unwrap_or_default();
        if let Err(e) = reconkit_core::atomic_write(&marker, &body) {
            registry.unregister(&info.scope, &info.module, run_id);
            return Err(StoreError::io(&marker, e));
        }
        debug!(scope = %info.scope, module, %run_id, "probe lock acquired");
        Ok(ProbeLock { registry: registry.clone(), info, marker })
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }
}

impl Drop for ProbeLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.marker);
        self.registry.unregister(&self.info.scope, &self.info.module, self.info.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ScopeLayout::new(dir.path(), "example.com").unwrap();
        let reg = ProbeRegistry::new();
        let lock = ProbeLock::acquire(&layout, "probe_urls", &reg, Uuid::now_v7(), false).unwrap();
        assert!(reg.is_active("example.com", "probe_urls"));
        assert!(layout.lock_marker("probe_urls").unwrap().exists());
        let again = ProbeLock::acquire(&layout, "probe_urls", &reg, Uuid::now_v7(), false);
        assert!(matches!(again, Err(StoreError::Busy { .. })));
        // other modules are independent
        assert!(ProbeLock::acquire(&layout, "probe_paths", &reg, Uuid::now_v7(), false).is_ok());
        drop(lock);
        assert!(!reg.is_active("example.com", "probe_urls"));
        assert!(!layout.lock_marker("probe_urls").unwrap().exists());
    }

    #[test]
    fn stale_marker_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ScopeLayout::new(dir.path(), "example.com").unwrap();
        let marker = layout.lock_marker("probe_urls").unwrap();
        fs::create_dir_all(marker.parent().unwrap()).unwrap();
        fs::write(&marker, "{}").unwrap();
        let reg = ProbeRegistry::new();
        assert!(ProbeLock::acquire(&layout, "probe_urls", &reg, Uuid::now_v7(), false).is_err());
        assert!(!reg.is_active("example.com", "probe_urls"));
        let lock = ProbeLock::acquire(&layout, "probe_urls", &reg, Uuid::now_v7(), true).unwrap();
        assert_eq!(reg.active().len(), 1);
        assert_eq!(lock.info().module, "probe_urls");
    }
}
