use crate::error::{Result, StoreError};
use crate::models::EnrichMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Load a JSON snapshot. Missing or corrupt files load as the default value.
pub fn load_snapshot<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "snapshot unreadable, treating as empty");
            }
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot corrupt, treating as empty");
            T::default()
        }
    }
}

/// Persist a snapshot with an atomic replace.
pub fn save_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode { path: path.to_path_buf(), source })?;
    reconkit_core::atomic_write(path, &bytes).map_err(|e| StoreError::io(path, e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

fn stamp(path: &Path) -> Option<Stamp> {
    let md = fs::metadata(path).ok()?;
    Some(Stamp { modified: md.modified().ok()?, len: md.len() })
}

/// Read-through cache of parsed snapshots, keyed by path and invalidated when
/// the file's modification time or length changes.
#[derive(Default)]
pub struct SnapshotCache {
    entries: Mutex<HashMap<PathBuf, (Stamp, Arc<EnrichMap>)>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Arc<EnrichMap> {
        let Some(st) = stamp(path) else {
            self.lock().remove(path);
            return Arc::new(EnrichMap::new());
        };
        if let Some((cached, map)) = self.lock().get(path) {
            if *cached == st {
                return map.clone();
            }
        }
        debug!(path = %path.display(), "loading snapshot");
        let map = Arc::new(load_snapshot::<EnrichMap>(path));
        self.lock().insert(path.to_path_buf(), (st, map.clone()));
        map
    }

    /// Record a map that was just written to `path`.
    pub fn put(&self, path: &Path, map: Arc<EnrichMap>) {
        match stamp(path) {
            Some(st) => {
                self.lock().insert(path.to_path_buf(), (st, map));
            }
            None => {
                self.lock().remove(path);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, (Stamp, Arc<EnrichMap>)>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichRecord;

    #[test]
    fn missing_and_corrupt_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x_enrich.json");
        assert!(load_snapshot::<EnrichMap>(&p).is_empty());
        fs::write(&p, "{not json").unwrap();
        assert!(load_snapshot::<EnrichMap>(&p).is_empty());
        let cache = SnapshotCache::new();
        assert!(cache.get(&p).is_empty());
    }

    #[test]
    fn unchanged_file_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x_enrich.json");
        let mut m = EnrichMap::new();
        m.insert("https://a/".into(), EnrichRecord { code: Some(200), ..Default::default() });
        save_snapshot(&p, &m).unwrap();
        let cache = SnapshotCache::new();
        let first = cache.get(&p);
        let second = cache.get(&p);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn rewritten_file_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x_enrich.json");
        save_snapshot(&p, &EnrichMap::new()).unwrap();
        let cache = SnapshotCache::new();
        assert!(cache.get(&p).is_empty());
        let mut m = EnrichMap::new();
        m.insert("https://b/".into(), EnrichRecord::default());
        save_snapshot(&p, &m).unwrap();
        assert_eq!(cache.get(&p).len(), 1);
    }
}
