use crate::batch::{HostBatch, UrlBatch};
use crate::cache::{load_snapshot, save_snapshot, SnapshotCache};
use crate::error::Result;
use crate::hosts::{build_rollup, HostIndex, IpRollup};
use crate::layout::ScopeLayout;
use crate::merge::merge_record;
use crate::models::EnrichMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Enrichment data for one scope. Reads go through the shared snapshot cache;
/// writes go through a batch and its commit.
pub struct EnrichStore {
    layout: ScopeLayout,
    cache: Arc<SnapshotCache>,
}

impl EnrichStore {
    pub fn open(outputs: &Path, scope: &str, cache: Arc<SnapshotCache>) -> Result<Self> {
        Ok(EnrichStore { layout: ScopeLayout::new(outputs, scope)?, cache })
    }

    pub fn layout(&self) -> &ScopeLayout {
        &self.layout
    }

    pub(crate) fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn read_module(&self, module: &str) -> Result<Arc<EnrichMap>> {
        Ok(self.cache.get(&self.layout.module_snapshot(module)?))
    }

    pub fn read_global(&self) -> Arc<EnrichMap> {
        self.cache.get(&self.layout.global_snapshot())
    }

    /// Global snapshot overlaid with one module's own records.
    pub fn read_union(&self, module: &str) -> Result<EnrichMap> {
        let module_map = self.read_module(module)?;
        let mut out = (*self.read_global()).clone();
        for (k, rec) in module_map.iter() {
            let merged = merge_record(out.get(k), rec.clone());
            out.insert(k.clone(), merged);
        }
        Ok(out)
    }

    pub fn url_batch(&self, module: &str, run_id: Uuid) -> Result<UrlBatch<'_>> {
        UrlBatch::new(self, module, run_id)
    }

    pub fn host_batch(&self, module: &str, run_id: Uuid) -> Result<HostBatch<'_>> {
        HostBatch::new(self, module, run_id)
    }

    pub fn read_host_index(&self) -> HostIndex {
        load_snapshot(&self.layout.host_index())
    }

    pub fn read_rollup(&self) -> Vec<IpRollup> {
        load_snapshot(&self.layout.rollup())
    }

    /// Recompute the per-IP rollup from the host index and persist it.
    pub fn rebuild_rollup(&self) -> Result<Vec<IpRollup>> {
        let rollup = build_rollup(&self.read_host_index());
        save_snapshot(&self.layout.rollup(), &rollup)?;
        info!(scope = self.layout.scope(), buckets = rollup.len(), "rollup rebuilt");
        Ok(rollup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichRecord;

    fn store(dir: &Path) -> EnrichStore {
        EnrichStore::open(dir, "example.com", Arc::new(SnapshotCache::new())).unwrap()
    }

    #[test]
    fn union_prefers_module_records() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let mut g = EnrichMap::new();
        g.insert("https://a/".into(), EnrichRecord { code: Some(200), first_seen: Some(1), ..Default::default() }.with_source("probe_urls"));
        g.insert("https://b/".into(), EnrichRecord { code: Some(404), ..Default::default() });
        save_snapshot(&s.layout().global_snapshot(), &g).unwrap();
        let mut m = EnrichMap::new();
        m.insert("https://a/".into(), EnrichRecord { code: Some(403), first_seen: Some(9), ..Default::default() }.with_source("probe_paths"));
        save_snapshot(&s.layout().module_snapshot("probe_paths").unwrap(), &m).unwrap();

        let u = s.read_union("probe_paths").unwrap();
        assert_eq!(u.len(), 2);
        assert_eq!(u["https://a/"].code, Some(403));
        assert_eq!(u["https://a/"].first_seen, Some(1));
        assert_eq!(u["https://a/"].sources.len(), 2);
    }

    #[test]
    fn empty_scope_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.read_global().is_empty());
        assert!(s.read_union("probe_urls").unwrap().is_empty());
        assert!(s.read_host_index().is_empty());
        assert!(s.read_rollup().is_empty());
    }
}
