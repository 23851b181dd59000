//! Single-writer batches. Records accumulate in memory; `commit` is the only
//! point where snapshots on disk change.

use crate::audit::{AuditLog, IpEdge};
use crate::cache::{load_snapshot, save_snapshot};
use crate::error::Result;
use crate::hosts::{build_rollup, merge_host, HostIndex, HostObservation};
use crate::merge::{merge_maps, merge_record};
use crate::models::{EnrichMap, EnrichRecord};
use crate::store::EnrichStore;
use crate::{now_epoch, now_rfc3339};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Serialize)]
struct UrlAuditLine<'a> {
    ts: &'a str,
    run_id: Uuid,
    module: &'a str,
    url: &'a str,
    #[serde(flatten)]
    record: &'a EnrichRecord,
}

#[derive(Serialize)]
struct HostAuditLine<'a> {
    ts: &'a str,
    run_id: Uuid,
    module: &'a str,
    host: &'a str,
    alive: bool,
    code: Option<u16>,
    size: Option<u64>,
    title: Option<&'a str>,
    scheme: Option<&'a str>,
    ips: &'a [String],
    error: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub module: String,
    pub run_id: Uuid,
    pub records: usize,
    pub new_in_module: usize,
    pub new_in_global: usize,
    pub module_snapshot: PathBuf,
    pub global_snapshot: PathBuf,
}

/// Accumulates URL-level probe results for one module.
pub struct UrlBatch<'a> {
    store: &'a EnrichStore,
    module: String,
    run_id: Uuid,
    module_path: PathBuf,
    updates: EnrichMap,
    audit: AuditLog,
}

impl<'a> UrlBatch<'a> {
    pub(crate) fn new(store: &'a EnrichStore, module: &str, run_id: Uuid) -> Result<Self> {
        let module_path = store.layout().module_snapshot(module)?;
        let audit = AuditLog::open(&store.layout().url_audit())?;
        Ok(UrlBatch { store, module: module.to_string(), run_id, module_path, updates: EnrichMap::new(), audit })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Record one completed probe: append the audit line now, merge in memory.
    pub fn record(&mut self, key: &str, mut rec: EnrichRecord) {
        let ts = now_rfc3339();
        rec.sources.insert(self.module.clone());
        if rec.last_probe.is_none() {
            rec.last_probe = Some(ts.clone());
        }
        if rec.first_seen.is_none() {
            rec.first_seen = Some(now_epoch());
        }
        let line = UrlAuditLine { ts: &ts, run_id: self.run_id, module: &self.module, url: key, record: &rec };
        if let Err(e) = self.audit.append(&line) {
            warn!(url = key, error = %e, "audit append failed");
        }
        let merged = merge_record(self.updates.get(key), rec);
        self.updates.insert(key.to_string(), merged);
    }

    /// Publish the batch: replace the module snapshot, then fold into the
    /// global union. Each file is swapped in with one atomic rename.
    pub fn commit(self) -> Result<CommitSummary> {
        let cache = self.store.cache();
        let global_path = self.store.layout().global_snapshot();

        let mut module_map = (*cache.get(&self.module_path)).clone();
        let new_in_module = merge_maps(&mut module_map, &self.updates);
        save_snapshot(&self.module_path, &module_map)?;
        cache.put(&self.module_path, Arc::new(module_map));

        let mut global = (*cache.get(&global_path)).clone();
        let new_in_global = merge_maps(&mut global, &self.updates);
        save_snapshot(&global_path, &global)?;
        cache.put(&global_path, Arc::new(global));

        info!(module = %self.module, run_id = %self.run_id, records = self.updates.len(), new_in_global, "batch committed");
        Ok(CommitSummary {
            module: self.module,
            run_id: self.run_id,
            records: self.updates.len(),
            new_in_module,
            new_in_global,
            module_snapshot: self.module_path,
            global_snapshot: global_path,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostCommitSummary {
    pub module: String,
    pub run_id: Uuid,
    pub hosts: usize,
    pub distinct_ips: usize,
    pub rollup_buckets: usize,
}

/// Accumulates host-level probe results: host index, IP edges and the
/// module's host-keyed snapshot. Host keys are not folded into the global
/// URL union.
pub struct HostBatch<'a> {
    store: &'a EnrichStore,
    module: String,
    run_id: Uuid,
    module_path: PathBuf,
    index: HostIndex,
    updates: EnrichMap,
    touched: BTreeSet<String>,
    audit: AuditLog,
    edges: AuditLog,
}

impl<'a> HostBatch<'a> {
    pub(crate) fn new(store: &'a EnrichStore, module: &str, run_id: Uuid) -> Result<Self> {
        let layout = store.layout();
        Ok(HostBatch {
            store,
            module: module.to_string(),
            run_id,
            module_path: layout.module_snapshot(module)?,
            index: load_snapshot(&layout.host_index()),
            updates: EnrichMap::new(),
            touched: BTreeSet::new(),
            audit: AuditLog::open(&layout.host_audit())?,
            edges: AuditLog::open(&layout.ip_edges())?,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn len(&self) -> usize {
        self.touched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    pub fn record(&mut self, obs: HostObservation) {
        let now = now_epoch();
        let ts = now_rfc3339();
        let line = HostAuditLine {
            ts: &ts,
            run_id: self.run_id,
            module: &self.module,
            host: &obs.host,
            alive: obs.status.alive,
            code: obs.status.code,
            size: obs.status.size,
            title: obs.status.title.as_deref(),
            scheme: obs.status.scheme.as_deref(),
            ips: &obs.ips,
            error: obs.error.as_deref(),
        };
        if let Err(e) = self.audit.append(&line) {
            warn!(host = %obs.host, error = %e, "host audit append failed");
        }
        for ip in &obs.ips {
            let edge = IpEdge { ts: now, host: &obs.host, ip, event: "resolve" };
            if let Err(e) = self.edges.append(&edge) {
                warn!(host = %obs.host, error = %e, "ip edge append failed");
            }
        }

        let merged = merge_host(self.index.get(&obs.host), &obs, now);
        self.index.insert(obs.host.clone(), merged);

        let rec = EnrichRecord {
            alive: obs.status.alive,
            code: obs.status.code,
            size: obs.status.size,
            title: obs.status.title.clone(),
            content_type: obs.content_type.clone(),
            final_url: obs.final_url.clone().unwrap_or_default(),
            last_probe: Some(ts),
            first_seen: Some(now),
            error: obs.error.clone(),
            ..Default::default()
        }
        .with_source(&self.module);
        let merged = merge_record(self.updates.get(&obs.host), rec);
        self.updates.insert(obs.host.clone(), merged);
        self.touched.insert(obs.host);
    }

    pub fn commit(self) -> Result<HostCommitSummary> {
        let layout = self.store.layout();
        let cache = self.store.cache();

        let mut module_map = (*cache.get(&self.module_path)).clone();
        merge_maps(&mut module_map, &self.updates);
        save_snapshot(&self.module_path, &module_map)?;
        cache.put(&self.module_path, Arc::new(module_map));

        save_snapshot(&layout.host_index(), &self.index)?;
        let rollup = build_rollup(&self.index);
        save_snapshot(&layout.rollup(), &rollup)?;

        let distinct_ips = self
            .touched
            .iter()
            .filter_map(|h| self.index.get(h))
            .flat_map(|r| r.ip_now.iter())
            .collect::<BTreeSet<_>>()
            .len();
        info!(module = %self.module, run_id = %self.run_id, hosts = self.touched.len(), distinct_ips, "host batch committed");
        Ok(HostCommitSummary {
            module: self.module,
            run_id: self.run_id,
            hosts: self.touched.len(),
            distinct_ips,
            rollup_buckets: rollup.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotCache;
    use crate::hosts::HostStatus;

    fn store(dir: &std::path::Path) -> EnrichStore {
        EnrichStore::open(dir, "example.com", Arc::new(SnapshotCache::new())).unwrap()
    }

    #[test]
    fn nothing_is_visible_before_commit() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let mut b = s.url_batch("probe_urls", Uuid::now_v7()).unwrap();
        b.record("https://a.example.com/", EnrichRecord { alive: true, code: Some(200), ..Default::default() });
        assert!(s.read_global().is_empty());
        let audit = std::fs::read_to_string(s.layout().url_audit()).unwrap();
        assert_eq!(audit.lines().count(), 1);
        let summary = b.commit().unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.new_in_global, 1);
        let g = s.read_global();
        assert_eq!(g["https://a.example.com/"].code, Some(200));
        assert!(g["https://a.example.com/"].sources.contains("probe_urls"));
    }

    #[test]
    fn recommit_keeps_first_seen() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let key = "https://a.example.com/";
        let mut b = s.url_batch("probe_urls", Uuid::now_v7()).unwrap();
        b.record(key, EnrichRecord { code: Some(200), first_seen: Some(10), ..Default::default() });
        b.commit().unwrap();
        let mut b = s.url_batch("probe_paths", Uuid::now_v7()).unwrap();
        b.record(key, EnrichRecord { code: Some(500), first_seen: Some(99), ..Default::default() });
        let sum = b.commit().unwrap();
        assert_eq!(sum.new_in_global, 0);
        let g = s.read_global();
        assert_eq!(g[key].first_seen, Some(10));
        assert_eq!(g[key].code, Some(500));
        assert_eq!(g[key].sources.len(), 2);
        assert_eq!(s.read_module("probe_urls").unwrap()[key].code, Some(200));
        let audit = std::fs::read_to_string(s.layout().url_audit()).unwrap();
        assert_eq!(audit.lines().count(), 2);
    }

    #[test]
    fn host_batch_writes_index_edges_and_rollup() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let mut b = s.host_batch("subdomains", Uuid::now_v7()).unwrap();
        b.record(HostObservation {
            host: "a.example.com".into(),
            status: HostStatus { alive: true, code: Some(502), scheme: Some("https".into()), ..Default::default() },
            ips: vec!["10.0.0.1".into(), "10.0.0.2".into()],
            ..Default::default()
        });
        b.record(HostObservation {
            host: "gone.example.com".into(),
            error: Some("dns: no addresses".into()),
            ..Default::default()
        });
        let sum = b.commit().unwrap();
        assert_eq!((sum.hosts, sum.distinct_ips, sum.rollup_buckets), (2, 2, 3));
        let idx = s.read_host_index();
        assert_eq!(idx["a.example.com"].ip_hist, vec!["10.0.0.1", "10.0.0.2"]);
        let edges = std::fs::read_to_string(s.layout().ip_edges()).unwrap();
        assert_eq!(edges.lines().count(), 2);
        assert_eq!(s.read_rollup()[0].alive, 1);
        assert!(s.read_global().is_empty());
        assert!(s.read_module("subdomains").unwrap()["a.example.com"].alive);
    }
}
