//! Path fan-out: every live host crossed with every path spec.

use crate::fetch::{observe_request, RequestSpec};
use crate::options::{build_client, ProbeOptions};
use crate::url_probe::error_text;
use crate::{BatchStats, StopSignal};
use anyhow::{anyhow, bail, Context, Result};
use enrich_store::{EnrichMap, EnrichRecord, UrlBatch};
use reconkit_core::canon::normalize_path;
use reconkit_core::{canonicalize, HostLimiter};
use reqwest::Method;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

/// Methods that may be sent without explicit permission.
pub const SAFE_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathSpec {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

impl PathSpec {
    fn normalized(mut self) -> Self {
        let p = self.path.trim();
        self.path = if p.is_empty() || p == "." { "/".into() } else { normalize_path(p) };
        let m = self.method.trim().to_ascii_uppercase();
        self.method = if m.is_empty() { default_method() } else { m };
        self.body = self.body.filter(|b| !b.is_empty());
        self
    }

    pub fn is_safe(&self) -> bool {
        SAFE_METHODS.contains(&self.method.as_str())
    }

    /// Build the request. A body of `@file` is read from disk; JSON-looking
    /// and form-looking bodies get a matching content type.
    pub fn request(&self) -> Result<RequestSpec> {
        let method = Method::from_bytes(self.method.as_bytes()).map_err(|_| anyhow!("invalid method {:?}", self.method))?;
        let (body, content_type) = match self.body.as_deref() {
            None => (None, None),
            Some(b) if b.starts_with('@') => {
                let bytes = std::fs::read(&b[1..]).with_context(|| format!("read body file {}", &b[1..]))?;
                (Some(bytes), None)
            }
            Some(b) => {
                let t = b.trim_start();
                let ct = if t.starts_with('{') || t.starts_with('[') {
                    Some("application/json")
                } else if b.contains('=') && b.contains('&') && !b.chars().any(char::is_whitespace) {
                    Some("application/x-www-form-urlencoded")
                } else {
                    None
                };
                (Some(b.as_bytes().to_vec()), ct)
            }
        };
        Ok(RequestSpec { method, body, content_type })
    }
}

/// Load path specs from NDJSON (`.ndjson`, `.jsonl`, `.json`) or CSV
/// (`path,method[,body]`, no header).
pub fn load_path_specs(path: &Path) -> Result<Vec<PathSpec>> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    let specs = if matches!(ext.as_str(), "ndjson" | "jsonl" | "json") {
        let br = BufReader::new(File::open(path).with_context(|| format!("open {}", path.display()))?);
        let mut out = Vec::new();
        for (i, line) in br.lines().enumerate() {
            let line = line?;
            let t = line.trim();
            if t.is_empty() {
                continue;
            }
            match serde_json::from_str::<PathSpec>(t) {
                Ok(s) => out.push(s),
                Err(e) => warn!(line = i + 1, error = %e, "skipping invalid path spec"),
            }
        }
        out
    } else {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("open {}", path.display()))?;
        let mut out = Vec::new();
        for rec in rdr.records() {
            let rec = rec?;
            let p = rec.get(0).unwrap_or("").trim();
            if p.starts_with('#') || (p.is_empty() && rec.len() <= 1) {
                continue;
            }
            out.push(PathSpec {
                path: p.to_string(),
                method: rec.get(1).unwrap_or("GET").to_string(),
                body: rec.get(2).map(str::to_string),
            });
        }
        out
    };
    Ok(one_per_path(specs.into_iter().map(PathSpec::normalized).collect()))
}

/// Results are keyed by URL, so a path may appear once. The first spec for a
/// path is kept.
fn one_per_path(specs: Vec<PathSpec>) -> Vec<PathSpec> {
    let mut seen = BTreeSet::new();
    specs
        .into_iter()
        .filter(|s| {
            let fresh = seen.insert(s.path.clone());
            if !fresh {
                warn!(path = %s.path, method = %s.method, "duplicate path spec dropped");
            }
            fresh
        })
        .collect()
}

/// Base URLs (`scheme://host[:port]`) of hosts whose recorded code is in
/// `statuses`, taken from a host-keyed enrichment snapshot.
pub fn live_bases(hosts: &EnrichMap, statuses: &[u16]) -> Vec<String> {
    let mut out = BTreeSet::new();
    for (key, rec) in hosts {
        let Some(code) = rec.code else { continue };
        if !statuses.contains(&code) {
            continue;
        }
        let candidate = if rec.final_url.is_empty() { format!("https://{key}") } else { rec.final_url.clone() };
        let Ok(u) = Url::parse(&candidate) else { continue };
        let Some(host) = u.host_str() else { continue };
        let base = match u.port() {
            Some(p) => format!("{}://{}:{}", u.scheme(), host, p),
            None => format!("{}://{}", u.scheme(), host),
        };
        out.insert(base);
    }
    out.into_iter().collect()
}

/// Probe every base crossed with every spec. Unsafe methods are refused
/// unless `allow_unsafe` is set. Records are keyed by URL, so only the first
/// spec for each path is sent. Returns the stats and the probed URL list.
pub async fn probe_paths(
    bases: Vec<String>,
    specs: Vec<PathSpec>,
    opts: ProbeOptions,
    allow_unsafe: bool,
    batch: &mut UrlBatch<'_>,
    stop: &StopSignal,
) -> Result<(BatchStats, Vec<String>)> {
    let specs = one_per_path(specs);
    let unsafe_methods: BTreeSet<&str> = specs.iter().filter(|s| !s.is_safe()).map(|s| s.method.as_str()).collect();
    if !unsafe_methods.is_empty() && !allow_unsafe {
        bail!("state-changing methods present ({}); explicit permission required", unsafe_methods.into_iter().collect::<Vec<_>>().join(","));
    }
    let mut requests = Vec::with_capacity(specs.len());
    for s in &specs {
        requests.push((s.path.clone(), Arc::new(s.request()?)));
    }

    let client = build_client(&opts)?;
    let global = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let limiter = HostLimiter::new(opts.per_host.unwrap_or(8));
    let opts = Arc::new(opts);
    let total = bases.len() * requests.len();
    let mut stats = BatchStats { total, ..Default::default() };
    let mut urls = Vec::with_capacity(total);
    let (tx, mut rx) = mpsc::channel::<(String, EnrichRecord)>(opts.concurrency.max(1) * 2);

    for base in &bases {
        let host = Url::parse(base).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_else(|| base.clone());
        for (path, req) in &requests {
            let url = format!("{}{}", base.trim_end_matches('/'), path);
            urls.push(url.clone());
            let (tx, client, opts, req, global, limiter, stop, host) =
                (tx.clone(), client.clone(), opts.clone(), req.clone(), global.clone(), limiter.clone(), stop.clone(), host.clone());
            tokio::spawn(async move {
                let Ok(_host_permit) = limiter.acquire(&host).await else { return };
                let Ok(_global_permit) = global.acquire_owned().await else { return };
                if stop.is_stopped() {
                    return;
                }
                let mut rec = None;
                let mut last_err = String::new();
                for attempt in 0..=opts.retries {
                    match observe_request(&client, &url, &req, &opts).await {
                        Ok(obs) => {
                            rec = Some(obs.into_record(opts.alive));
                            break;
                        }
                        Err(e) => {
                            debug!(url = %url, attempt, error = %e, "path attempt failed");
                            last_err = error_text(&e);
                        }
                    }
                }
                let mut rec = rec.unwrap_or_else(|| EnrichRecord::failure(url.clone(), last_err));
                rec.method = Some(req.method.as_str().to_string());
                let _ = tx.send((canonicalize(&url), rec)).await;
            });
        }
    }
    drop(tx);

    while let Some((key, rec)) = rx.recv().await {
        stats.observe(rec.alive, rec.error.is_some());
        batch.record(&key, rec);
    }
    urls.sort();
    urls.dedup();
    info!(total = stats.total, done = stats.done, alive = stats.alive, errors = stats.errors, "path probe finished");
    Ok((stats, urls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_store::{EnrichStore, SnapshotCache};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn csv_and_ndjson_specs() {
        let dir = tempfile::tempdir().unwrap();
        let csv_p = dir.path().join("paths.csv");
        std::fs::write(&csv_p, "admin,get\n.,HEAD\n/api/login,post,{\"u\":1}\n# comment\n").unwrap();
        let specs = load_path_specs(&csv_p).unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0], PathSpec { path: "/admin".into(), method: "GET".into(), body: None });
        assert_eq!(specs[1].path, "/");
        assert!(!specs[2].is_safe());
        assert_eq!(specs[2].request().unwrap().content_type, Some("application/json"));

        let nd = dir.path().join("paths.ndjson");
        std::fs::write(&nd, "{\"path\":\"//.git/config\"}\nnot json\n{\"path\":\"x\",\"method\":\"options\",\"body\":\"\"}\n").unwrap();
        let specs = load_path_specs(&nd).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].path, "/.git/config");
        assert_eq!(specs[1], PathSpec { path: "/x".into(), method: "OPTIONS".into(), body: None });
    }

    #[test]
    fn repeated_path_keeps_first_method() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("paths.csv");
        std::fs::write(&p, "/x,GET\nx,OPTIONS\n/y,HEAD\n").unwrap();
        let specs = load_path_specs(&p).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0], PathSpec { path: "/x".into(), method: "GET".into(), body: None });
        assert_eq!(specs[1].path, "/y");
    }

    #[test]
    fn form_bodies_are_detected() {
        let s = PathSpec { path: "/".into(), method: "POST".into(), body: Some("a=1&b=2".into()) };
        assert_eq!(s.request().unwrap().content_type, Some("application/x-www-form-urlencoded"));
    }

    #[test]
    fn live_bases_filter_by_status() {
        let mut m = EnrichMap::new();
        m.insert("a.example.com".into(), EnrichRecord { code: Some(200), final_url: "https://a.example.com/home".into(), ..Default::default() });
        m.insert("b.example.com".into(), EnrichRecord { code: Some(403), ..Default::default() });
        m.insert("c.example.com".into(), EnrichRecord { code: Some(200), final_url: "http://c.example.com:8080/".into(), ..Default::default() });
        m.insert("d.example.com".into(), EnrichRecord::default());
        assert_eq!(live_bases(&m, &[200]), vec!["http://c.example.com:8080", "https://a.example.com"]);
        assert_eq!(live_bases(&m, &[403]), vec!["https://b.example.com"]);
    }

    #[tokio::test]
    async fn refuses_unsafe_methods_without_permission() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnrichStore::open(dir.path(), "example.com", Arc::new(SnapshotCache::new())).unwrap();
        let mut batch = store.url_batch("probe_paths", Uuid::now_v7()).unwrap();
        let specs = vec![PathSpec { path: "/x".into(), method: "DELETE".into(), body: None }];
        let res = probe_paths(vec!["http://127.0.0.1:1".into()], specs, ProbeOptions::for_paths(), false, &mut batch, &StopSignal::new()).await;
        assert!(res.is_err());
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn fans_out_and_records_method() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/admin")).respond_with(ResponseTemplate::new(200).set_body_string("panel")).mount(&server).await;
        Mock::given(method("GET")).and(path("/.env")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let store = EnrichStore::open(dir.path(), "example.com", Arc::new(SnapshotCache::new())).unwrap();
        let mut batch = store.url_batch("probe_paths", Uuid::now_v7()).unwrap();
        let specs = vec![
            PathSpec { path: "/admin".into(), method: "GET".into(), body: None },
            PathSpec { path: "/.env".into(), method: "GET".into(), body: None },
        ];
        let opts = ProbeOptions { per_host: Some(1), retries: 0, timeout_ms: 2_000, ..ProbeOptions::for_paths() };
        let (stats, urls) = probe_paths(vec![server.uri()], specs, opts, false, &mut batch, &StopSignal::new()).await.unwrap();
        assert_eq!((stats.total, stats.done, stats.alive), (2, 2, 2));
        assert_eq!(urls.len(), 2);
        batch.commit().unwrap();
        let g = store.read_global();
        let admin = &g[&canonicalize(&format!("{}/admin", server.uri()))];
        assert_eq!(admin.method.as_deref(), Some("GET"));
        assert_eq!(admin.code, Some(200));
        assert!(admin.body_sha256.is_some());
        assert!(admin.latency_ms.is_some());
    }

    #[tokio::test]
    async fn one_record_per_url_when_paths_repeat() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/admin")).respond_with(ResponseTemplate::new(200)).expect(1).mount(&server).await;
        Mock::given(method("OPTIONS")).and(path("/admin")).respond_with(ResponseTemplate::new(204)).expect(0).mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let store = EnrichStore::open(dir.path(), "example.com", Arc::new(SnapshotCache::new())).unwrap();
        let mut batch = store.url_batch("probe_paths", Uuid::now_v7()).unwrap();
        let specs = vec![
            PathSpec { path: "/admin".into(), method: "GET".into(), body: None },
            PathSpec { path: "/admin".into(), method: "OPTIONS".into(), body: None },
        ];
        let opts = ProbeOptions { retries: 0, timeout_ms: 2_000, ..ProbeOptions::for_paths() };
        let (stats, urls) = probe_paths(vec![server.uri()], specs, opts, false, &mut batch, &StopSignal::new()).await.unwrap();
        assert_eq!((stats.total, stats.done), (1, 1));
        assert_eq!(urls.len(), 1);
        batch.commit().unwrap();
        let rec = &store.read_global()[&canonicalize(&format!("{}/admin", server.uri()))];
        assert_eq!(rec.method.as_deref(), Some("GET"));
        assert_eq!(rec.code, Some(200));
    }
}
