use crate::fetch::observe;
use crate::options::{build_client, ProbeOptions};
use crate::url_probe::error_text;
use crate::{BatchStats, StopSignal};
use anyhow::Result;
use enrich_store::{HostBatch, HostObservation, HostStatus};
use reqwest::Client;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info};

/// Resolve a host to its sorted, unique addresses. Failures give an empty list.
pub async fn resolve_ips(host: &str, limit: Duration) -> Vec<String> {
    match timeout(limit, lookup_host((host, 0u16))).await {
        Ok(Ok(addrs)) => addrs.map(|a| a.ip().to_string()).collect::<BTreeSet<_>>().into_iter().collect(),
        Ok(Err(e)) => {
            debug!(host, error = %e, "resolve failed");
            Vec::new()
        }
        Err(_) => {
            debug!(host, "resolve timed out");
            Vec::new()
        }
    }
}

/// Resolve and probe each host, recording host observations into `batch`.
pub async fn probe_hosts(hosts: Vec<String>, opts: ProbeOptions, batch: &mut HostBatch<'_>, stop: &StopSignal) -> Result<BatchStats> {
    let client = build_client(&opts)?;
    let mut stats = BatchStats { total: hosts.len(), ..Default::default() };
    let opts = Arc::new(opts);
    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<HostObservation>(opts.concurrency.max(1) * 2);

    let stop_sched = stop.clone();
    let scheduler = tokio::spawn(async move {
        for host in hosts {
            if stop_sched.is_stopped() {
                break;
            }
            let Ok(permit) = sem.clone().acquire_owned().await else { break };
            let client = client.clone();
            let opts = opts.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let obs = probe_host(&client, host, &opts).await;
                drop(permit);
                let _ = tx.send(obs).await;
            });
        }
    });

    while let Some(obs) = rx.recv().await {
        stats.observe(obs.status.alive, obs.error.is_some());
        batch.record(obs);
    }
    let _ = scheduler.await;
    info!(total = stats.total, done = stats.done, alive = stats.alive, "host probe finished");
    Ok(stats)
}

async fn probe_host(client: &Client, host: String, opts: &ProbeOptions) -> HostObservation {
    let ips = resolve_ips(&host, opts.timeout()).await;
    let mut last_err = String::from("unreachable");
    for scheme in opts.scheme_order.schemes() {
        let url = format!("{scheme}://{host}");
        for _ in 0..=opts.retries {
            match observe(client, &url, opts).await {
                Ok(o) => {
                    return HostObservation {
                        status: HostStatus {
                            alive: opts.alive.is_alive(o.code),
                            code: Some(o.code),
                            size: o.size,
                            title: o.title,
                            scheme: Some(scheme.to_string()),
                        },
                        host,
                        ips,
                        content_type: o.content_type,
                        final_url: Some(o.final_url),
                        error: None,
                    };
                }
                Err(e) => last_err = error_text(&e),
            }
        }
    }
    HostObservation { host, ips, error: Some(last_err), ..Default::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrich_store::{EnrichStore, SnapshotCache};
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn resolves_localhost() {
        let ips = resolve_ips("localhost", Duration::from_secs(5)).await;
        assert!(!ips.is_empty());
        let mut sorted = ips.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ips, sorted);
    }

    #[tokio::test]
    async fn host_liveness_counts_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD")).respond_with(ResponseTemplate::new(502)).mount(&server).await;
        let host = server.address().to_string();

        let dir = tempfile::tempdir().unwrap();
        let store = EnrichStore::open(dir.path(), "example.com", Arc::new(SnapshotCache::new())).unwrap();
        let mut batch = store.host_batch("subdomains", Uuid::now_v7()).unwrap();
        let opts = ProbeOptions { scheme_order: crate::SchemeOrder::HttpFirst, retries: 0, timeout_ms: 2_000, ..ProbeOptions::for_hosts() };
        let stats = probe_hosts(vec![host.clone()], opts, &mut batch, &StopSignal::new()).await.unwrap();
        assert_eq!(stats.alive, 1);
        batch.commit().unwrap();

        let idx = store.read_host_index();
        let rec = &idx[&host];
        assert!(rec.last_status.alive);
        assert_eq!(rec.last_status.code, Some(502));
        assert_eq!(rec.last_status.scheme.as_deref(), Some("http"));
    }
}
