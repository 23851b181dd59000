use crate::fetch::observe;
use crate::options::{build_client, ProbeOptions};
use crate::{BatchStats, StopSignal};
use anyhow::Result;
use enrich_store::{EnrichRecord, UrlBatch};
use reconkit_core::Target;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info};

/// Probe every target and record each result into `batch` as it completes.
/// The caller commits the batch.
pub async fn probe_urls(targets: Vec<Target>, opts: ProbeOptions, batch: &mut UrlBatch<'_>, stop: &StopSignal) -> Result<BatchStats> {
    let client = build_client(&opts)?;
    let mut stats = BatchStats { total: targets.len(), ..Default::default() };
    let opts = Arc::new(opts);
    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<(String, EnrichRecord)>(opts.concurrency.max(1) * 2);

    let stop_sched = stop.clone();
    let scheduler = tokio::spawn(async move {
        for t in targets {
            if stop_sched.is_stopped() {
                debug!("stop requested, no further targets scheduled");
                break;
            }
            let Ok(permit) = sem.clone().acquire_owned().await else { break };
            let client = client.clone();
            let opts = opts.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let rec = probe_target(&client, &t, &opts).await;
                drop(permit);
                let _ = tx.send((t.key, rec)).await;
            });
        }
    });

    while let Some((key, rec)) = rx.recv().await {
        stats.observe(rec.alive, rec.error.is_some());
        batch.record(&key, rec);
    }
    let _ = scheduler.await;
    info!(total = stats.total, done = stats.done, alive = stats.alive, errors = stats.errors, "url probe finished");
    Ok(stats)
}

/// Candidate URLs for a target: its own URL when it has a scheme, otherwise
/// one per scheme in preference order.
pub(crate) fn candidate_urls(t: &Target, opts: &ProbeOptions) -> Vec<String> {
    if t.is_bare() {
        opts.scheme_order.schemes().iter().map(|s| format!("{s}://{}", t.key)).collect()
    } else {
        vec![t.key.clone()]
    }
}

async fn probe_target(client: &Client, t: &Target, opts: &ProbeOptions) -> EnrichRecord {
    let mut last = (t.key.clone(), String::from("unreachable"));
    for url in candidate_urls(t, opts) {
        for attempt in 0..=opts.retries {
            match observe(client, &url, opts).await {
                Ok(obs) => return obs.into_record(opts.alive),
                Err(e) => {
                    debug!(url = %url, attempt, error = %e, "probe attempt failed");
                    last = (url.clone(), error_text(&e));
                }
            }
        }
    }
    EnrichRecord::failure(last.0, last.1)
}

pub(crate) fn error_text(e: &anyhow::Error) -> String {
    let s = format!("{e:#}");
    if s.is_empty() {
        "request failed".into()
    } else {
        s
    }
}
