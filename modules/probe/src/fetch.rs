//! One HTTP observation: HEAD first, GET when needed, bounded body reads.

use crate::options::{AlivePolicy, ProbeOptions};
use anyhow::Result;
use enrich_store::EnrichRecord;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::debug;

/// What a single successful request told us.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub method: String,
    pub code: u16,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub final_url: String,
    pub title: Option<String>,
    pub latency_ms: u64,
    pub body_sha256: Option<String>,
}

impl Observation {
    pub fn into_record(self, policy: AlivePolicy) -> EnrichRecord {
        EnrichRecord {
            alive: policy.is_alive(self.code),
            code: Some(self.code),
            size: self.size,
            title: self.title,
            content_type: self.content_type,
            final_url: self.final_url,
            latency_ms: Some(self.latency_ms),
            body_sha256: self.body_sha256,
            ..Default::default()
        }
    }
}

/// A custom request for path fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<&'static str>,
}

/// Observe `url` following the HEAD-then-GET policy.
pub async fn observe(client: &Client, url: &str, opts: &ProbeOptions) -> Result<Observation> {
    let started = Instant::now();
    if opts.head_first {
        match client.head(url).send().await {
            Ok(resp) if !matches!(resp.status(), StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED) => {
                let mut obs = head_observation(&resp);
                if opts.fetch_title && is_html(obs.content_type.as_deref()) {
                    obs.title = fetch_title(client, &obs.final_url, opts).await;
                }
                obs.latency_ms = started.elapsed().as_millis() as u64;
                return Ok(obs);
            }
            Ok(resp) => debug!(url, status = resp.status().as_u16(), "HEAD refused, retrying with GET"),
            Err(e) => debug!(url, error = %e, "HEAD failed, retrying with GET"),
        }
    }
    let resp = client.get(url).send().await?;
    body_observation(resp, "GET", started, opts, false).await
}

/// Issue one custom request and hash the bounded body prefix.
pub async fn observe_request(client: &Client, url: &str, req: &RequestSpec, opts: &ProbeOptions) -> Result<Observation> {
    let started = Instant::now();
    let mut rb = client.request(req.method.clone(), url);
    if let Some(ct) = req.content_type {
        rb = rb.header(CONTENT_TYPE, ct);
    }
    if let Some(body) = &req.body {
        rb = rb.body(body.clone());
    }
    let resp = rb.send().await?;
    body_observation(resp, req.method.as_str(), started, opts, true).await
}

fn head_observation(resp: &Response) -> Observation {
    Observation {
        method: "HEAD".into(),
        code: resp.status().as_u16(),
        size: declared_length(resp.headers()),
        content_type: content_type(resp.headers()),
        final_url: resp.url().to_string(),
        ..Default::default()
    }
}

async fn body_observation(resp: Response, method: &str, started: Instant, opts: &ProbeOptions, hash: bool) -> Result<Observation> {
    let code = resp.status().as_u16();
    let declared = declared_length(resp.headers());
    let ctype = content_type(resp.headers());
    let final_url = resp.url().to_string();
    let cap = opts.body_cap.max(opts.title_bytes);
    let body = read_prefix(resp, cap).await?;
    let title = if opts.fetch_title && is_html(ctype.as_deref()) {
        let end = body.len().min(opts.title_bytes);
        extract_title(&String::from_utf8_lossy(&body[..end]))
    } else {
        None
    };
    Ok(Observation {
        method: method.to_string(),
        code,
        size: declared.or(Some(body.len() as u64)),
        content_type: ctype,
        final_url,
        title,
        latency_ms: started.elapsed().as_millis() as u64,
        body_sha256: hash.then(|| hex::encode(Sha256::digest(&body))),
    })
}

async fn fetch_title(client: &Client, url: &str, opts: &ProbeOptions) -> Option<String> {
    let resp = client.get(url).send().await.ok()?;
    if !is_html(content_type(resp.headers()).as_deref()) {
        return None;
    }
    let body = read_prefix(resp, opts.title_bytes).await.ok()?;
    extract_title(&String::from_utf8_lossy(&body))
}

/// Read at most `cap` bytes of the body, then drop the connection.
async fn read_prefix(mut resp: Response, cap: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    while buf.len() < cap {
        match resp.chunk().await? {
            Some(chunk) => {
                let take = chunk.len().min(cap - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            None => break,
        }
    }
    Ok(buf)
}

fn declared_length(h: &HeaderMap) -> Option<u64> {
    h.get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|s| s.trim().parse().ok())
}

fn content_type(h: &HeaderMap) -> Option<String> {
    h.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

fn is_html(ctype: Option<&str>) -> bool {
    ctype.map(|c| c.to_ascii_lowercase().contains("html")).unwrap_or(false)
}

/// Scan for the first `<title>` element. Whitespace is collapsed and the
/// result is capped at 200 characters.
pub fn extract_title(body: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let gt = lower[start..].find('>')? + start + 1;
    let end = lower[gt..].find("</title")? + gt;
    let t: String = body[gt..end].split_whitespace().collect::<Vec<_>>().join(" ");
    if t.is_empty() {
        return None;
    }
    Some(t.chars().take(200).collect())
}
