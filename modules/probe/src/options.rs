use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{redirect::Policy, Client};
use std::time::Duration;

/// How a response code maps to `alive`. The two probers deliberately disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlivePolicy {
    /// URL and path probing: alive when the code is below 500.
    UrlReachable,
    /// Host probing: any HTTP answer counts, 5xx included.
    HostResponded,
}

impl AlivePolicy {
    pub fn is_alive(self, code: u16) -> bool {
        match self {
            AlivePolicy::UrlReachable => code < 500,
            AlivePolicy::HostResponded => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeOrder {
    HttpsFirst,
    HttpFirst,
}

impl SchemeOrder {
    pub fn schemes(self) -> [&'static str; 2] {
        match self {
            SchemeOrder::HttpsFirst => ["https", "http"],
            SchemeOrder::HttpFirst => ["http", "https"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub concurrency: usize,
    pub per_host: Option<usize>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
    pub scheme_order: SchemeOrder,
    pub head_first: bool,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub fetch_title: bool,
    pub title_bytes: usize,
    pub body_cap: usize,
    pub insecure: bool,
    pub alive: AlivePolicy,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            concurrency: 50,
            per_host: None,
            timeout_ms: 10_000,
            retries: 1,
            headers: Vec::new(),
            user_agent: None,
            scheme_order: SchemeOrder::HttpsFirst,
            head_first: true,
            follow_redirects: true,
            max_redirects: 5,
            fetch_title: true,
            title_bytes: 8 * 1024,
            body_cap: 512 * 1024,
            insecure: false,
            alive: AlivePolicy::UrlReachable,
        }
    }
}

impl ProbeOptions {
    pub fn for_urls() -> Self {
        Self::default()
    }

    pub fn for_hosts() -> Self {
        ProbeOptions { alive: AlivePolicy::HostResponded, concurrency: 100, timeout_ms: 8_000, ..Self::default() }
    }

    pub fn for_paths() -> Self {
        ProbeOptions { concurrency: 200, per_host: Some(8), retries: 2, head_first: false, ..Self::default() }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Parse a `Name: value` header argument.
pub fn parse_header(s: &str) -> Result<(String, String)> {
    let (k, v) = s.split_once(':').ok_or_else(|| anyhow!("header must look like 'Name: value': {s:?}"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(anyhow!("empty header name in {s:?}"));
    }
    Ok((k.to_string(), v.trim().to_string()))
}

/// An explicit User-Agent header wins; otherwise the configured agent, then
/// the built-in default.
pub fn resolve_user_agent(headers: &[(String, String)], configured: Option<&str>) -> String {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
        .map(|(_, v)| v.clone())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| format!("reconkit/{}", reconkit_core::version()))
}

pub fn build_client(opts: &ProbeOptions) -> Result<Client> {
    let mut hm = HeaderMap::new();
    for (k, v) in &opts.headers {
        if k.eq_ignore_ascii_case("user-agent") {
            continue;
        }
        let name = HeaderName::from_bytes(k.as_bytes()).with_context(|| format!("invalid header name {k:?}"))?;
        let value = HeaderValue::from_str(v).with_context(|| format!("invalid value for header {k}"))?;
        hm.insert(name, value);
    }
    let ua = resolve_user_agent(&opts.headers, opts.user_agent.as_deref());
    hm.insert(USER_AGENT, HeaderValue::from_str(&ua).context("invalid user agent")?);

    let redirect = if opts.follow_redirects { Policy::limited(opts.max_redirects) } else { Policy::none() };
    Client::builder()
        .redirect(redirect)
        .timeout(opts.timeout())
        .default_headers(hm)
        .danger_accept_invalid_certs(opts.insecure)
        .brotli(true)
        .gzip(true)
        .deflate(true)
        .build()
        .context("build http client")
}
