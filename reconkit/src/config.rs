use anyhow::{anyhow, Context, Result};
use classify::ClassifyOptions;
use probe::{parse_header, ProbeOptions, SchemeOrder};
use rules::RuleSource;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = "reconkit.yaml";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScopeConfig {
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,
    pub include_external: Option<bool>,
}

/// Prober knobs. The same shape serves the `probe`, `hosts` and `paths` sections.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct ProbeConfig {
    pub concurrency: Option<usize>,
    pub per_host: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub headers: Option<Vec<String>>,
    pub user_agent: Option<String>,
    pub scheme_order: Option<String>,
    pub head_first: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub max_redirects: Option<usize>,
    pub fetch_title: Option<bool>,
    pub title_bytes: Option<usize>,
    pub body_cap: Option<usize>,
    pub insecure: Option<bool>,
    /// Host status codes that qualify a host for path fan-out.
    pub statuses: Option<Vec<u16>>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ClassifyConfig {
    pub sources: Option<Vec<String>>,
    pub demote_missing_code: Option<bool>,
    pub demote_blocked: Option<bool>,
    pub demote_not_found: Option<bool>,
    pub http_required: Option<bool>,
    pub sample_budget: Option<usize>,
    pub sample_seed: Option<u64>,
    pub shard_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct RulegenConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub sample_size: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub outputs: Option<PathBuf>,
    pub scope: Option<ScopeConfig>,
    pub probe: Option<ProbeConfig>,
    pub hosts: Option<ProbeConfig>,
    pub paths: Option<ProbeConfig>,
    pub classify: Option<ClassifyConfig>,
    pub rulegen: Option<RulegenConfig>,
}

/// Load `path`, or `./reconkit.yaml` when present. No file means defaults;
/// a file that does not parse is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse_scheme_order(s: &str) -> Result<SchemeOrder> {
    match s.trim().to_ascii_lowercase().as_str() {
        "https-first" | "https" => Ok(SchemeOrder::HttpsFirst),
        "http-first" | "http" => Ok(SchemeOrder::HttpFirst),
        other => Err(anyhow!("unknown scheme order {other:?} (expected https-first or http-first)")),
    }
}

pub fn parse_sources(items: &[String]) -> Result<Vec<RuleSource>> {
    items
        .iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| RuleSource::parse(s).ok_or_else(|| anyhow!("unknown rule source {s:?}")))
        .collect()
}

impl ProbeConfig {
    pub fn apply(&self, o: &mut ProbeOptions) -> Result<()> {
        if let Some(v) = self.concurrency { o.concurrency = v; }
        if let Some(v) = self.per_host { o.per_host = Some(v); }
        if let Some(v) = self.timeout_ms { o.timeout_ms = v; }
        if let Some(v) = self.retries { o.retries = v; }
        if let Some(hs) = &self.headers {
            for h in hs { o.headers.push(parse_header(h)?); }
        }
        if let Some(v) = &self.user_agent { o.user_agent = Some(v.clone()); }
        if let Some(v) = &self.scheme_order { o.scheme_order = parse_scheme_order(v)?; }
        if let Some(v) = self.head_first { o.head_first = v; }
        if let Some(v) = self.follow_redirects { o.follow_redirects = v; }
        if let Some(v) = self.max_redirects { o.max_redirects = v; }
        if let Some(v) = self.fetch_title { o.fetch_title = v; }
        if let Some(v) = self.title_bytes { o.title_bytes = v; }
        if let Some(v) = self.body_cap { o.body_cap = v; }
        if let Some(v) = self.insecure { o.insecure = v; }
        Ok(())
    }
}

impl ClassifyConfig {
    pub fn apply(&self, o: &mut ClassifyOptions) {
        if let Some(v) = self.demote_missing_code { o.demote_missing_code = v; }
        if let Some(v) = self.demote_blocked { o.demote_blocked = v; }
        if let Some(v) = self.demote_not_found { o.demote_not_found = v; }
        if let Some(v) = self.http_required { o.http_required = v; }
        if let Some(v) = self.shard_size { o.shard_size = v; }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
outputs: ./out
scope:
  deny: ["*.cdn.example.com"]
probe:
  concurrency: 20
  headers: ["X-Team: red"]
  scheme_order: http-first
hosts:
  timeout_ms: 3000
classify:
  sources: [seed, custom]
  demote_blocked: false
rulegen:
  model: qwen2.5:7b
"#;

    #[test]
    fn parses_sections_and_applies() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.outputs.as_deref(), Some(Path::new("./out")));
        let mut o = ProbeOptions::for_urls();
        cfg.probe.as_ref().unwrap().apply(&mut o).unwrap();
        assert_eq!(o.concurrency, 20);
        assert_eq!(o.scheme_order, SchemeOrder::HttpFirst);
        assert_eq!(o.headers, vec![("X-Team".to_string(), "red".to_string())]);
        assert_eq!(o.retries, ProbeOptions::for_urls().retries);

        let mut c = ClassifyOptions::default();
        cfg.classify.as_ref().unwrap().apply(&mut c);
        assert!(!c.demote_blocked && c.demote_missing_code);
        let sources = parse_sources(cfg.classify.unwrap().sources.as_deref().unwrap()).unwrap();
        assert_eq!(sources, vec![RuleSource::Seed, RuleSource::Custom]);
    }

    #[test]
    fn missing_default_file_is_fine_malformed_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.yaml");
        fs::write(&bad, "probe: [unclosed").unwrap();
        assert!(load_config(Some(&bad)).is_err());
        assert!(load_config(Some(&dir.path().join("absent.yaml"))).is_err());
    }

    #[test]
    fn sources_and_scheme_orders() {
        assert_eq!(parse_sources(&["seed,ai".into()]).unwrap(), vec![RuleSource::Seed, RuleSource::Ai]);
        assert!(parse_sources(&["llm".into()]).is_err());
        assert!(parse_scheme_order("sideways").is_err());
    }
}
