//! Rule generation from a corpus sample.
//!
//! A model-backed generator is tried first; when it is unavailable or its
//! output does not survive compilation, a frequency-based generator takes over.

use crate::compile::compile_rule;
use crate::error::{Result, RuleError};
use crate::label::RuleSource;
use crate::spec::{rule_values, RuleSpec};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use reconkit_core::atomic_write;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_SAMPLE_SEED: u64 = 42;

#[async_trait]
pub trait RuleGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn generate(&self, sample: &[String]) -> Result<Vec<RuleSpec>>;
}

/// Deterministic sample of `n` lines. Asking for at least the whole corpus
/// returns it unchanged.
pub fn sample_corpus(urls: &[String], n: usize, seed: u64) -> Vec<String> {
    if n == 0 || n >= urls.len() {
        return urls.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    urls.choose_multiple(&mut rng, n).cloned().collect()
}

/// Keep only specs that compile, filling in ids the compiler would generate.
fn validated(specs: Vec<RuleSpec>, source: RuleSource) -> Vec<RuleSpec> {
    specs
        .into_iter()
        .enumerate()
        .filter_map(|(i, mut s)| match compile_rule(&s, i + 1, source) {
            Ok(rule) => {
                s.id = Some(rule.id);
                Some(s)
            }
            Err(d) => {
                warn!(id = %d.id, reason = %d.reason, "generated rule rejected");
                None
            }
        })
        .collect()
}

/// Client for an Ollama-compatible `/api/generate` endpoint.
pub struct ModelRuleGenerator {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl ModelRuleGenerator {
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434/api/generate";
    pub const DEFAULT_MODEL: &'static str = "llama3.2:3b";

    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint: endpoint.to_string(), model: model.to_string(), temperature: 0.5 })
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 1.0);
        self
    }

    fn prompt(sample: &[String]) -> String {
        let mut p = String::from(
            "You are helping triage URLs discovered during an authorized security assessment.\n\
             Below is a sample of URLs. Propose between 8 and 15 classification rules.\n\
             Reply with a JSON array only. Each rule is an object with fields:\n\
             id (short slug), label (one of HIGH, MEDIUM, LOW, INFO), reason (short text),\n\
             pattern (a regular expression matched against the full URL), code_in (list of HTTP status codes).\n\
             Prefer patterns that generalize beyond the exact URLs shown.\n\nURLs:\n",
        );
        for u in sample {
            p.push_str(u);
            p.push('\n');
        }
        p
    }
}

/// Turn the endpoint's reply into raw specs. The interesting part is
/// usually a JSON document inside the `response` string.
pub fn parse_model_reply(data: &Value) -> Result<Vec<RuleSpec>> {
    let doc = match data.get("response") {
        Some(Value::String(s)) => parse_embedded(s)?,
        Some(other) => other.clone(),
        None => data.clone(),
    };
    let specs: Vec<RuleSpec> = rule_values(&doc).iter().filter_map(RuleSpec::from_value).collect();
    if specs.is_empty() {
        return Err(RuleError::NoRules);
    }
    Ok(specs)
}

fn parse_embedded(s: &str) -> Result<Value> {
    let s = s.trim();
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    // tolerate prose or code fences around the document
    let start = s.find(['[', '{']).ok_or_else(|| RuleError::BadReply("no JSON document in reply".into()))?;
    let end = s.rfind([']', '}']).filter(|e| *e > start).ok_or_else(|| RuleError::BadReply("unterminated JSON document".into()))?;
    serde_json::from_str(&s[start..=end]).map_err(|e| RuleError::BadReply(e.to_string()))
}

#[async_trait]
impl RuleGenerator for ModelRuleGenerator {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn generate(&self, sample: &[String]) -> Result<Vec<RuleSpec>> {
        let body = json!({
            "model": self.model,
            "prompt": Self::prompt(sample),
            "stream": false,
            "format": "json",
            "options": { "temperature": self.temperature },
        });
        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(RuleError::Status(resp.status().as_u16()));
        }
        let data: Value = resp.json().await?;
        let specs = parse_model_reply(&data)?
            .into_iter()
            .enumerate()
            .map(|(i, mut s)| {
                if s.id.is_none() {
                    s.id = Some(format!("ai-{}", i + 1));
                }
                if s.code_in.is_none() {
                    s.code_in = Some(vec![200, 206]);
                }
                s
            })
            .collect();
        let specs = validated(specs, RuleSource::Ai);
        if specs.is_empty() {
            return Err(RuleError::NoRules);
        }
        Ok(specs)
    }
}

struct Template {
    id: &'static str,
    label: &'static str,
    reason: &'static str,
    pattern: &'static str,
    codes: &'static [u16],
    triggers: &'static [&'static str],
}

const TEMPLATES: &[Template] = &[
    Template { id: "fb-high-archives", label: "HIGH", reason: "Backup or source archives exposed", pattern: r"\.(?:zip|rar|7z|tar|tgz|tar\.gz|gz|bz2)$", codes: &[200, 206], triggers: &[".zip", ".rar", ".7z", ".tar", ".tgz", ".gz", ".bz2"] },
    Template { id: "fb-high-db", label: "HIGH", reason: "Database dumps exposed", pattern: r"\.(?:sql|sqlite|db|dump)(?:\.(?:gz|bz2|zip))?$", codes: &[200, 206], triggers: &[".sql", ".sqlite", ".db", ".dump"] },
    Template { id: "fb-high-vcs", label: "HIGH", reason: "Version control metadata", pattern: r"/\.(?:git|svn|hg)(?:/|$)", codes: &[200, 403], triggers: &["/.git", "/.svn", "/.hg"] },
    Template { id: "fb-medium-admin", label: "MEDIUM", reason: "Admin panels or dashboards", pattern: r"/(?:admin|administrator|wp-admin|dashboard)(?:/|$)", codes: &[200, 302, 401, 403], triggers: &["/admin", "/administrator", "/wp-admin", "/dashboard"] },
    Template { id: "fb-medium-upload", label: "MEDIUM", reason: "Upload or file manager directories", pattern: r"/(?:uploads?|filemanager|userfiles?)(?:/|$)", codes: &[200, 403], triggers: &["/upload", "/filemanager", "/userfiles"] },
    Template { id: "fb-medium-debug", label: "MEDIUM", reason: "Debug or diagnostic endpoints", pattern: r"/(?:phpinfo\.php|debug|actuator|server-status)(?:/|$)", codes: &[200, 401, 403], triggers: &["/phpinfo", "/debug", "/actuator", "/server-status"] },
    Template { id: "fb-low-config", label: "LOW", reason: "Config or environment files", pattern: r"/(?:\.env|config\.php|settings\.json)$", codes: &[200, 403], triggers: &["/config", "/.env", "/settings"] },
    Template { id: "fb-low-logs", label: "LOW", reason: "Log files exposed", pattern: r"/(?:access|error)\.log(?:\.\w+)?$", codes: &[200, 403], triggers: &["/logs", "/log/", ".log"] },
    Template { id: "fb-low-backup", label: "LOW", reason: "Backup copies of files", pattern: r"\.(?:bak|old|orig|backup)$", codes: &[200, 206], triggers: &[".bak", ".old", ".orig", "/backup"] },
    Template { id: "fb-info-src", label: "INFO", reason: "Source code paths", pattern: r"\.(?:php|asp|aspx|jsp|rb|py|cgi)$", codes: &[200, 403], triggers: &[".php", ".asp", ".jsp", ".rb", ".py", ".cgi"] },
    Template { id: "fb-info-docs", label: "INFO", reason: "Document or data files", pattern: r"\.(?:docx?|xlsx?|csv|pdf|json|xml)$", codes: &[200, 206], triggers: &[".doc", ".xls", ".csv", ".pdf", ".json", ".xml"] },
    Template { id: "fb-info-tmp", label: "INFO", reason: "Test or temporary directories", pattern: r"/(?:test|tmp|temp|dev)(?:/|$)", codes: &[200, 403], triggers: &["/test", "/tmp", "/temp", "/dev/"] },
];

/// Derives rules from how often well-known extensions and directories
/// appear in the sample. Never returns an empty list.
#[derive(Debug, Clone)]
pub struct StatisticalRuleGenerator {
    pub max_rules: usize,
}

impl Default for StatisticalRuleGenerator {
    fn default() -> Self {
        Self { max_rules: 12 }
    }
}

impl StatisticalRuleGenerator {
    pub fn derive(&self, sample: &[String]) -> Vec<RuleSpec> {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for u in sample {
            let low = u.to_ascii_lowercase();
            for t in TEMPLATES {
                if t.triggers.iter().any(|needle| low.contains(needle)) {
                    *counts.entry(t.id).or_default() += 1;
                }
            }
        }
        let mut specs: Vec<RuleSpec> = TEMPLATES
            .iter()
            .filter(|t| counts.contains_key(t.id))
            .take(self.max_rules.max(1))
            .map(|t| RuleSpec::new(t.id, t.label, t.reason, t.pattern).with_codes(t.codes))
            .collect();
        if specs.is_empty() {
            specs.push(
                RuleSpec::new(
                    "fb-info-sensitive",
                    "INFO",
                    "Commonly sensitive paths",
                    r"/(?:admin|login|config|backup|\.env|\.git|debug|internal)(?:[/.?]|$)",
                )
                .with_codes(&[200, 401, 403]),
            );
        }
        specs
    }
}

#[async_trait]
impl RuleGenerator for StatisticalRuleGenerator {
    fn name(&self) -> &'static str {
        "statistical"
    }

    async fn generate(&self, sample: &[String]) -> Result<Vec<RuleSpec>> {
        Ok(self.derive(sample))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    Model { attempts: u32 },
    Fallback { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub specs: Vec<RuleSpec>,
    pub strategy: Strategy,
    /// The model was asked and did not deliver.
    pub degraded: bool,
}

/// Try `model` up to `1 + retries` times, then fall back.
pub async fn generate_rules(
    model: Option<&dyn RuleGenerator>,
    fallback: &StatisticalRuleGenerator,
    sample: &[String],
    retries: u32,
) -> GenerationOutcome {
    let Some(model) = model else {
        return GenerationOutcome {
            specs: fallback.derive(sample),
            strategy: Strategy::Fallback { reason: "no model configured".into() },
            degraded: false,
        };
    };
    let mut last = String::new();
    for attempt in 1..=retries.saturating_add(1) {
        match model.generate(sample).await {
            Ok(specs) if !specs.is_empty() => {
                info!(generator = model.name(), attempt, rules = specs.len(), "rules generated");
                return GenerationOutcome { specs, strategy: Strategy::Model { attempts: attempt }, degraded: false };
            }
            Ok(_) => last = RuleError::NoRules.to_string(),
            Err(e) => {
                warn!(generator = model.name(), attempt, error = %e, "rule generation attempt failed");
                last = e.to_string();
            }
        }
    }
    GenerationOutcome { specs: fallback.derive(sample), strategy: Strategy::Fallback { reason: last }, degraded: true }
}

/// Write specs as a rules document that [`crate::compile_file`] reads back.
pub fn save_rules(path: &Path, specs: &[RuleSpec]) -> Result<()> {
    let io = |source: std::io::Error| RuleError::Io { path: path.to_path_buf(), source };
    let body = serde_json::to_vec_pretty(&json!({ "rules": specs })).map_err(|e| io(e.into()))?;
    atomic_write(path, &body).map_err(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_file;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn corpus() -> Vec<String> {
        (0..50).map(|i| format!("https://example.com/p{i}")).collect()
    }

    #[test]
    fn sampling_is_deterministic() {
        let urls = corpus();
        let a = sample_corpus(&urls, 10, DEFAULT_SAMPLE_SEED);
        let b = sample_corpus(&urls, 10, DEFAULT_SAMPLE_SEED);
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert_eq!(sample_corpus(&urls, 500, 1), urls);
    }

    #[test]
    fn statistical_rules_follow_the_corpus() {
        let g = StatisticalRuleGenerator::default();
        let sample = vec!["https://example.com/site.zip".to_string(), "https://example.com/wp-admin/".to_string()];
        let ids: Vec<String> = g.derive(&sample).into_iter().filter_map(|s| s.id).collect();
        assert_eq!(ids, vec!["fb-high-archives", "fb-medium-admin"]);

        let none = g.derive(&["https://example.com/about".to_string()]);
        assert_eq!(none.len(), 1);
        assert_eq!(none[0].id.as_deref(), Some("fb-info-sensitive"));

        let capped = StatisticalRuleGenerator { max_rules: 1 }.derive(&sample);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn reply_shapes() {
        let wrapped = json!({"response": "Sure!\n```json\n{\"rules\":[{\"id\":\"a\",\"pattern\":\"x\"}]}\n```"});
        assert_eq!(parse_model_reply(&wrapped).unwrap().len(), 1);
        let direct = json!({"response": [{"pattern": "x"}, {"pattern": "y"}]});
        assert_eq!(parse_model_reply(&direct).unwrap().len(), 2);
        assert!(matches!(parse_model_reply(&json!({"response": "no idea"})), Err(RuleError::BadReply(_))));
        assert!(matches!(parse_model_reply(&json!({"response": "[]"})), Err(RuleError::NoRules)));
    }

    #[tokio::test]
    async fn model_reply_is_validated() {
        let server = MockServer::start().await;
        let reply = json!([
            {"label": "HIGH", "reason": "dumps", "pattern": "\\.sql$"},
            {"id": "bad", "label": "LOW", "pattern": "(oops"},
        ]);
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"stream": false, "format": "json"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": reply.to_string()})))
            .mount(&server)
            .await;
        let g = ModelRuleGenerator::new(&format!("{}/api/generate", server.uri()), "test-model", Duration::from_secs(5)).unwrap();
        let out = generate_rules(Some(&g as &dyn RuleGenerator), &StatisticalRuleGenerator::default(), &corpus(), 0).await;
        assert_eq!(out.strategy, Strategy::Model { attempts: 1 });
        assert!(!out.degraded);
        assert_eq!(out.specs.len(), 1);
        assert_eq!(out.specs[0].id.as_deref(), Some("ai-1"));
        assert_eq!(out.specs[0].code_in, Some(vec![200, 206]));
    }

    #[tokio::test]
    async fn failing_model_degrades_to_statistics() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).expect(3).mount(&server).await;
        let g = ModelRuleGenerator::new(&format!("{}/api/generate", server.uri()), "m", Duration::from_secs(5)).unwrap();
        let out = generate_rules(Some(&g as &dyn RuleGenerator), &StatisticalRuleGenerator::default(), &corpus(), 2).await;
        assert!(out.degraded);
        assert!(matches!(out.strategy, Strategy::Fallback { ref reason } if reason.contains("500")));
        assert!(!out.specs.is_empty());
    }

    #[tokio::test]
    async fn no_model_is_not_degraded() {
        let out = generate_rules(None, &StatisticalRuleGenerator::default(), &corpus(), 3).await;
        assert!(!out.degraded);
        assert!(matches!(out.strategy, Strategy::Fallback { .. }));
    }

    #[test]
    fn saved_rules_compile() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("rules").join("ai_rules.json");
        let specs = StatisticalRuleGenerator::default().derive(&["https://example.com/a.sql".to_string()]);
        save_rules(&p, &specs).unwrap();
        let r = compile_file(&p, RuleSource::Ai);
        assert_eq!(r.rules.len(), specs.len());
        assert!(r.dropped.is_empty());
    }
}
