use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot contents keyed by canonical URL (or host for host-level modules).
pub type EnrichMap = BTreeMap<String, EnrichRecord>;

/// HTTP evidence for one canonical key.
///
/// The core fields are always written, `null` included, so a probe that
/// observed nothing clears the previous observation. The optional path-probe
/// fields and any unknown keys survive merges that do not mention them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichRecord {
    #[serde(default)]
    pub alive: bool,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub final_url: String,
    #[serde(default)]
    pub last_probe: Option<String>,
    #[serde(default)]
    pub first_seen: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sources: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_sha256: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl EnrichRecord {
    /// A failed probe: not alive, no code, with the error text.
    pub fn failure(final_url: impl Into<String>, error: impl Into<String>) -> Self {
        EnrichRecord { final_url: final_url.into(), error: Some(error.into()), ..Default::default() }
    }

    pub fn with_source(mut self, module: &str) -> Self {
        self.sources.insert(module.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_unknown_fields() {
        let raw = r#"{"alive":true,"code":200,"size":10,"title":null,"content_type":"text/html","final_url":"https://a/","last_probe":"2024-01-01T00:00:00Z","first_seen":1700000000,"error":null,"sources":["probe_urls"],"tags":["cdn"]}"#;
        let rec: EnrichRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.code, Some(200));
        assert_eq!(rec.extra.get("tags"), Some(&serde_json::json!(["cdn"])));
        let back = serde_json::to_value(&rec).unwrap();
        assert_eq!(back["tags"], serde_json::json!(["cdn"]));
        assert!(back.get("method").is_none());
        assert!(back["error"].is_null());
    }

    #[test]
    fn tolerates_sparse_records() {
        let rec: EnrichRecord = serde_json::from_str(r#"{"code":404}"#).unwrap();
        assert!(!rec.alive);
        assert!(rec.sources.is_empty());
    }
}
