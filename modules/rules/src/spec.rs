//! Rule documents as written on disk or returned by a generator.
//!
//! Parsing is lenient field by field: a rule with one malformed field keeps
//! the rest, and the compiler decides whether what remains is usable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One rule before compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_in: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Vec<String>>,
    /// Regex over the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Regex over the path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_prefix: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
}

impl RuleSpec {
    pub fn new(id: &str, label: &str, reason: &str, pattern: &str) -> Self {
        RuleSpec {
            id: Some(id.into()),
            label: Some(label.into()),
            reason: Some(reason.into()),
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn with_codes(mut self, codes: &[u16]) -> Self {
        self.code_in = Some(codes.to_vec());
        self
    }

    /// Build from an arbitrary JSON value. Non-objects give `None`.
    pub fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let host = text(obj, "host")
            .or_else(|| text(obj, "host_pattern"))
            .or_else(|| text(obj, "host_contains").map(|s| regex::escape(&s)));
        let path = text(obj, "path")
            .or_else(|| text(obj, "path_pattern"))
            .or_else(|| text(obj, "path_contains").map(|s| regex::escape(&s)));
        Some(RuleSpec {
            id: text(obj, "id"),
            label: text(obj, "label"),
            reason: text(obj, "reason"),
            pattern: text(obj, "pattern").or_else(|| text(obj, "regex")),
            code_in: obj.get("code_in").and_then(codes),
            method: obj.get("method").and_then(strings),
            host,
            path,
            host_prefix: obj.get("host_prefix").and_then(strings),
            query_keys: obj.get("query_keys").and_then(strings),
            extensions: obj.get("extensions").and_then(strings),
        })
    }
}

/// Pull the rule objects out of a document: a bare array, an object with a
/// `rules` array, or a single rule object.
pub fn rule_values(doc: &Value) -> Vec<Value> {
    match doc {
        Value::Array(items) => items.clone(),
        Value::Object(obj) => {
            if let Some(Value::Array(items)) = obj.get("rules") {
                return items.clone();
            }
            if ["pattern", "id", "label", "reason"].iter().any(|k| obj.contains_key(*k)) {
                return vec![doc.clone()];
            }
            // generators sometimes wrap the list under another key
            obj.values().find_map(|v| v.as_array().cloned()).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn codes(v: &Value) -> Option<Vec<u16>> {
    let one = |v: &Value| match v {
        Value::Number(n) => n.as_u64().and_then(|c| u16::try_from(c).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    let out: Vec<u16> = match v {
        Value::Array(items) => items.iter().filter_map(one).collect(),
        other => one(other).into_iter().collect(),
    };
    (!out.is_empty()).then_some(out)
}

fn strings(v: &Value) -> Option<Vec<String>> {
    let out: Vec<String> = match v {
        Value::String(s) => vec![s.trim().to_string()],
        Value::Array(items) => items.iter().filter_map(|i| i.as_str()).map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    let out: Vec<String> = out.into_iter().filter(|s| !s.is_empty()).collect();
    (!out.is_empty()).then_some(out)
}
