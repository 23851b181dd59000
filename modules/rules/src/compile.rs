//! Rule compilation. Bad rules are dropped with a reason, never fatal.

use crate::label::{Label, RuleSource};
use crate::matcher::{Matcher, UrlFacts};
use crate::spec::{rule_values, RuleSpec};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A rule ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub label: Label,
    pub reason: String,
    pub source: RuleSource,
    pub pattern: Regex,
    pub code_in: Option<BTreeSet<u16>>,
    /// Uppercased.
    pub methods: Option<BTreeSet<String>>,
    pub matcher: Option<Matcher>,
}

impl CompiledRule {
    /// Pattern plus structural matchers. Unparsed lines never match.
    pub fn matches_url(&self, f: &UrlFacts) -> bool {
        f.parsed && self.pattern.is_match(&f.key) && self.matcher.as_ref().map(|m| m.matches(f)).unwrap_or(true)
    }

    pub fn admits_code(&self, code: u16) -> bool {
        self.code_in.as_ref().map(|c| c.contains(&code)).unwrap_or(true)
    }

    pub fn admits_method(&self, method: &str) -> bool {
        self.methods.as_ref().map(|m| m.contains(&method.to_ascii_uppercase())).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dropped {
    pub id: String,
    pub reason: String,
}

/// Outcome of compiling one document.
#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    pub rules: Vec<CompiledRule>,
    pub dropped: Vec<Dropped>,
    pub notes: Vec<String>,
}

impl CompileReport {
    fn note(mut self, msg: String) -> Self {
        warn!("{msg}");
        self.notes.push(msg);
        self
    }
}

/// Lowercase, map anything outside `[a-z0-9_.-]` to `-`, collapse and trim dashes.
pub fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

fn build_regex(src: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(src).case_insensitive(true).size_limit(REGEX_SIZE_LIMIT).build()
}

/// Compile one spec. `n` is its 1-based position, used for generated ids.
pub fn compile_rule(spec: &RuleSpec, n: usize, source: RuleSource) -> Result<CompiledRule, Dropped> {
    let id = spec.id.as_deref().map(slug).filter(|s| !s.is_empty()).unwrap_or_else(|| format!("rule-{n}"));
    let fail = |reason: String| Dropped { id: id.clone(), reason };

    let pattern_src = spec.pattern.as_deref().map(str::trim).filter(|p| !p.is_empty()).ok_or_else(|| fail("missing pattern".into()))?;
    let pattern = build_regex(pattern_src).map_err(|e| fail(format!("invalid pattern: {e}")))?;

    let mut matchers = Vec::new();
    if let Some(h) = &spec.host {
        matchers.push(Matcher::HostPattern(build_regex(h).map_err(|e| fail(format!("invalid host pattern: {e}")))?));
    }
    if let Some(p) = &spec.path {
        matchers.push(Matcher::PathPattern(build_regex(p).map_err(|e| fail(format!("invalid path pattern: {e}")))?));
    }
    if let Some(prefixes) = &spec.host_prefix {
        matchers.push(Matcher::HostPrefix(prefixes.iter().map(|p| p.to_ascii_lowercase()).collect()));
    }
    if let Some(keys) = &spec.query_keys {
        matchers.push(Matcher::QueryKeys(keys.iter().map(|k| k.to_ascii_lowercase()).collect()));
    }
    if let Some(exts) = &spec.extensions {
        matchers.push(Matcher::Extensions(exts.iter().map(|e| e.trim_start_matches('.').to_ascii_lowercase()).collect()));
    }

    Ok(CompiledRule {
        label: Label::parse_lenient(spec.label.as_deref()),
        reason: spec.reason.clone().filter(|r| !r.trim().is_empty()).unwrap_or_else(|| "-".into()),
        source,
        pattern,
        code_in: spec.code_in.as_ref().map(|c| c.iter().copied().collect()),
        methods: spec.method.as_ref().map(|m| m.iter().map(|s| s.to_ascii_uppercase()).collect()),
        matcher: Matcher::all(matchers),
        id,
    })
}

/// Compile a list of specs. Within one list a repeated id replaces the
/// earlier rule in place.
pub fn compile_specs(specs: &[RuleSpec], source: RuleSource) -> CompileReport {
    compile_numbered(specs.iter().enumerate().map(|(i, s)| (i + 1, s)), source)
}

fn compile_numbered<'a>(specs: impl IntoIterator<Item = (usize, &'a RuleSpec)>, source: RuleSource) -> CompileReport {
    let mut report = CompileReport::default();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for (n, spec) in specs {
        match compile_rule(spec, n, source) {
            Ok(rule) => match index.get(&rule.id) {
                Some(&at) => {
                    report = report.note(format!("{source}: duplicate rule id {:?}, later entry wins", rule.id));
                    report.rules[at] = rule;
                }
                None => {
                    index.insert(rule.id.clone(), report.rules.len());
                    report.rules.push(rule);
                }
            },
            Err(d) => {
                debug!(source = %source, id = %d.id, reason = %d.reason, "rule dropped");
                report.dropped.push(d);
            }
        }
    }
    report
}

pub fn compile_value(doc: &Value, source: RuleSource) -> CompileReport {
    let values = rule_values(doc);
    let mut specs = Vec::with_capacity(values.len());
    let mut skipped = Vec::new();
    for (i, v) in values.iter().enumerate() {
        match RuleSpec::from_value(v) {
            Some(s) => specs.push((i + 1, s)),
            None => skipped.push(Dropped { id: format!("rule-{}", i + 1), reason: "not an object".into() }),
        }
    }
    let mut report = compile_numbered(specs.iter().map(|(n, s)| (*n, s)), source);
    report.dropped.extend(skipped);
    report
}

pub fn compile_str(text: &str, source: RuleSource) -> CompileReport {
    match serde_json::from_str::<Value>(text) {
        Ok(doc) => compile_value(&doc, source),
        Err(e) => CompileReport::default().note(format!("{source}: rules document is not valid JSON: {e}")),
    }
}

/// Compile a document from disk. A missing file is an empty report with a
/// note, same as an unreadable one.
pub fn compile_file(path: &Path, source: RuleSource) -> CompileReport {
    match std::fs::read_to_string(path) {
        Ok(text) => compile_str(&text, source),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut r = CompileReport::default();
            r.notes.push(format!("{source}: no rules file at {}", path.display()));
            r
        }
        Err(e) => CompileReport::default().note(format!("{source}: cannot read {}: {e}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slugs() {
        assert_eq!(slug("  Exposed .ENV  File!! "), "exposed-.env-file");
        assert_eq!(slug("--a__b--"), "a__b");
        assert_eq!(slug("***"), "");
    }

    #[test]
    fn drops_bad_rules_keeps_good_ones() {
        let doc = json!([
            {"id": "Good One", "label": "high", "pattern": "\\.sql$", "code_in": ["200"]},
            {"id": "broken", "label": "LOW", "pattern": "(unclosed"},
            {"id": "nopattern", "label": "LOW"},
            "junk",
            {"label": "weird", "pattern": "/admin"},
        ]);
        let r = compile_value(&doc, RuleSource::Custom);
        let ids: Vec<&str> = r.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["good-one", "rule-5"]);
        assert_eq!(r.rules[0].label, Label::High);
        assert_eq!(r.rules[1].label, Label::Info);
        assert_eq!(r.rules[1].reason, "-");
        assert_eq!(r.dropped.len(), 3);
        assert!(r.dropped.iter().any(|d| d.id == "broken" && d.reason.starts_with("invalid pattern")));
    }

    #[test]
    fn patterns_are_case_insensitive() {
        let r = compile_value(&json!({"rules": [{"id": "x", "pattern": "/ADMIN"}]}), RuleSource::Seed);
        let rule = &r.rules[0];
        assert!(rule.matches_url(&UrlFacts::from_line("https://example.com/admin/")));
        assert!(!rule.matches_url(&UrlFacts::from_line("not a url/admin")));
    }

    #[test]
    fn duplicate_ids_later_wins() {
        let r = compile_value(&json!([{"id": "a", "pattern": "one"}, {"id": "A", "pattern": "two"}]), RuleSource::Ai);
        assert_eq!(r.rules.len(), 1);
        assert_eq!(r.rules[0].pattern.as_str(), "two");
        assert_eq!(r.notes.len(), 1);
    }

    #[test]
    fn constraints_and_matchers() {
        let doc = json!({"id": "c", "pattern": ".", "code_in": [200, 403], "method": ["get"], "extensions": [".SQL"]});
        let r = compile_value(&doc, RuleSource::Custom);
        let rule = &r.rules[0];
        assert!(rule.admits_code(403) && !rule.admits_code(404));
        assert!(rule.admits_method("GET") && rule.admits_method("get") && !rule.admits_method("POST"));
        assert!(rule.matches_url(&UrlFacts::from_line("https://example.com/db.sql")));
        assert!(!rule.matches_url(&UrlFacts::from_line("https://example.com/db.zip")));
    }

    #[test]
    fn unreadable_documents_yield_notes() {
        let r = compile_str("{not json", RuleSource::Custom);
        assert!(r.rules.is_empty());
        assert_eq!(r.notes.len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let r = compile_file(&dir.path().join("missing.json"), RuleSource::Ai);
        assert!(r.rules.is_empty() && r.notes[0].contains("no rules file"));

        let p = dir.path().join("rules.json");
        std::fs::write(&p, r#"[{"id":"z","pattern":"z"}]"#).unwrap();
        assert_eq!(compile_file(&p, RuleSource::Ai).rules.len(), 1);
    }
}
