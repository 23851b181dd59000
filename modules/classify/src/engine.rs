use enrich_store::{EnrichMap, EnrichRecord};
use rayon::prelude::*;
use rules::{CompiledRule, Label, RuleSet, RuleSource, UrlFacts};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyOptions {
    /// Step down one tier when there is no observed status code.
    pub demote_missing_code: bool,
    /// 401/403 forces INFO.
    pub demote_blocked: bool,
    /// 404 forces INFO.
    pub demote_not_found: bool,
    /// URLs without an observed code are left unclassified.
    pub http_required: bool,
    /// Minimum URLs per parallel work unit.
    pub shard_size: usize,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self { demote_missing_code: true, demote_blocked: true, demote_not_found: true, http_required: false, shard_size: 1024 }
    }
}

/// One classified URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageRow {
    pub url: String,
    pub rule_id: String,
    pub label: Label,
    pub final_label: Label,
    pub reason: String,
    pub code: Option<u16>,
    pub source: RuleSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts {
    #[serde(rename = "HIGH")]
    pub high: usize,
    #[serde(rename = "MEDIUM")]
    pub medium: usize,
    #[serde(rename = "LOW")]
    pub low: usize,
    #[serde(rename = "INFO")]
    pub info: usize,
}

impl LabelCounts {
    pub fn add(&mut self, l: Label) {
        *self.slot(l) += 1;
    }

    pub fn get(&self, l: Label) -> usize {
        match l {
            Label::High => self.high,
            Label::Medium => self.medium,
            Label::Low => self.low,
            Label::Info => self.info,
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low + self.info
    }

    fn slot(&mut self, l: Label) -> &mut usize {
        match l {
            Label::High => &mut self.high,
            Label::Medium => &mut self.medium,
            Label::Low => &mut self.low,
            Label::Info => &mut self.info,
        }
    }
}

/// Result of one classification run, in corpus order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub rows: Vec<TriageRow>,
    pub unclassified: Vec<String>,
    pub counts: LabelCounts,
    /// Non-blank corpus lines seen, duplicates included.
    pub total_source: usize,
    pub duplicates: usize,
    pub unparsable: usize,
}

/// Enrichment for `key`, also trying the key with and without a trailing slash.
pub fn lookup<'m>(map: &'m EnrichMap, key: &str) -> Option<&'m EnrichRecord> {
    if let Some(r) = map.get(key) {
        return Some(r);
    }
    match key.strip_suffix('/') {
        Some(trimmed) => map.get(trimmed),
        None => map.get(&format!("{key}/")),
    }
}

fn rank(r: &CompiledRule) -> (u8, u8) {
    (r.label.weight(), r.source.priority())
}

/// Evaluates a corpus against a rule set. Holds no mutable state, so it can
/// be shared across worker threads.
pub struct Classifier<'a> {
    rules: &'a RuleSet,
    opts: ClassifyOptions,
}

impl<'a> Classifier<'a> {
    pub fn new(rules: &'a RuleSet, opts: ClassifyOptions) -> Self {
        Self { rules, opts }
    }

    pub fn rules(&self) -> &RuleSet {
        self.rules
    }

    pub fn options(&self) -> &ClassifyOptions {
        &self.opts
    }

    fn admits(rule: &CompiledRule, rec: Option<&EnrichRecord>) -> bool {
        let Some(rec) = rec else { return true };
        rec.code.map(|c| rule.admits_code(c)).unwrap_or(true) && rec.method.as_deref().map(|m| rule.admits_method(m)).unwrap_or(true)
    }

    /// Highest `(severity, source priority)` among matching rules; the
    /// smallest id breaks a full tie.
    pub fn best_match(&self, facts: &UrlFacts, rec: Option<&EnrichRecord>) -> Option<&'a CompiledRule> {
        let rules: &'a RuleSet = self.rules;
        let mut best: Option<&'a CompiledRule> = None;
        for rule in rules.rules() {
            if !rule.matches_url(facts) || !Self::admits(rule, rec) {
                continue;
            }
            best = match best {
                Some(b) if rank(b) > rank(rule) || (rank(b) == rank(rule) && b.id <= rule.id) => Some(b),
                _ => Some(rule),
            };
        }
        best
    }

    /// Apply the HTTP demotion policy to a nominal label.
    pub fn final_label(&self, nominal: Label, code: Option<u16>) -> Label {
        match code {
            None if self.opts.demote_missing_code => nominal.step_down(),
            Some(401 | 403) if self.opts.demote_blocked => Label::Info,
            Some(404) if self.opts.demote_not_found => Label::Info,
            _ => nominal,
        }
    }

    /// Classify one URL. `None` means it lands in the unclassified bucket.
    pub fn classify_one(&self, facts: &UrlFacts, rec: Option<&EnrichRecord>) -> Option<TriageRow> {
        let code = rec.and_then(|r| r.code);
        if self.opts.http_required && code.is_none() {
            return None;
        }
        let rule = self.best_match(facts, rec)?;
        Some(TriageRow {
            url: facts.key.clone(),
            rule_id: rule.id.clone(),
            label: rule.label,
            final_label: self.final_label(rule.label, code),
            reason: rule.reason.clone(),
            code,
            source: rule.source,
        })
    }

    /// Classify a corpus. Lines sharing a canonical key are classified once
    /// and counted as duplicates. Output order follows the corpus.
    pub fn classify(&self, corpus: &[String], enrich: &EnrichMap) -> Classification {
        let shard = self.opts.shard_size.max(1);
        let facts: Vec<UrlFacts> = corpus.par_iter().with_min_len(shard).map(|l| UrlFacts::from_line(l)).collect();

        let mut seen = HashSet::with_capacity(facts.len());
        let mut unique = Vec::with_capacity(facts.len());
        let mut out = Classification::default();
        for f in facts {
            // blank lines are not corpus entries
            if f.key.is_empty() {
                continue;
            }
            out.total_source += 1;
            if !seen.insert(f.key.clone()) {
                out.duplicates += 1;
                continue;
            }
            if !f.parsed {
                out.unparsable += 1;
            }
            unique.push(f);
        }

        let outcomes: Vec<Option<TriageRow>> =
            unique.par_iter().with_min_len(shard).map(|f| self.classify_one(f, lookup(enrich, &f.key))).collect();

        for (f, row) in unique.into_iter().zip(outcomes) {
            match row {
                Some(r) => {
                    out.counts.add(r.final_label);
                    out.rows.push(r);
                }
                None => out.unclassified.push(f.key),
            }
        }
        debug!(duplicates = out.duplicates, unparsable = out.unparsable, "corpus deduplicated");
        info!(
            classified = out.rows.len(),
            unclassified = out.unclassified.len(),
            high = out.counts.high,
            medium = out.counts.medium,
            "classification finished"
        );
        out
    }
}
