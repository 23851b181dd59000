//! Quick look at how a rule set behaves on a slice of the corpus.

use crate::engine::{Classifier, LabelCounts};
use enrich_store::EnrichMap;
use rules::{sample_corpus, Label, RuleSource};
use serde::Serialize;
use std::collections::BTreeMap;

pub const SAMPLES_PER_RULE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewSample {
    pub url: String,
    pub final_label: Label,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleHits {
    pub id: String,
    pub label: Label,
    pub reason: String,
    pub source: RuleSource,
    pub hits: usize,
    pub samples: Vec<PreviewSample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewSummary {
    pub rules_version: String,
    pub limit: usize,
    pub counts: LabelCounts,
    pub unclassified: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub summary: PreviewSummary,
    /// Most hits first, then by id.
    pub rules: Vec<RuleHits>,
}

/// Classify at most `limit` lines; a `limit` of 0 means the whole corpus.
/// With a seed the lines are a seeded random draw, otherwise the head of the
/// corpus.
pub fn preview(classifier: &Classifier<'_>, corpus: &[String], enrich: &EnrichMap, limit: usize, seed: Option<u64>) -> Preview {
    let slice: Vec<String> = match seed {
        Some(s) => sample_corpus(corpus, limit, s),
        None if limit == 0 => corpus.to_vec(),
        None => corpus.iter().take(limit).cloned().collect(),
    };
    let c = classifier.classify(&slice, enrich);

    let mut per_rule: BTreeMap<&str, RuleHits> = BTreeMap::new();
    for row in &c.rows {
        let entry = per_rule.entry(row.rule_id.as_str()).or_insert_with(|| RuleHits {
            id: row.rule_id.clone(),
            label: row.label,
            reason: row.reason.clone(),
            source: row.source,
            hits: 0,
            samples: Vec::new(),
        });
        entry.hits += 1;
        if entry.samples.len() < SAMPLES_PER_RULE {
            entry.samples.push(PreviewSample { url: row.url.clone(), final_label: row.final_label });
        }
    }
    let mut rules: Vec<RuleHits> = per_rule.into_values().collect();
    rules.sort_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.id.cmp(&b.id)));

    Preview {
        summary: PreviewSummary {
            rules_version: classifier.rules().version(),
            limit: slice.len(),
            counts: c.counts,
            unclassified: c.unclassified.len(),
        },
        rules,
    }
}
