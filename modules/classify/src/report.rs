//! The persisted triage report.

use crate::engine::{Classification, ClassifyOptions, LabelCounts, TriageRow};
use crate::sample::balanced_sample;
use anyhow::{Context, Result};
use reconkit_core::atomic_write;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageSummary {
    pub rules_version: String,
    pub counts: LabelCounts,
    pub unclassified: usize,
    pub total_classified: usize,
    pub total_source: usize,
    pub duplicates: usize,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageReport {
    pub summary: TriageSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TriageRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_sample: Option<Vec<TriageRow>>,
}

/// How many rows a report carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportRows {
    All,
    Balanced { budget: usize, seed: u64 },
}

fn note(opts: &ClassifyOptions, notes: &[String]) -> String {
    let mut policies = Vec::new();
    if opts.demote_missing_code {
        policies.push("missing-code");
    }
    if opts.demote_blocked {
        policies.push("401/403");
    }
    if opts.demote_not_found {
        policies.push("404");
    }
    let mut s = String::from("Applied rules");
    if !policies.is_empty() {
        s.push_str(&format!(" with HTTP demotion ({})", policies.join(", ")));
    }
    if opts.http_required {
        s.push_str("; unprobed URLs left unclassified");
    }
    for n in notes {
        s.push_str("; ");
        s.push_str(n);
    }
    s
}

impl TriageReport {
    /// `notes` carries rule-loading remarks so a degraded run explains itself.
    pub fn build(c: &Classification, rules_version: &str, opts: &ClassifyOptions, notes: &[String], rows: ReportRows) -> Self {
        let summary = TriageSummary {
            rules_version: rules_version.to_string(),
            counts: c.counts,
            unclassified: c.unclassified.len(),
            total_classified: c.counts.total(),
            total_source: c.total_source,
            duplicates: c.duplicates,
            note: note(opts, notes),
        };
        match rows {
            ReportRows::All => TriageReport { summary, results: Some(c.rows.clone()), results_sample: None },
            ReportRows::Balanced { budget, seed } => {
                TriageReport { summary, results: None, results_sample: Some(balanced_sample(&c.rows, budget, seed)) }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &body).with_context(|| format!("writing {}", path.display()))
    }

    /// A missing or unreadable report is `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }
}
