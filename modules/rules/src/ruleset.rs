//! The merged, ordered set of rules a classification run uses.

use crate::compile::{compile_file, CompileReport, CompiledRule, Dropped};
use crate::label::RuleSource;
use crate::seed::seed_report;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where a non-seed source lives under the rules directory.
pub fn rules_file(dir: &Path, source: RuleSource) -> PathBuf {
    dir.join(format!("{}_rules.json", source.as_str()))
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    sources: Vec<RuleSource>,
    pub dropped: Vec<(RuleSource, Dropped)>,
    pub notes: Vec<String>,
}

impl RuleSet {
    /// Merge reports in load order. A later source replaces an earlier rule
    /// with the same id entirely. Rules end up sorted by id.
    pub fn from_reports(reports: Vec<(RuleSource, CompileReport)>) -> Self {
        let mut by_id: BTreeMap<String, CompiledRule> = BTreeMap::new();
        let mut set = RuleSet::default();
        for (source, report) in reports {
            if !report.rules.is_empty() && !set.sources.contains(&source) {
                set.sources.push(source);
            }
            for rule in report.rules {
                by_id.insert(rule.id.clone(), rule);
            }
            set.dropped.extend(report.dropped.into_iter().map(|d| (source, d)));
            set.notes.extend(report.notes);
        }
        set.rules = by_id.into_values().collect();
        set
    }

    /// Load the requested sources in seed, custom, ai order. Seed rules are
    /// bundled; the others are read from `dir`.
    pub fn load(dir: &Path, sources: &[RuleSource]) -> Self {
        let reports = RuleSource::LOAD_ORDER
            .into_iter()
            .filter(|s| sources.contains(s))
            .map(|s| {
                let report = match s {
                    RuleSource::Seed => seed_report(),
                    other => compile_file(&rules_file(dir, other), other),
                };
                (s, report)
            })
            .collect();
        let set = RuleSet::from_reports(reports);
        info!(rules = set.len(), dropped = set.dropped.len(), version = %set.version(), "rules loaded");
        set
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.binary_search_by(|r| r.id.as_str().cmp(id)).ok().map(|i| &self.rules[i])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Contributing sources joined with `+`, e.g. `seed+custom`.
    pub fn version(&self) -> String {
        if self.sources.is_empty() {
            return "none".into();
        }
        self.sources.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("+")
    }
}
