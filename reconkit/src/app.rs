//! Process-wide state, created once in `main` and passed down by reference.

use crate::config::Config;
use anyhow::{Context, Result};
use enrich_store::{EnrichStore, ProbeRegistry, SnapshotCache};
use reconkit_core::{read_lines, ScopeFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct AppContext {
    pub outputs: PathBuf,
    pub config: Config,
    pub cache: Arc<SnapshotCache>,
    pub registry: ProbeRegistry,
}

impl AppContext {
    pub fn new(outputs: PathBuf, config: Config) -> Self {
        Self { outputs, config, cache: Arc::new(SnapshotCache::new()), registry: ProbeRegistry::new() }
    }

    pub fn store(&self, scope: &str) -> Result<EnrichStore> {
        EnrichStore::open(&self.outputs, scope, self.cache.clone()).with_context(|| format!("opening store for scope {scope:?}"))
    }

    /// Scope filter for `root`; flag lists extend the config lists.
    pub fn scope_filter(&self, root: &str, allow: &[String], deny: &[String], include_external: bool) -> Result<ScopeFilter> {
        let cfg = self.config.scope.clone().unwrap_or_default();
        let allow: Vec<String> = cfg.allow.unwrap_or_default().into_iter().chain(allow.iter().cloned()).collect();
        let deny: Vec<String> = cfg.deny.unwrap_or_default().into_iter().chain(deny.iter().cloned()).collect();
        Ok(ScopeFilter::new(root)
            .with_allow(allow)?
            .with_deny(deny)?
            .include_external(include_external || cfg.include_external.unwrap_or(false)))
    }

    /// The corpus for a scope: `input` if given, else `<scope>/urls.txt`, else
    /// the keys of the global enrichment snapshot.
    pub fn corpus(&self, store: &EnrichStore, input: Option<&Path>) -> Result<Vec<String>> {
        if let Some(p) = input {
            return read_lines(p).with_context(|| format!("reading corpus {}", p.display()));
        }
        let default = store.layout().base().join("urls.txt");
        if default.exists() {
            debug!(path = %default.display(), "using scope corpus");
            return read_lines(&default).with_context(|| format!("reading corpus {}", default.display()));
        }
        debug!("no corpus file, falling back to enrichment keys");
        Ok(store.read_global().keys().cloned().collect())
    }
}
