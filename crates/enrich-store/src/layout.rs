use crate::error::{Result, StoreError};
use std::path::{Path, PathBuf};

/// Cross-module union snapshot file name.
pub const GLOBAL_SNAPSHOT: &str = "url_enrich.json";
const SNAPSHOT_SUFFIX: &str = "_enrich.json";

/// Where one scope keeps its files: `<outputs>/<scope>/__cache/...`.
#[derive(Debug, Clone)]
pub struct ScopeLayout {
    scope: String,
    base: PathBuf,
}

impl ScopeLayout {
    pub fn new(outputs: &Path, scope: &str) -> Result<Self> {
        check_name("scope", scope)?;
        Ok(ScopeLayout { scope: scope.to_string(), base: outputs.join(scope) })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base.join("__cache")
    }

    pub fn module_snapshot(&self, module: &str) -> Result<PathBuf> {
        check_name("module", module)?;
        if module == "url" {
            return Err(StoreError::InvalidName { kind: "module", name: module.to_string() });
        }
        Ok(self.cache_dir().join(format!("{module}{SNAPSHOT_SUFFIX}")))
    }

    pub fn global_snapshot(&self) -> PathBuf {
        self.cache_dir().join(GLOBAL_SNAPSHOT)
    }

    pub fn url_audit(&self) -> PathBuf {
        self.cache_dir().join("url_probe.ndjson")
    }

    pub fn host_audit(&self) -> PathBuf {
        self.cache_dir().join("probes_host.ndjson")
    }

    pub fn ip_edges(&self) -> PathBuf {
        self.cache_dir().join("host_ip_edges.ndjson")
    }

    pub fn host_index(&self) -> PathBuf {
        self.cache_dir().join("host_index.json")
    }

    pub fn rollup(&self) -> PathBuf {
        self.cache_dir().join("rollup_group_by_ip.json")
    }

    pub fn lock_marker(&self, module: &str) -> Result<PathBuf> {
        check_name("module", module)?;
        Ok(self.cache_dir().join(format!("{module}.lock")))
    }

    pub fn triage_report(&self) -> PathBuf {
        self.cache_dir().join("ai_classify.json")
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.cache_dir().join("rules")
    }

    pub fn buckets_dir(&self) -> PathBuf {
        self.base.join("triage")
    }
}

fn check_name(kind: &'static str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidName { kind, name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_scope_cache() {
        let l = ScopeLayout::new(Path::new("/out"), "example.com").unwrap();
        assert_eq!(l.global_snapshot(), Path::new("/out/example.com/__cache/url_enrich.json"));
        assert_eq!(
            l.module_snapshot("probe_urls").unwrap(),
            Path::new("/out/example.com/__cache/probe_urls_enrich.json")
        );
    }

    #[test]
    fn rejects_traversal_and_reserved_names() {
        assert!(ScopeLayout::new(Path::new("/out"), "../etc").is_err());
        assert!(ScopeLayout::new(Path::new("/out"), "a/b").is_err());
        let l = ScopeLayout::new(Path::new("/out"), "example.com").unwrap();
        assert!(l.module_snapshot("url").is_err());
        assert!(l.module_snapshot("").is_err());
    }
}
