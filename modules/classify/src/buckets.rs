use crate::engine::Classification;
use anyhow::{Context, Result};
use reconkit_core::write_sorted_lines;
use rules::Label;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const UNCLASSIFIED_FILE: &str = "unclassified.txt";

pub fn bucket_file(dir: &Path, label: Label) -> PathBuf {
    dir.join(format!("{}.txt", label.as_str().to_ascii_lowercase()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub files: Vec<(String, usize)>,
}

/// One sorted, deduplicated file per final label plus the unclassified
/// bucket. Empty buckets still get a file so stale output is replaced.
pub fn write_buckets(dir: &Path, c: &Classification) -> Result<BucketCounts> {
    let mut out = BucketCounts::default();
    for label in Label::ALL {
        let path = bucket_file(dir, label);
        let urls = c.rows.iter().filter(|r| r.final_label == label).map(|r| r.url.clone());
        let n = write_sorted_lines(&path, urls).with_context(|| format!("writing {}", path.display()))?;
        out.files.push((path.display().to_string(), n));
    }
    let path = dir.join(UNCLASSIFIED_FILE);
    let n = write_sorted_lines(&path, c.unclassified.iter().cloned()).with_context(|| format!("writing {}", path.display()))?;
    out.files.push((path.display().to_string(), n));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ClassifyOptions, Classifier};
    use enrich_store::EnrichMap;
    use rules::{compile_str, RuleSet, RuleSource};

    #[test]
    fn buckets_are_sorted_and_complete() {
        let rs = RuleSet::from_reports(vec![(
            RuleSource::Custom,
            compile_str(r#"[{"id":"a","label":"LOW","pattern":"/b|/a"}]"#, RuleSource::Custom),
        )]);
        let c = Classifier::new(&rs, ClassifyOptions { demote_missing_code: false, ..Default::default() });
        let corpus: Vec<String> = ["https://example.com/b", "https://example.com/a", "https://example.com/z", "https://example.com/b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cls = c.classify(&corpus, &EnrichMap::new());
        let dir = tempfile::tempdir().unwrap();
        let counts = write_buckets(dir.path(), &cls).unwrap();
        assert_eq!(counts.files.len(), 5);
        let low = std::fs::read_to_string(bucket_file(dir.path(), Label::Low)).unwrap();
        assert_eq!(low, "https://example.com/a\nhttps://example.com/b\n");
        assert_eq!(std::fs::read_to_string(bucket_file(dir.path(), Label::High)).unwrap(), "");
        assert_eq!(std::fs::read_to_string(dir.path().join(UNCLASSIFIED_FILE)).unwrap(), "https://example.com/z\n");
    }
}
