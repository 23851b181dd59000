//! Severity triage of a URL corpus against compiled rules and enrichment.

mod buckets;
mod engine;
mod preview;
mod report;
mod sample;

pub use buckets::{bucket_file, write_buckets, BucketCounts, UNCLASSIFIED_FILE};
pub use engine::{lookup, Classification, Classifier, ClassifyOptions, LabelCounts, TriageRow};
pub use preview::{preview, Preview, PreviewSample, PreviewSummary, RuleHits, SAMPLES_PER_RULE};
pub use report::{ReportRows, TriageReport, TriageSummary};
pub use sample::{balanced_sample, quota, DEFAULT_SAMPLE_BUDGET};
