//! Durable merge-on-write enrichment cache for one recon scope.
//!
//! Probe batches accumulate records in memory and publish them at an explicit
//! commit point; every individual result is also appended to an audit log.

mod audit;
mod batch;
mod cache;
mod error;
mod hosts;
mod layout;
mod lock;
mod merge;
mod models;
mod store;

pub use audit::{AuditLog, IpEdge};
pub use batch::{CommitSummary, HostBatch, HostCommitSummary, UrlBatch};
pub use cache::{load_snapshot, save_snapshot, SnapshotCache};
pub use error::{Result, StoreError};
pub use hosts::{build_rollup, merge_host, HostIndex, HostObservation, HostRecord, HostStatus, IpRollup, RollupHost};
pub use layout::{ScopeLayout, GLOBAL_SNAPSHOT};
pub use lock::{ProbeLock, ProbeRegistry, RunInfo};
pub use merge::{merge_maps, merge_record};
pub use models::{EnrichMap, EnrichRecord};
pub use store::EnrichStore;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

pub fn now_epoch() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
