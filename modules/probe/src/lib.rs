//! Bounded-concurrency HTTP probing that feeds the enrichment store.
//!
//! Every prober fans out one task per target under a global semaphore and
//! drains results from a channel in completion order. Only the draining
//! loop touches the batch.

mod fetch;
mod host_probe;
mod options;
mod path_probe;
mod url_probe;

pub use fetch::{extract_title, observe, observe_request, Observation, RequestSpec};
pub use host_probe::{probe_hosts, resolve_ips};
pub use options::{build_client, parse_header, resolve_user_agent, AlivePolicy, ProbeOptions, SchemeOrder};
pub use path_probe::{live_bases, load_path_specs, probe_paths, PathSpec, SAFE_METHODS};
pub use url_probe::probe_urls;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stops the scheduler from issuing new requests. In-flight requests are left
/// to finish or hit their own timeout.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the signal after `after` elapses. Needs a running runtime.
    pub fn stop_after(&self, after: Duration) {
        let s = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            s.stop();
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub done: usize,
    pub alive: usize,
    pub errors: usize,
}

impl BatchStats {
    fn observe(&mut self, alive: bool, failed: bool) {
        self.done += 1;
        if alive {
            self.alive += 1;
        }
        if failed {
            self.errors += 1;
        }
    }

    /// Targets the scheduler never started because the batch was stopped.
    pub fn skipped(&self) -> usize {
        self.total.saturating_sub(self.done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_skips() {
        let mut s = BatchStats { total: 3, ..Default::default() };
        s.observe(true, false);
        s.observe(false, true);
        assert_eq!((s.done, s.alive, s.errors, s.skipped()), (2, 1, 1, 1));
    }

    #[tokio::test]
    async fn stop_after_raises_signal() {
        let s = StopSignal::new();
        s.stop_after(Duration::from_millis(10));
        assert!(!s.is_stopped());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(s.is_stopped());
    }
}
