//! Core utilities and shared types for the recon pipeline.

pub mod canon;
pub mod corpus;
pub mod fsio;
pub mod limits;
pub mod scope;

pub use canon::{canonicalize, parse_url, ParsedUrl};
pub use corpus::{load_targets, read_lines, CorpusStats};
pub use fsio::{atomic_write, write_sorted_lines};
pub use limits::HostLimiter;
pub use scope::{ScopeDecision, ScopeError, ScopeFilter};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A corpus entry after canonicalization: either a full URL or a bare host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub key: String,
    pub parsed: ParsedUrl,
}

impl Target {
    pub fn parse(raw: &str) -> Option<Self> {
        parse_url(raw).map(Target::from)
    }

    pub fn host(&self) -> &str {
        self.parsed.bare_host()
    }

    pub fn is_bare(&self) -> bool {
        self.parsed.is_bare()
    }
}

impl From<ParsedUrl> for Target {
    fn from(parsed: ParsedUrl) -> Self {
        Target { key: parsed.key(), parsed }
    }
}
