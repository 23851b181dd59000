use std::path::PathBuf;

/// Errors surfaced to the operator. Corrupt snapshots are not errors; they
/// load as empty maps.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot encode {path:?}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid {kind} name {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("a probe run for {scope}/{module} is already active ({reason})")]
    Busy {
        scope: String,
        module: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = StoreError::InvalidName { kind: "scope", name: "../x".into() };
        assert_eq!(err.to_string(), "invalid scope name \"../x\"");
        let err = StoreError::Busy { scope: "example.com".into(), module: "probe_urls".into(), reason: "lock marker present".into() };
        assert!(err.to_string().contains("example.com/probe_urls"));
    }
}
