use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model endpoint returned status {0}")]
    Status(u16),
    #[error("model reply is not usable: {0}")]
    BadReply(String),
    #[error("no usable rules in generator output")]
    NoRules,
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RuleError>;
