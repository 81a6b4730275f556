use std::path::PathBuf;
use thiserror::Error;

/// Soft transport failure. Callers treat this as "no result" and move on.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("invalid url {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme in {0}")]
    UnsupportedScheme(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchFailure {
    pub fn is_connect(&self) -> bool {
        matches!(self, FetchFailure::Connect(_))
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchFailure::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchFailure::Connect(e.to_string())
        } else if e.is_builder() {
            FetchFailure::InvalidUrl(e.to_string())
        } else {
            FetchFailure::Transport(e.to_string())
        }
    }
}

/// Resume-contract violations. These stop the run.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("no scan state found at {0}")]
    Missing(PathBuf),

    #[error("scan state at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to persist scan state to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}
