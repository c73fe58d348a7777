//! Error types for the failover monitor.
//!
//! Only the I/O edges of a poll can fail: reading lists and AWStats files,
//! loading configuration, and persisting state. The core transforms never
//! return errors; they degrade to sentinel values instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FailoverError {
    /// Filesystem error, with the path that triggered it
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV encode/decode error on a tabular state file
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid TOML configuration
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP fetch of a topology list failed
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Snapshot file whose first line is not an epoch timestamp
    #[error("malformed snapshot header in {0}")]
    SnapshotHeader(String),

    /// Semantically invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Shutdown was requested before the poll wrote any state
    #[error("poll of {0} interrupted before writing state")]
    Interrupted(String),
}

impl FailoverError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FailoverError>;
