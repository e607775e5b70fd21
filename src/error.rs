use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A fetched candidate that lacked a required field and was dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("event {} is missing `{field}`", id.as_deref().unwrap_or("<unknown>"))]
pub struct ValidationError {
    pub id: Option<String>,
    pub field: &'static str,
}

/// Opening the event store failed before or during schema setup.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to create directory for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("storage failed: {0}")]
    Storage(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("unable to build message: {0}")]
    Message(String),
    #[error("smtp error: {0}")]
    Transport(String),
    #[error("{channel} notifier failed: {reason}")]
    Channel {
        channel: &'static str,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown timezone {name}: {reason}")]
    Timezone { name: String, reason: String },
    #[error("invalid recipient address: {0}")]
    Recipient(String),
}
