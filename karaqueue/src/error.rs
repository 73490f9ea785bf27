//! Application-wide error types.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{ItemId, ItemStatus};

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    // -- admission --
    #[error("Pitch shift {value} is out of range ({min}..={max})")]
    InvalidPitchShift { value: i32, min: i32, max: i32 },

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Queue is full ({0} songs), remove some songs first")]
    QueueFull(usize),

    #[error("Each user may only have {0} songs in the queue")]
    UserQuotaExceeded(usize),

    // -- pipeline --
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Media unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Media is {actual_secs}s long, the limit is {limit_secs}s")]
    DurationLimitExceeded { actual_secs: u64, limit_secs: u64 },

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    // -- queue manager --
    #[error("Stale transition for item {id}: expected {expected}, found {}", status_or_evicted(.actual))]
    StaleTransition {
        id: ItemId,
        expected: ItemStatus,
        actual: Option<ItemStatus>,
    },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    #[error("Invalid position {position}, queue has {len} songs")]
    InvalidPosition { position: usize, len: usize },

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Item {0} not found")]
    NotFound(ItemId),

    #[error("Queue manager has stopped")]
    ManagerStopped,

    // -- infrastructure --
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {path}: {source}")]
    IoPath {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

fn status_or_evicted(status: &Option<ItemStatus>) -> &'static str {
    status.map_or("evicted", ItemStatus::as_str)
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.display().to_string(),
            source,
        }
    }

    pub fn timed_out(stage: &str, after: Duration) -> Self {
        Self::Fetch(format!("{} timed out after {}s", stage, after.as_secs()))
    }

    /// Whether a fetch that failed with this error may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch(_) => true,
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_body()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }

    /// Internal bookkeeping errors are never shown to users.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            Self::StaleTransition { .. } | Self::InvalidTransition { .. }
        )
    }

    /// Failure reason recorded on an item.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<process_utils::RunError> for Error {
    fn from(err: process_utils::RunError) -> Self {
        Self::Transcode(err.to_string())
    }
}
