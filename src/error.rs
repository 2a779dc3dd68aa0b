use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the sync engine and its collaborators.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A tracked id no longer maps to a path.
    #[error("Tracked item {0} could not be resolved to a path")]
    Resolution(String),

    /// Missing destination, uncreatable destination or invalid settings.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to copy {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A queued unit failed for a reason other than resolution or copying.
    #[error("Queued task failed: {0}")]
    Task(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
