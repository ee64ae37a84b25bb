//! Error types for the halgraph library.

use std::time::Duration;

/// Top-level error enum for graph ingestion and validation.
///
/// A file that fails to parse is not an error: it is reported through
/// [`crate::indexer::model::FailedFile`] and the repository keeps going.
#[derive(Debug, thiserror::Error)]
pub enum HalgraphError {
    /// The staged repository graph could not be committed. The previous
    /// snapshot of the repository is untouched.
    #[error("graph write for repository '{repository}' failed: {message}")]
    GraphWrite { repository: String, message: String },

    #[error("validation exceeded its budget of {0:?}")]
    ValidationTimeout(Duration),

    #[error("validation was cancelled")]
    Cancelled,

    #[error("validation task failed: {0}")]
    Task(String),

    #[error("unknown repository: {0}")]
    UnknownRepository(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HalgraphError {
    pub fn storage(err: anyhow::Error) -> Self {
        HalgraphError::Storage(format!("{:#}", err))
    }
}

pub type HalgraphResult<T> = Result<T, HalgraphError>;
