//! Error types for relay-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from Record Store and status ledger operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load — includes the offending file path.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A post identifier string could not be interpreted.
    #[error("invalid post id '{0}'; expected an integer or group_<n>")]
    InvalidId(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
