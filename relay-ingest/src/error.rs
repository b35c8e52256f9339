//! Error types for relay-ingest.

use std::path::PathBuf;

use thiserror::Error;

use relay_core::StoreError;

/// Failure reported by a [`SourceClient`](crate::source::SourceClient).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line of a source feed could not be decoded.
    #[error("failed to parse {path} line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The message carries media that cannot be downloaded.
    #[error("media of message {message_id} unavailable: {reason}")]
    MediaUnavailable { message_id: i64, reason: String },
}

/// All errors that can arise from the Ingestion Engine.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`IngestError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> IngestError {
    IngestError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SourceError::Io`].
pub(crate) fn source_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SourceError {
    SourceError::Io {
        path: path.into(),
        source,
    }
}
