//! Error types for relay-sync.

use std::path::PathBuf;

use thiserror::Error;

use relay_core::StoreError;

/// Failure reported by a [`SenderAdapter`](crate::sender::SenderAdapter).
///
/// Adapters never signal failure through a `false` return; every
/// non-success response becomes one of these.
#[derive(Debug, Error)]
pub enum SendError {
    /// The platform answered with `ok: false`.
    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    /// Transport-level failure (DNS, TLS, connection reset, ...).
    #[error("{operation} failed: {message}")]
    Http {
        operation: &'static str,
        message: String,
    },

    /// The response body was not the expected JSON shape.
    #[error("{operation} returned an unreadable response: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },

    /// Reading a local media file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The platform does not implement this operation.
    #[error("{operation} is not supported by this platform")]
    Unsupported { operation: &'static str },
}

/// All errors that can arise from syncer operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the Record Store or status ledger.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Processed-Set Ledger JSON could not be parsed.
    #[error("failed to parse processed ledger at {path}: {source}")]
    LedgerParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A send/edit/delete call failed. Fatal for the watch loop.
    #[error("{platform}: {operation} for post {id} failed: {source}")]
    Send {
        platform: String,
        id: String,
        operation: &'static str,
        #[source]
        source: SendError,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
