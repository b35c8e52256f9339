use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Error surface for the ingest and syncer runtimes.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] relay_core::StoreError),

    #[error("ingest error: {0}")]
    Ingest(#[from] relay_ingest::IngestError),

    #[error("sync error: {0}")]
    Sync(#[from] relay_sync::SyncError),

    #[error("{platform}: connection test failed: {source}")]
    Connection {
        platform: String,
        #[source]
        source: relay_sync::SendError,
    },

    #[error("task join failure: {0}")]
    Join(String),

    #[error("signal handler failed: {0}")]
    Signal(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
