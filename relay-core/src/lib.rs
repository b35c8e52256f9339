//! Relay core library — Post Record types, the Record Store and the Sync
//! Status Ledger shared by the ingester and every platform syncer.
//!
//! - [`types`] — [`PostId`], [`PostRecord`], [`MediaKind`], [`SyncCounts`]
//! - [`store`] — one-file-per-record store and atomic JSON writes
//! - [`status`] — the advisory catch-up ledger
//! - [`error`] — [`StoreError`]

pub mod error;
pub mod status;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use status::{StatusLedger, SyncPass, SyncStatus};
pub use store::{RecordStore, RecordSummary};
pub use types::{MediaKind, PostId, PostRecord, SyncCounts};
