//! # relay-sync
//!
//! Consumer side of the relay: the per-platform Processed-Set Ledger, the
//! Sender Adapter contract with its HTTP implementations, and the generic
//! [`PlatformSyncer`] that replays Post Records in order.

pub mod error;
pub mod http;
pub mod ledger;
pub mod sender;
pub mod syncer;

pub use error::{SendError, SyncError};
pub use http::{BotApiConfig, BotApiSender, WebhookConfig, WebhookSender};
pub use ledger::{ProcessedEntry, ProcessedLedger};
pub use sender::{Capabilities, SendResult, SenderAdapter};
pub use syncer::{CycleOutcome, PassReport, PlatformSyncer, RecordAction, SyncerOptions, SyncerState};
