//! Relay ingest library — the single producer of Post Records.
//!
//! - [`source`] — [`SourceClient`] contract and normalized message/event types
//! - [`export`] — [`ExportSource`], a file-backed source
//! - [`media`] — media download with mtime-based reuse
//! - [`grouping`] — album debounce buffer
//! - [`engine`] — [`IngestEngine`]: catch-up pass and live event handling

pub mod engine;
pub mod error;
pub mod export;
pub mod grouping;
pub mod media;
pub mod source;

pub use engine::{CatchUpOutcome, IngestEngine};
pub use error::{IngestError, SourceError};
pub use export::ExportSource;
pub use grouping::{GroupBuffer, GroupPhase, ReadyGroup, DEFAULT_GROUP_WINDOW};
pub use source::{FetchQuery, Progress, SourceClient, SourceEvent, SourceMedia, SourceMessage};
