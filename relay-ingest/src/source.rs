//! Source collaborator contract.
//!
//! The Ingestion Engine never talks to the source channel directly; it goes
//! through a [`SourceClient`], which hands out normalized
//! [`SourceMessage`]s and [`SourceEvent`]s. The real-time subscription and
//! authentication of a live channel stay behind this trait.
//!
//! # Available sources
//!
//! - [`ExportSource`](crate::export::ExportSource) — reads an exported
//!   channel directory (`messages.jsonl`, `events.jsonl`, `media/`)

use serde::{Deserialize, Serialize};

use relay_core::MediaKind;

use crate::error::SourceError;

/// Media attached to a source message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMedia {
    pub kind: MediaKind,
    /// Original file name, when the source provides one. Only its extension
    /// is used for the stored file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// One message as observed on the source channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMessage {
    pub id: i64,
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Album key shared by every member of a media group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<SourceMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_msg_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_top_id: Option<i64>,
    #[serde(default)]
    pub pinned: bool,
}

/// Live update delivered by [`SourceClient::poll_events`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEvent {
    New { message: SourceMessage },
    Edited { message: SourceMessage },
    Deleted { ids: Vec<i64> },
    Pinned { ids: Vec<i64> },
}

impl SourceEvent {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceEvent::New { .. } => "new",
            SourceEvent::Edited { .. } => "edited",
            SourceEvent::Deleted { .. } => "deleted",
            SourceEvent::Pinned { .. } => "pinned",
        }
    }
}

/// Which messages to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchQuery {
    /// The most recent `limit` messages.
    Latest { limit: usize },
    /// Specific message ids; unknown ids are silently absent from the result.
    Ids(Vec<i64>),
}

/// Download progress callback: `(received_bytes, total_bytes)`.
pub type Progress<'a> = &'a mut dyn FnMut(u64, u64);

/// A source channel.
pub trait SourceClient: Send {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &str;

    /// Fetch messages, returned in ascending id order.
    fn fetch_messages(&mut self, query: &FetchQuery) -> Result<Vec<SourceMessage>, SourceError>;

    /// Download the media attached to `message`.
    fn download_media(
        &mut self,
        message: &SourceMessage,
        progress: Progress<'_>,
    ) -> Result<Vec<u8>, SourceError>;

    /// Drain the events that arrived since the previous call.
    fn poll_events(&mut self) -> Result<Vec<SourceEvent>, SourceError>;
}
