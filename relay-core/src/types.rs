//! Domain types shared by the ingester and every platform syncer.
//!
//! All on-disk JSON uses camelCase field names so that records written by
//! one process are readable by every other process sharing the directory.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// PostId
// ---------------------------------------------------------------------------

/// Stable identifier of a Post Record.
///
/// Single messages serialize as a JSON integer, media albums as the string
/// `group_<groupedId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PostId {
    Message(i64),
    Group(i64),
}

impl PostId {
    /// `post_<id>` — the record file stem.
    pub fn file_stem(&self) -> String {
        format!("post_{self}")
    }

    pub fn is_group(&self) -> bool {
        matches!(self, PostId::Group(_))
    }

    /// The grouped id of an album record.
    pub fn group_id(&self) -> Option<i64> {
        match self {
            PostId::Group(id) => Some(*id),
            PostId::Message(_) => None,
        }
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostId::Message(id) => write!(f, "{id}"),
            PostId::Group(id) => write!(f, "group_{id}"),
        }
    }
}

impl FromStr for PostId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.strip_prefix("group_") {
            Some(rest) => rest.parse().map(PostId::Group),
            None => s.parse().map(PostId::Message),
        };
        parsed.map_err(|_| StoreError::InvalidId(s.to_string()))
    }
}

impl Serialize for PostId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PostId::Message(id) => serializer.serialize_i64(*id),
            PostId::Group(_) => serializer.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for PostId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(id) => Ok(PostId::Message(id)),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Kind of a media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Voice,
    WebPagePhoto,
}

impl MediaKind {
    /// File extension used when the source does not provide a file name.
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Photo | MediaKind::WebPagePhoto => "jpg",
            MediaKind::Video => "mp4",
            MediaKind::Voice => "ogg",
            MediaKind::Document => "bin",
        }
    }

    /// Prefix of the descriptive file name written under `media/<id>/`.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Voice => "voice",
            MediaKind::WebPagePhoto => "webpage",
        }
    }

    /// Infer the kind of a stored media file from its descriptive name.
    ///
    /// The prefix wins over the extension, so a `document_*.jpg` stays a
    /// document.
    pub fn from_path(path: &Path) -> MediaKind {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        for kind in [
            MediaKind::WebPagePhoto,
            MediaKind::Photo,
            MediaKind::Video,
            MediaKind::Voice,
            MediaKind::Document,
        ] {
            if name.starts_with(&format!("{}_", kind.file_prefix())) {
                return kind;
            }
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "webp" => MediaKind::Photo,
            "mp4" | "mov" | "webm" | "mkv" => MediaKind::Video,
            "ogg" | "oga" | "opus" => MediaKind::Voice,
            _ => MediaKind::Document,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

// ---------------------------------------------------------------------------
// PostRecord
// ---------------------------------------------------------------------------

/// The unit of synchronization: one source message or one media album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub id: PostId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_messages: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_msg_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_top_id: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_date: Option<i64>,
}

impl PostRecord {
    /// An empty record for `id`.
    pub fn new(id: PostId) -> Self {
        Self {
            id,
            date: None,
            edit_date: None,
            text: None,
            media: Vec::new(),
            child_messages: Vec::new(),
            reply_to_msg_id: None,
            reply_to_top_id: None,
            deleted: false,
            pinned: false,
            pinned_date: None,
        }
    }

    /// `editDate` if the record was ever edited, otherwise `date`.
    pub fn effective_edit_date(&self) -> Option<i64> {
        self.edit_date.or(self.date)
    }

    /// Caption/body, treating an empty string as absent.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Message ids whose media directories belong to this record.
    pub fn media_owner_ids(&self) -> Vec<i64> {
        match self.id {
            PostId::Message(id) => vec![id],
            PostId::Group(_) => self.child_messages.clone(),
        }
    }

    /// Carry over flags that live only on the stored copy (pin state,
    /// tombstone) into a freshly built record.
    pub fn inherit_flags(&mut self, stored: &PostRecord) {
        self.pinned = self.pinned || stored.pinned;
        self.pinned_date = self.pinned_date.or(stored.pinned_date);
        self.deleted = self.deleted || stored.deleted;
        // editDate never moves backwards.
        if let (Some(new), Some(old)) = (self.edit_date, stored.edit_date) {
            if new < old {
                self.edit_date = Some(old);
            }
        } else if self.edit_date.is_none() {
            self.edit_date = stored.edit_date;
        }
    }

    /// Delivery order: ascending `date` (missing sorts as epoch 0), then id.
    pub fn delivery_order(a: &PostRecord, b: &PostRecord) -> Ordering {
        (a.date.unwrap_or(0), a.id).cmp(&(b.date.unwrap_or(0), b.id))
    }
}

// ---------------------------------------------------------------------------
// Catch-up counters
// ---------------------------------------------------------------------------

/// Outcome counters of one catch-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub new_posts: usize,
    pub updated_posts: usize,
    pub skipped_posts: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
