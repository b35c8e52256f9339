//! Processed-Set Ledger — per-platform record of which Post Records have
//! been acted upon, with enough metadata to detect later edits and deletes.
//!
//! Persists a [`ProcessedLedger`] JSON document at
//! `<storage>/<platform>_processed.json`, written with the same atomic
//! `.tmp` + rename pattern as the Record Store.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::store::{processed_path_at, write_json_atomic};
use relay_core::{PostId, PostRecord};

use crate::error::{io_err, SyncError};

/// What a platform last saw of one Post Record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_date: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
    /// Platform-assigned ids of every outbound message sent for the record,
    /// in send order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<String>,
}

impl ProcessedEntry {
    /// Snapshot of `record` as delivered with `message_ids`.
    pub fn delivered(record: &PostRecord, message_ids: Vec<String>) -> Self {
        Self {
            date: record.date,
            edit_date: record.edit_date,
            deleted: record.deleted,
            message_ids,
        }
    }
}

/// On-disk ledger payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedLedger {
    pub updated_at: DateTime<Utc>,
    pub posts: BTreeMap<String, ProcessedEntry>,
}

impl Default for ProcessedLedger {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            posts: BTreeMap::new(),
        }
    }
}

impl ProcessedLedger {
    pub fn get(&self, id: &PostId) -> Option<&ProcessedEntry> {
        self.posts.get(&id.to_string())
    }

    pub fn contains(&self, id: &PostId) -> bool {
        self.posts.contains_key(&id.to_string())
    }

    pub fn insert(&mut self, id: &PostId, entry: ProcessedEntry) {
        self.posts.insert(id.to_string(), entry);
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LedgerCompat {
    Structured(LedgerStructuredCompat),
    Map(BTreeMap<String, ProcessedEntry>),
    Set(Vec<PostId>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerStructuredCompat {
    updated_at: Option<DateTime<Utc>>,
    posts: BTreeMap<String, ProcessedEntry>,
}

/// Path to the ledger for `platform`, rooted at the storage directory.
pub fn path_at(root: &Path, platform: &str) -> PathBuf {
    processed_path_at(root, platform)
}

/// Load the ledger for `platform`.
///
/// Returns an empty ledger if the file does not yet exist (cold start).
/// The plain id-set and bare-map shapes are accepted and upgraded in memory.
pub fn load_at(root: &Path, platform: &str) -> Result<ProcessedLedger, SyncError> {
    let path = path_at(root, platform);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ProcessedLedger::default()),
        Err(err) => return Err(io_err(&path, err)),
    };
    let compat = serde_json::from_str::<LedgerCompat>(&contents)
        .map_err(|source| SyncError::LedgerParse { path, source })?;
    Ok(match compat {
        LedgerCompat::Structured(ledger) => ProcessedLedger {
            updated_at: ledger.updated_at.unwrap_or_else(Utc::now),
            posts: ledger.posts,
        },
        LedgerCompat::Map(posts) => ProcessedLedger {
            updated_at: Utc::now(),
            posts,
        },
        LedgerCompat::Set(ids) => ProcessedLedger {
            updated_at: Utc::now(),
            posts: ids
                .into_iter()
                .map(|id| (id.to_string(), ProcessedEntry::default()))
                .collect(),
        },
    })
}

/// Save the ledger for `platform` atomically, stamping `updated_at`.
pub fn save_at(root: &Path, platform: &str, ledger: &mut ProcessedLedger) -> Result<(), SyncError> {
    ledger.updated_at = Utc::now();
    write_json_atomic(&path_at(root, platform), ledger)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_ledger_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let ledger = load_at(tmp.path(), "botapi").unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut ledger = ProcessedLedger::default();
        let mut record = PostRecord::new(PostId::Group(4));
        record.date = Some(100);
        record.edit_date = Some(150);
        ledger.insert(
            &record.id,
            ProcessedEntry::delivered(&record, vec!["71".into(), "72".into()]),
        );

        save_at(tmp.path(), "botapi", &mut ledger).unwrap();
        let loaded = load_at(tmp.path(), "botapi").unwrap();
        assert_eq!(loaded.posts, ledger.posts);
        let entry = loaded.get(&PostId::Group(4)).expect("entry");
        assert_eq!(entry.edit_date, Some(150));
        assert_eq!(entry.message_ids, vec!["71", "72"]);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let mut ledger = ProcessedLedger::default();
        save_at(tmp.path(), "clean", &mut ledger).unwrap();
        let tmp_path = path_at(tmp.path(), "clean").with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after rename");
    }

    #[test]
    fn load_plain_id_set_migrates_to_entries() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(path_at(tmp.path(), "webhook"), r#"[1, "group_8", "3"]"#).unwrap();

        let loaded = load_at(tmp.path(), "webhook").unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.contains(&PostId::Message(1)));
        assert!(loaded.contains(&PostId::Group(8)));
        assert!(loaded.contains(&PostId::Message(3)));
    }

    #[test]
    fn load_bare_map_without_updated_at() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            path_at(tmp.path(), "botapi"),
            r#"{"5": {"date": 10, "editDate": 20, "messageIds": ["9"]}}"#,
        )
        .unwrap();

        let before = Utc::now();
        let loaded = load_at(tmp.path(), "botapi").unwrap();
        let entry = loaded.get(&PostId::Message(5)).expect("entry");
        assert_eq!(entry.edit_date, Some(20));
        assert!(!entry.deleted);
        assert!(loaded.updated_at >= before);
    }

    #[test]
    fn corrupt_ledger_is_an_error_with_path() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(path_at(tmp.path(), "botapi"), "{ not json").unwrap();
        let err = load_at(tmp.path(), "botapi").unwrap_err();
        assert!(err.to_string().contains("botapi_processed.json"));
    }
}
