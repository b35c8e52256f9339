//! Record Store — one JSON file per Post Record plus a media blob area.
//!
//! # Storage layout
//!
//! ```text
//! <storage>/
//!   post_<id>.json                 (single message)
//!   post_group_<groupedId>.json    (media album)
//!   media/<messageId>/<name>       (media blobs)
//!   telegram_sync_status.json      (status ledger, see `status`)
//!   <platform>_processed.json      (one per platform syncer)
//!   album_index.json               (album id → member message ids)
//! ```
//!
//! The album index outlives the album records: syncers remove a record once
//! it is delivered, but a later delete or edit of one member must still be
//! traced back to its album.
//!
//! Writes use the `.tmp` sibling + `rename` pattern so readers never see a
//! partially written record. Readers still tolerate a missing or malformed
//! file by treating it as "not yet available".

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::{PostId, PostRecord};

/// File name of the Sync Status Ledger.
pub const STATUS_FILE: &str = "telegram_sync_status.json";

/// Name of the media blob directory.
pub const MEDIA_DIR: &str = "media";

/// File name of the album member index.
pub const ALBUM_INDEX_FILE: &str = "album_index.json";

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<root>/post_<id>.json` — pure, no I/O.
pub fn record_path_at(root: &Path, id: &PostId) -> PathBuf {
    root.join(format!("{}.json", id.file_stem()))
}

/// `<root>/telegram_sync_status.json` — pure, no I/O.
pub fn status_path_at(root: &Path) -> PathBuf {
    root.join(STATUS_FILE)
}

/// `<root>/<platform>_processed.json` — pure, no I/O.
pub fn processed_path_at(root: &Path, platform: &str) -> PathBuf {
    root.join(format!("{platform}_processed.json"))
}

/// `<root>/album_index.json` — pure, no I/O.
pub fn album_index_path_at(root: &Path) -> PathBuf {
    root.join(ALBUM_INDEX_FILE)
}

/// `<root>/media/<message_id>/` — pure, no I/O.
pub fn media_dir_at(root: &Path, message_id: i64) -> PathBuf {
    root.join(MEDIA_DIR).join(message_id.to_string())
}

/// Parse `post_<id>.json` back into a [`PostId`]. Returns `None` for any
/// other file (tmp siblings, ledgers, stray files).
pub fn post_id_from_file_name(name: &str) -> Option<PostId> {
    let stem = name.strip_prefix("post_")?.strip_suffix(".json")?;
    stem.parse().ok()
}

// ---------------------------------------------------------------------------
// 2. Atomic JSON write
// ---------------------------------------------------------------------------

/// Serialize `value` and atomically replace `path` with it.
///
/// Write flow: serialize → `<path>.tmp` → `rename`. The `.tmp` file lives in
/// the same directory as the target so the rename never crosses filesystems.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// 3. Album index
// ---------------------------------------------------------------------------

/// Every album ever written, keyed by grouped id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AlbumIndex {
    #[serde(default)]
    albums: BTreeMap<i64, Vec<i64>>,
}

impl AlbumIndex {
    /// Union `children` into the entry for `grouped_id`. Returns whether the
    /// index changed.
    fn merge(&mut self, grouped_id: i64, children: &[i64]) -> bool {
        let entry = self.albums.entry(grouped_id).or_default();
        let before = entry.len();
        entry.extend_from_slice(children);
        entry.sort_unstable();
        entry.dedup();
        entry.len() != before
    }

    fn album_of(&self, message_id: i64) -> Option<i64> {
        self.albums
            .iter()
            .find(|(_, members)| members.contains(&message_id))
            .map(|(grouped_id, _)| *grouped_id)
    }
}

// ---------------------------------------------------------------------------
// 4. RecordStore
// ---------------------------------------------------------------------------

/// Lightweight listing entry; the record itself is loaded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub id: PostId,
    pub path: PathBuf,
}

/// Handle on a storage directory shared by the ingester and the syncers.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    /// Open (and create if needed) the storage directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let media = root.join(MEDIA_DIR);
        fs::create_dir_all(&media).map_err(|e| io_err(&media, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, id: &PostId) -> PathBuf {
        record_path_at(&self.root, id)
    }

    pub fn media_dir(&self, message_id: i64) -> PathBuf {
        media_dir_at(&self.root, message_id)
    }

    /// Atomically overwrite the file for `record.id`. Album records also
    /// extend the album index with their children.
    pub fn put(&self, record: &PostRecord) -> Result<(), StoreError> {
        if let PostId::Group(grouped_id) = record.id {
            if !record.child_messages.is_empty() {
                self.index_album(grouped_id, &record.child_messages)?;
            }
        }
        write_json_atomic(&self.record_path(&record.id), record)
    }

    /// Current on-disk state, or `None` if never created or already removed.
    ///
    /// Malformed content is an error; pollers should prefer [`get_available`].
    ///
    /// [`get_available`]: RecordStore::get_available
    pub fn get(&self, id: &PostId) -> Result<Option<PostRecord>, StoreError> {
        let path = self.record_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&path, err)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Parse { path, source })
    }

    /// Like [`get`](RecordStore::get) but a truncated or malformed file is
    /// reported as `None` so the caller retries on its next poll.
    pub fn get_available(&self, id: &PostId) -> Result<Option<PostRecord>, StoreError> {
        match self.get(id) {
            Err(StoreError::Parse { path, source }) => {
                tracing::debug!(
                    "record not yet available: {} ({source})",
                    path.display()
                );
                Ok(None)
            }
            other => other,
        }
    }

    /// Whether a record file currently exists for `id`.
    pub fn contains(&self, id: &PostId) -> bool {
        self.record_path(id).exists()
    }

    /// Enumerate record files, sorted by file name.
    pub fn list(&self) -> Result<Vec<RecordSummary>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&self.root, err)),
        };
        let mut summaries: Vec<RecordSummary> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                post_id_from_file_name(&name).map(|id| RecordSummary { id, path: e.path() })
            })
            .collect();
        summaries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(summaries)
    }

    /// Load every available record, ordered for delivery (ascending `date`).
    pub fn load_ordered(&self) -> Result<Vec<PostRecord>, StoreError> {
        let mut records = Vec::new();
        for summary in self.list()? {
            if let Some(record) = self.get_available(&summary.id)? {
                records.push(record);
            }
        }
        records.sort_by(PostRecord::delivery_order);
        Ok(records)
    }

    /// Delete every media file referenced by the record, the media
    /// directories of its messages, and the record file itself.
    ///
    /// Best-effort per media file: failures are logged and skipped. Only a
    /// failure to remove the record file is returned.
    pub fn remove_media_and_record(&self, id: &PostId) -> Result<(), StoreError> {
        if let Some(record) = self.get_available(id)? {
            for path in &record.media {
                remove_file_quiet(path);
            }
            for message_id in record.media_owner_ids() {
                self.remove_media_dir(message_id);
            }
        }
        self.remove_record(id)
    }

    /// Delete only the record file. A missing file is not an error.
    pub fn remove_record(&self, id: &PostId) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    /// Remove `media/<message_id>/` recursively. Best-effort.
    pub fn remove_media_dir(&self, message_id: i64) {
        let dir = self.media_dir(message_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => tracing::debug!("removed media dir {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!("failed to remove {}: {err}", dir.display()),
        }
    }

    /// Member message ids of album `grouped_id`, as last indexed. Empty when
    /// the album was never written.
    pub fn album_members(&self, grouped_id: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .load_album_index()?
            .albums
            .remove(&grouped_id)
            .unwrap_or_default())
    }

    /// Grouped id of the album that `message_id` belongs to, even after the
    /// album record itself was removed.
    pub fn album_of(&self, message_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self.load_album_index()?.album_of(message_id))
    }

    fn index_album(&self, grouped_id: i64, children: &[i64]) -> Result<(), StoreError> {
        let mut index = self.load_album_index()?;
        if index.merge(grouped_id, children) {
            write_json_atomic(&album_index_path_at(&self.root), &index)?;
        }
        Ok(())
    }

    fn load_album_index(&self) -> Result<AlbumIndex, StoreError> {
        let path = album_index_path_at(&self.root);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(AlbumIndex::default()),
            Err(err) => return Err(io_err(&path, err)),
        };
        serde_json::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
    }

    /// Find the album record listing `message_id` among its children.
    pub fn find_group_containing(&self, message_id: i64) -> Result<Option<PostRecord>, StoreError> {
        for summary in self.list()? {
            if !summary.id.is_group() {
                continue;
            }
            if let Some(record) = self.get_available(&summary.id)? {
                if record.child_messages.contains(&message_id) {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }
}

fn remove_file_quiet(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::warn!("failed to remove {}: {err}", path.display()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = RecordStore::open(dir.path()).expect("open");
        (dir, store)
    }

    fn text_record(id: i64, date: i64) -> PostRecord {
        let mut record = PostRecord::new(PostId::Message(id));
        record.date = Some(date);
        record.text = Some(format!("post {id}"));
        record
    }

    #[test]
    fn record_path_is_correct() {
        let path = record_path_at(Path::new("/data"), &PostId::Group(3));
        assert_eq!(path, PathBuf::from("/data/post_group_3.json"));
    }

    #[test]
    fn file_name_parsing_ignores_non_records() {
        assert_eq!(post_id_from_file_name("post_12.json"), Some(PostId::Message(12)));
        assert_eq!(post_id_from_file_name("post_group_4.json"), Some(PostId::Group(4)));
        assert_eq!(post_id_from_file_name("post_12.json.tmp"), None);
        assert_eq!(post_id_from_file_name(STATUS_FILE), None);
        assert_eq!(post_id_from_file_name("botapi_processed.json"), None);
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, store) = make_store();
        let record = text_record(1, 100);
        store.put(&record).expect("put");
        assert_eq!(store.get(&record.id).expect("get"), Some(record));
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let (_dir, store) = make_store();
        let record = text_record(1, 100);
        store.put(&record).expect("put");
        let tmp = tmp_path(&store.record_path(&record.id));
        assert!(!tmp.exists(), ".tmp must be gone after successful put");
    }

    #[test]
    fn get_missing_returns_none() {
        let (_dir, store) = make_store();
        assert_eq!(store.get(&PostId::Message(9)).expect("get"), None);
    }

    #[test]
    fn truncated_record_is_not_yet_available() {
        let (_dir, store) = make_store();
        let id = PostId::Message(5);
        fs::write(store.record_path(&id), b"{\"id\": 5, \"da").expect("write");
        assert!(matches!(store.get(&id), Err(StoreError::Parse { .. })));
        assert_eq!(store.get_available(&id).expect("available"), None);
    }

    #[test]
    fn list_skips_tmp_and_ledgers() {
        let (dir, store) = make_store();
        store.put(&text_record(1, 100)).unwrap();
        store.put(&text_record(2, 200)).unwrap();
        fs::write(dir.path().join("post_3.json.tmp"), b"{}").unwrap();
        fs::write(status_path_at(dir.path()), b"{}").unwrap();
        fs::write(processed_path_at(dir.path(), "botapi"), b"{}").unwrap();

        let ids: Vec<PostId> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![PostId::Message(1), PostId::Message(2)]);
    }

    #[test]
    fn load_ordered_sorts_by_date() {
        let (_dir, store) = make_store();
        store.put(&text_record(1, 100)).unwrap();
        store.put(&text_record(2, 300)).unwrap();
        store.put(&text_record(3, 200)).unwrap();

        let dates: Vec<i64> = store
            .load_ordered()
            .unwrap()
            .into_iter()
            .filter_map(|r| r.date)
            .collect();
        assert_eq!(dates, vec![100, 200, 300]);
    }

    #[test]
    fn remove_media_and_record_is_best_effort() {
        let (_dir, store) = make_store();
        let media_dir = store.media_dir(7);
        fs::create_dir_all(&media_dir).unwrap();
        let photo = media_dir.join("photo_7.jpg");
        fs::write(&photo, b"jpeg").unwrap();

        let mut record = text_record(7, 10);
        record.media = vec![photo.clone(), media_dir.join("missing.jpg")];
        store.put(&record).unwrap();

        store.remove_media_and_record(&record.id).expect("remove");
        assert!(!photo.exists());
        assert!(!media_dir.exists());
        assert!(!store.contains(&record.id));

        // Second removal is a no-op.
        store.remove_media_and_record(&record.id).expect("remove again");
    }

    #[test]
    fn find_group_containing_child() {
        let (_dir, store) = make_store();
        let mut group = PostRecord::new(PostId::Group(55));
        group.child_messages = vec![10, 11, 12];
        store.put(&group).unwrap();
        store.put(&text_record(11, 5)).unwrap();

        let found = store.find_group_containing(11).unwrap().expect("group");
        assert_eq!(found.id, PostId::Group(55));
        assert!(store.find_group_containing(99).unwrap().is_none());
    }

    #[test]
    fn album_index_survives_record_removal() {
        let (dir, store) = make_store();
        let mut group = PostRecord::new(PostId::Group(8));
        group.child_messages = vec![40, 41];
        store.put(&group).unwrap();
        store.remove_media_and_record(&group.id).unwrap();

        assert!(!store.contains(&group.id));
        assert_eq!(store.album_of(41).unwrap(), Some(8));
        assert_eq!(store.album_members(8).unwrap(), vec![40, 41]);
        assert_eq!(store.album_of(99).unwrap(), None);
        assert_eq!(post_id_from_file_name(ALBUM_INDEX_FILE), None);
        assert!(album_index_path_at(dir.path()).exists());
    }

    #[test]
    fn album_index_merges_late_members_without_rewriting() {
        let (dir, store) = make_store();
        let mut group = PostRecord::new(PostId::Group(3));
        group.child_messages = vec![10, 11];
        store.put(&group).unwrap();
        let index_path = album_index_path_at(dir.path());
        let first = fs::read(&index_path).unwrap();

        store.put(&group).unwrap();
        assert_eq!(fs::read(&index_path).unwrap(), first);

        group.child_messages = vec![12];
        store.put(&group).unwrap();
        assert_eq!(store.album_members(3).unwrap(), vec![10, 11, 12]);
    }
}
