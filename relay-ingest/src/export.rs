//! File-backed source reading an exported channel directory.
//!
//! ```text
//! <source>/
//!   messages.jsonl   (one SourceMessage per line; a later line for the
//!                     same id supersedes an earlier one)
//!   events.jsonl     (one SourceEvent per line, appended over time)
//!   media/<name>     (files referenced by SourceMedia::file_name)
//! ```
//!
//! `messages.jsonl` is strict: a malformed line fails the fetch. Event lines
//! are consumed incrementally through a line cursor; a malformed event line
//! is logged and skipped, and an unterminated trailing line is left for the
//! next poll since the writer may still be appending it.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{source_io_err, SourceError};
use crate::source::{FetchQuery, Progress, SourceClient, SourceEvent, SourceMessage};

pub const MESSAGES_FILE: &str = "messages.jsonl";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const SOURCE_MEDIA_DIR: &str = "media";

/// Exported channel directory as a [`SourceClient`].
#[derive(Debug)]
pub struct ExportSource {
    root: PathBuf,
    events_consumed: usize,
}

impl ExportSource {
    /// Open the export rooted at `root`, which must be a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|e| source_io_err(&root, e))?;
        if !meta.is_dir() {
            return Err(source_io_err(
                &root,
                std::io::Error::new(ErrorKind::InvalidInput, "source path is not a directory"),
            ));
        }
        Ok(Self {
            root,
            events_consumed: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of event lines consumed so far.
    pub fn events_consumed(&self) -> usize {
        self.events_consumed
    }

    /// Skip every event already present, so a fresh run only follows new
    /// ones.
    pub fn skip_existing_events(&mut self) -> Result<(), SourceError> {
        let contents = read_optional(&self.root.join(EVENTS_FILE))?;
        self.events_consumed = contents.split_inclusive('\n').filter(|l| l.ends_with('\n')).count();
        Ok(())
    }

    fn read_messages(&self) -> Result<BTreeMap<i64, SourceMessage>, SourceError> {
        let path = self.root.join(MESSAGES_FILE);
        let contents = read_optional(&path)?;
        let mut messages = BTreeMap::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message: SourceMessage =
                serde_json::from_str(line).map_err(|source| SourceError::Parse {
                    path: path.clone(),
                    line: index + 1,
                    source,
                })?;
            messages.insert(message.id, message);
        }
        Ok(messages)
    }
}

impl SourceClient for ExportSource {
    fn name(&self) -> &str {
        "export"
    }

    fn fetch_messages(&mut self, query: &FetchQuery) -> Result<Vec<SourceMessage>, SourceError> {
        let mut messages = self.read_messages()?;
        Ok(match query {
            FetchQuery::Latest { limit } => {
                let skip = messages.len().saturating_sub(*limit);
                messages.into_values().skip(skip).collect()
            }
            FetchQuery::Ids(ids) => {
                let mut ids = ids.clone();
                ids.sort_unstable();
                ids.dedup();
                ids.iter().filter_map(|id| messages.remove(id)).collect()
            }
        })
    }

    fn download_media(
        &mut self,
        message: &SourceMessage,
        progress: Progress<'_>,
    ) -> Result<Vec<u8>, SourceError> {
        let file_name = message
            .media
            .as_ref()
            .and_then(|m| m.file_name.as_deref())
            .ok_or_else(|| SourceError::MediaUnavailable {
                message_id: message.id,
                reason: "no file name in export".to_string(),
            })?;
        let path = self.root.join(SOURCE_MEDIA_DIR).join(file_name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SourceError::MediaUnavailable {
                    message_id: message.id,
                    reason: format!("{} not found", path.display()),
                })
            }
            Err(err) => return Err(source_io_err(&path, err)),
        };
        let total = bytes.len() as u64;
        progress(total, total);
        Ok(bytes)
    }

    fn poll_events(&mut self) -> Result<Vec<SourceEvent>, SourceError> {
        let path = self.root.join(EVENTS_FILE);
        let contents = read_optional(&path)?;
        let mut events = Vec::new();
        for (index, line) in contents
            .split_inclusive('\n')
            .enumerate()
            .skip(self.events_consumed)
        {
            if !line.ends_with('\n') {
                break;
            }
            self.events_consumed = index + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SourceEvent>(line) {
                Ok(event) => events.push(event),
                Err(err) => tracing::warn!("{} line {}: skipping event: {err}", path.display(), index + 1),
            }
        }
        Ok(events)
    }
}

fn read_optional(path: &Path) -> Result<String, SourceError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(source_io_err(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn export_with(messages: &str, events: &str) -> (TempDir, ExportSource) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MESSAGES_FILE), messages).unwrap();
        fs::write(dir.path().join(EVENTS_FILE), events).unwrap();
        let source = ExportSource::open(dir.path()).unwrap();
        (dir, source)
    }

    #[test]
    fn latest_returns_the_tail_in_ascending_order() {
        let (_dir, mut source) = export_with(
            "{\"id\": 3, \"date\": 30}\n{\"id\": 1, \"date\": 10}\n{\"id\": 2, \"date\": 20}\n",
            "",
        );
        let ids: Vec<i64> = source
            .fetch_messages(&FetchQuery::Latest { limit: 2 })
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn later_line_supersedes_earlier_for_same_id() {
        let (_dir, mut source) = export_with(
            "{\"id\": 1, \"date\": 10, \"text\": \"v1\"}\n{\"id\": 1, \"date\": 10, \"editDate\": 15, \"text\": \"v2\"}\n",
            "",
        );
        let messages = source.fetch_messages(&FetchQuery::Ids(vec![1, 99])).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text.as_deref(), Some("v2"));
    }

    #[test]
    fn events_are_consumed_once_and_partial_line_waits() {
        let (dir, mut source) = export_with(
            "",
            "{\"type\": \"deleted\", \"ids\": [1]}\nnot json\n{\"type\": \"pinned\", \"ids\": [2]",
        );
        let events = source.poll_events().unwrap();
        assert_eq!(events, vec![SourceEvent::Deleted { ids: vec![1] }]);
        assert_eq!(source.events_consumed(), 2);

        let path = dir.path().join(EVENTS_FILE);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("}\n");
        fs::write(&path, contents).unwrap();

        let events = source.poll_events().unwrap();
        assert_eq!(events, vec![SourceEvent::Pinned { ids: vec![2] }]);
        assert!(source.poll_events().unwrap().is_empty());
    }

    #[test]
    fn malformed_message_line_is_an_error() {
        let (_dir, mut source) = export_with("{\"id\": 1, \"date\": 10}\n{oops\n", "");
        let err = source
            .fetch_messages(&FetchQuery::Latest { limit: 10 })
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse { line: 2, .. }));
    }

    #[test]
    fn skip_existing_events_starts_at_the_end() {
        let (_dir, mut source) = export_with("", "{\"type\": \"deleted\", \"ids\": [1]}\n");
        source.skip_existing_events().unwrap();
        assert!(source.poll_events().unwrap().is_empty());
    }
}
