//! Media download into `media/<messageId>/<descriptive-name>`.
//!
//! A file already on disk is reused when its mtime is not older than the
//! message's effective edit timestamp, so repeated catch-up passes do not
//! re-download unchanged media.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use relay_core::RecordStore;

use crate::error::{io_err, IngestError};
use crate::source::{SourceClient, SourceMedia, SourceMessage};

/// `<kind>_<messageId>.<ext>`; the extension comes from the original file
/// name when present.
pub fn descriptive_name(message_id: i64, media: &SourceMedia) -> String {
    let ext = media
        .file_name
        .as_deref()
        .map(Path::new)
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| media.kind.default_extension().to_string());
    format!("{}_{message_id}.{ext}", media.kind.file_prefix())
}

/// `false` when `path` exists with an mtime at or after `effective_edit`
/// (seconds since epoch).
pub fn needs_download(path: &Path, effective_edit: i64) -> Result<bool, IngestError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(io_err(path, err)),
    };
    let modified = meta.modified().map_err(|e| io_err(path, e))?;
    Ok(unix_seconds(modified) < effective_edit)
}

/// Ensure the media of `message` is on disk and return its path.
///
/// Returns `Ok(None)` for messages without media.
pub fn fetch<C: SourceClient + ?Sized>(
    store: &RecordStore,
    source: &mut C,
    message: &SourceMessage,
) -> Result<Option<PathBuf>, IngestError> {
    let Some(media) = &message.media else {
        return Ok(None);
    };
    let dir = store.media_dir(message.id);
    let path = dir.join(descriptive_name(message.id, media));
    let effective = message.edit_date.unwrap_or(message.date);
    if !needs_download(&path, effective)? {
        tracing::debug!("media for message {} is current, reusing {}", message.id, path.display());
        return Ok(Some(path));
    }

    let mut last_logged = 0u64;
    let mut progress = |received: u64, total: u64| {
        if total == 0 {
            return;
        }
        let percent = received * 100 / total;
        if percent >= last_logged + 25 {
            last_logged = percent;
            tracing::debug!("message {}: downloaded {percent}%", message.id);
        }
    };
    let bytes = source.download_media(message, &mut progress)?;

    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let part = path.with_extension("part");
    fs::write(&part, &bytes).map_err(|e| io_err(&part, e))?;
    if let Err(err) = fs::rename(&part, &path) {
        let _ = fs::remove_file(&part);
        return Err(io_err(&path, err));
    }
    tracing::info!(
        "downloaded {} media for message {} ({} bytes)",
        media.kind,
        message.id,
        bytes.len()
    );
    Ok(Some(path))
}

fn unix_seconds(timestamp: SystemTime) -> i64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
