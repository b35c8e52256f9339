//! Sync Status Ledger — a single JSON document overwritten on every
//! transition of the producer's catch-up pass.
//!
//! The ledger is advisory: consumers poll it to avoid reading records while
//! a bulk pass rewrites them. Any read failure means "not in progress" so a
//! crashed or absent producer can never deadlock a consumer.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::store::{status_path_at, write_json_atomic};
use crate::types::SyncCounts;

/// On-disk ledger content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    InProgress {
        #[serde(rename = "startTime")]
        start_time: DateTime<Utc>,
        limit: usize,
    },
    Completed {
        #[serde(rename = "startTime")]
        start_time: DateTime<Utc>,
        #[serde(rename = "endTime")]
        end_time: DateTime<Utc>,
        #[serde(rename = "newPosts")]
        new_posts: usize,
        #[serde(rename = "updatedPosts")]
        updated_posts: usize,
        #[serde(rename = "skippedPosts")]
        skipped_posts: usize,
    },
    Failed {
        #[serde(rename = "startTime")]
        start_time: DateTime<Utc>,
        #[serde(rename = "endTime")]
        end_time: DateTime<Utc>,
        error: String,
    },
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::InProgress { .. } => "in_progress",
            SyncStatus::Completed { .. } => "completed",
            SyncStatus::Failed { .. } => "failed",
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        match self {
            SyncStatus::InProgress { start_time, .. }
            | SyncStatus::Completed { start_time, .. }
            | SyncStatus::Failed { start_time, .. } => *start_time,
        }
    }
}

/// Token for a running catch-up pass; consumed by `complete` / `fail` so a
/// pass cannot be closed twice.
#[derive(Debug)]
#[must_use = "a started pass must be completed or failed"]
pub struct SyncPass {
    started_at: DateTime<Utc>,
    limit: usize,
}

impl SyncPass {
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Handle on `<storage>/telegram_sync_status.json`.
#[derive(Debug, Clone)]
pub struct StatusLedger {
    path: PathBuf,
}

impl StatusLedger {
    /// Ledger rooted in the storage directory `root`.
    pub fn at(root: &Path) -> Self {
        Self {
            path: status_path_at(root),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark a catch-up pass as running. Overwrites any prior status.
    pub fn begin(&self, limit: usize) -> Result<SyncPass, StoreError> {
        let started_at = Utc::now();
        write_json_atomic(
            &self.path,
            &SyncStatus::InProgress {
                start_time: started_at,
                limit,
            },
        )?;
        tracing::info!("catch-up pass started (limit {limit})");
        Ok(SyncPass { started_at, limit })
    }

    /// Record a successful pass.
    pub fn complete(&self, pass: SyncPass, counts: SyncCounts) -> Result<(), StoreError> {
        write_json_atomic(
            &self.path,
            &SyncStatus::Completed {
                start_time: pass.started_at,
                end_time: Utc::now(),
                new_posts: counts.new_posts,
                updated_posts: counts.updated_posts,
                skipped_posts: counts.skipped_posts,
            },
        )?;
        tracing::info!(
            "catch-up pass completed: {} new, {} updated, {} skipped",
            counts.new_posts,
            counts.updated_posts,
            counts.skipped_posts
        );
        Ok(())
    }

    /// Record a failed pass.
    pub fn fail(&self, pass: SyncPass, error: impl Into<String>) -> Result<(), StoreError> {
        let error = error.into();
        tracing::error!("catch-up pass failed: {error}");
        write_json_atomic(
            &self.path,
            &SyncStatus::Failed {
                start_time: pass.started_at,
                end_time: Utc::now(),
                error,
            },
        )
    }

    /// Current status, or `None` if the file is absent or unreadable.
    pub fn read(&self) -> Option<SyncStatus> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!("cannot read {}: {err}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(status) => Some(status),
            Err(err) => {
                tracing::warn!("malformed {}: {err}", self.path.display());
                None
            }
        }
    }

    /// Fail-open check used by consumers before touching records.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress_since().is_some()
    }

    /// Start time of the running pass, if one is in progress.
    pub fn in_progress_since(&self) -> Option<DateTime<Utc>> {
        match self.read() {
            Some(SyncStatus::InProgress { start_time, .. }) => Some(start_time),
            _ => None,
        }
    }

    /// Discard a ledger left behind by a previous (possibly crashed) run.
    pub fn clear_on_startup(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("cleared stale sync status {}", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&self.path, err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
