//! Platform Syncer — replays Post Records to one downstream platform in
//! source order and reconciles later edits and deletes.
//!
//! ## Lifecycle
//!
//! `Loading → WaitingForProducer → InitialCatchUp → Watching → ShuttingDown`
//!
//! The syncer itself is synchronous: the daemon runtime owns timers, the
//! producer wait and signal handling, and calls [`PlatformSyncer::catch_up`]
//! once followed by [`PlatformSyncer::watch_cycle`] on every tick.
//!
//! ## Fatal stop
//!
//! Any send failure persists the ledger and is returned to the caller, which
//! must stop its loop. Skipping a failed item would let later posts overtake
//! it.

use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use relay_core::{PostId, PostRecord, RecordStore, StatusLedger};

use crate::error::{SendError, SyncError};
use crate::ledger::{self, ProcessedEntry, ProcessedLedger};
use crate::sender::SenderAdapter;

/// Where a syncer is in its lifecycle. There is no way back from
/// `Watching` to `InitialCatchUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncerState {
    Loading,
    WaitingForProducer,
    InitialCatchUp,
    Watching,
    ShuttingDown,
}

/// Tuning knobs for one syncer instance.
#[derive(Debug, Clone)]
pub struct SyncerOptions {
    /// Pause between consecutive media items of one record.
    pub media_delay: Duration,
}

impl Default for SyncerOptions {
    fn default() -> Self {
        Self {
            media_delay: Duration::from_secs(1),
        }
    }
}

/// What happened to a single record during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    /// Sent for the first time.
    Delivered,
    /// Already processed; an edit was propagated (or recorded).
    Edited,
    /// Already processed; a delete was propagated.
    Deleted,
    /// Already processed and unchanged; local copy dropped.
    Cleaned,
    /// Tombstoned before it was ever delivered; dropped without sending.
    Discarded,
    /// Already processed; left on disk for the watch loop.
    Deferred,
}

/// Per-pass counters, logged by the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub delivered: usize,
    pub edited: usize,
    pub deleted: usize,
    pub cleaned: usize,
    pub discarded: usize,
    pub deferred: usize,
}

impl PassReport {
    fn count(&mut self, action: RecordAction) {
        match action {
            RecordAction::Delivered => self.delivered += 1,
            RecordAction::Edited => self.edited += 1,
            RecordAction::Deleted => self.deleted += 1,
            RecordAction::Cleaned => self.cleaned += 1,
            RecordAction::Discarded => self.discarded += 1,
            RecordAction::Deferred => self.deferred += 1,
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == PassReport::default()
    }
}

/// Result of one watch tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The producer is mid catch-up; nothing was read or sent.
    ProducerBusy,
    Processed(PassReport),
}

/// One downstream platform's consumer of the shared Record Store.
pub struct PlatformSyncer<S: SenderAdapter> {
    store: RecordStore,
    status: StatusLedger,
    sender: S,
    ledger: ProcessedLedger,
    options: SyncerOptions,
    state: SyncerState,
}

impl<S: SenderAdapter> PlatformSyncer<S> {
    /// `Loading`: read the platform's processed ledger (absent = cold start).
    pub fn load(store: RecordStore, sender: S, options: SyncerOptions) -> Result<Self, SyncError> {
        let ledger = ledger::load_at(store.root(), sender.platform())?;
        tracing::info!(
            "{}: loaded processed ledger with {} entries",
            sender.platform(),
            ledger.len()
        );
        let status = StatusLedger::at(store.root());
        Ok(Self {
            store,
            status,
            sender,
            ledger,
            options,
            state: SyncerState::WaitingForProducer,
        })
    }

    pub fn platform(&self) -> &str {
        self.sender.platform()
    }

    pub fn state(&self) -> SyncerState {
        self.state
    }

    pub fn ledger(&self) -> &ProcessedLedger {
        &self.ledger
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn status_ledger(&self) -> &StatusLedger {
        &self.status
    }

    /// Whether the producer currently reports a catch-up pass.
    pub fn producer_busy(&self) -> bool {
        self.status.is_in_progress()
    }

    /// `InitialCatchUp`: deliver every non-deleted record this platform has
    /// not processed yet, in ascending `date` order.
    ///
    /// Records already in the ledger are left for the first watch cycle.
    pub fn catch_up(&mut self) -> Result<PassReport, SyncError> {
        self.state = SyncerState::InitialCatchUp;
        let report = self.run_pass(true)?;
        self.state = SyncerState::Watching;
        tracing::info!(
            "{}: initial catch-up delivered {} record(s), discarded {}",
            self.platform(),
            report.delivered,
            report.discarded
        );
        Ok(report)
    }

    /// One `Watching` tick. Skips entirely while the producer is busy.
    pub fn watch_cycle(&mut self) -> Result<CycleOutcome, SyncError> {
        self.state = SyncerState::Watching;
        if self.producer_busy() {
            tracing::debug!("{}: producer sync in progress, skipping cycle", self.platform());
            return Ok(CycleOutcome::ProducerBusy);
        }
        self.run_pass(false).map(CycleOutcome::Processed)
    }

    /// `ShuttingDown`: flush the ledger.
    pub fn shutdown(&mut self) -> Result<(), SyncError> {
        self.state = SyncerState::ShuttingDown;
        self.persist()
    }

    fn run_pass(&mut self, initial: bool) -> Result<PassReport, SyncError> {
        let records = self.store.load_ordered()?;
        let mut report = PassReport::default();
        for record in records {
            match self.handle(&record, initial) {
                Ok(action) => report.count(action),
                Err(err) => {
                    if let Err(persist_err) = self.persist() {
                        tracing::error!(
                            "{}: failed to persist ledger after error: {persist_err}",
                            self.platform()
                        );
                    }
                    return Err(err);
                }
            }
        }
        Ok(report)
    }

    fn handle(&mut self, record: &PostRecord, initial: bool) -> Result<RecordAction, SyncError> {
        if self.ledger.contains(&record.id) {
            if initial {
                return Ok(RecordAction::Deferred);
            }
            return self.reconcile(record);
        }
        if record.deleted {
            tracing::info!(
                "{}: post {} deleted before delivery, dropping",
                self.platform(),
                record.id
            );
            self.remove_local(&record.id)?;
            return Ok(RecordAction::Discarded);
        }
        self.deliver(record)?;
        Ok(RecordAction::Delivered)
    }

    /// Send `record`, record it in the ledger, persist, and drop the local
    /// copy.
    pub fn deliver(&mut self, record: &PostRecord) -> Result<(), SyncError> {
        let message_ids = self.send_record(record)?;
        self.ledger
            .insert(&record.id, ProcessedEntry::delivered(record, message_ids));
        self.persist()?;
        self.remove_local(&record.id)?;
        tracing::info!("{}: delivered post {}", self.platform(), record.id);
        Ok(())
    }

    fn send_record(&self, record: &PostRecord) -> Result<Vec<String>, SyncError> {
        let text = record.text();
        let media: Vec<&Path> = record
            .media
            .iter()
            .map(|p| p.as_path())
            .filter(|p| {
                let present = p.exists();
                if !present {
                    tracing::warn!(
                        "{}: post {}: media file {} missing, skipping item",
                        self.platform(),
                        record.id,
                        p.display()
                    );
                }
                present
            })
            .collect();

        let mut message_ids = Vec::new();
        if media.is_empty() {
            let Some(text) = text else {
                if record.media.is_empty() {
                    tracing::warn!(
                        "{}: post {} has neither media nor text, marking processed",
                        self.platform(),
                        record.id
                    );
                } else {
                    tracing::warn!(
                        "{}: post {}: all {} media file(s) missing and no text, marking processed without sending",
                        self.platform(),
                        record.id,
                        record.media.len()
                    );
                }
                return Ok(message_ids);
            };
            let id = self
                .sender
                .send_text(text, record.pinned)
                .map_err(|e| self.send_err(&record.id, "sendText", e))?;
            message_ids.extend(id);
            return Ok(message_ids);
        }

        for (index, path) in media.iter().enumerate() {
            if index > 0 && !self.options.media_delay.is_zero() {
                sleep(self.options.media_delay);
            }
            let caption = if index == 0 { text } else { None };
            let pin = index == 0 && record.pinned;
            let id = self
                .sender
                .send_media(path, caption, pin)
                .map_err(|e| self.send_err(&record.id, "sendMedia", e))?;
            message_ids.extend(id);
        }
        Ok(message_ids)
    }

    /// Apply the platform's rule for an id it has already processed.
    fn reconcile(&mut self, record: &PostRecord) -> Result<RecordAction, SyncError> {
        let caps = self.sender.capabilities();
        if !caps.tracks_mutations() {
            self.remove_local(&record.id)?;
            return Ok(RecordAction::Cleaned);
        }

        let Some(cached) = self.ledger.get(&record.id).cloned() else {
            return Ok(RecordAction::Deferred);
        };

        if record.deleted && !cached.deleted {
            if caps.delete {
                for outbound in &cached.message_ids {
                    self.sender
                        .delete_message(outbound)
                        .map_err(|e| self.send_err(&record.id, "deleteMessage", e))?;
                }
            }
            self.ledger.insert(
                &record.id,
                ProcessedEntry {
                    deleted: true,
                    ..cached
                },
            );
            self.persist()?;
            self.remove_local(&record.id)?;
            tracing::info!("{}: propagated delete of post {}", self.platform(), record.id);
            return Ok(RecordAction::Deleted);
        }

        if !record.deleted && record.edit_date != cached.edit_date {
            if caps.edit {
                self.propagate_edit(record, &cached)?;
            }
            self.ledger.insert(
                &record.id,
                ProcessedEntry {
                    edit_date: record.edit_date,
                    ..cached
                },
            );
            self.persist()?;
            self.remove_local(&record.id)?;
            tracing::info!("{}: propagated edit of post {}", self.platform(), record.id);
            return Ok(RecordAction::Edited);
        }

        self.remove_local(&record.id)?;
        Ok(RecordAction::Cleaned)
    }

    fn propagate_edit(&self, record: &PostRecord, cached: &ProcessedEntry) -> Result<(), SyncError> {
        let Some(outbound) = cached.message_ids.first() else {
            tracing::warn!(
                "{}: post {} edited but no outbound id was stored",
                self.platform(),
                record.id
            );
            return Ok(());
        };
        // Missing text never blanks a delivered caption.
        let Some(text) = record.text() else {
            tracing::warn!(
                "{}: post {} edited but has no text, leaving the delivered copy as is",
                self.platform(),
                record.id
            );
            return Ok(());
        };
        if record.media.is_empty() {
            self.sender
                .edit_text(outbound, text)
                .map_err(|e| self.send_err(&record.id, "editText", e))
        } else {
            self.sender
                .edit_caption(outbound, text)
                .map_err(|e| self.send_err(&record.id, "editCaption", e))
        }
    }

    fn remove_local(&self, id: &PostId) -> Result<(), SyncError> {
        if self.sender.capabilities().retain_media {
            self.store.remove_record(id)?;
        } else {
            self.store.remove_media_and_record(id)?;
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<(), SyncError> {
        let platform = self.sender.platform().to_string();
        ledger::save_at(self.store.root(), &platform, &mut self.ledger)
    }

    fn send_err(&self, id: &PostId, operation: &'static str, source: SendError) -> SyncError {
        SyncError::Send {
            platform: self.platform().to_string(),
            id: id.to_string(),
            operation,
            source,
        }
    }
}
