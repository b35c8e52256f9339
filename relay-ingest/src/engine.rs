//! Ingestion Engine — turns source messages and live events into Post
//! Records in the Record Store.
//!
//! The engine is the only writer of records and of the Sync Status Ledger.
//! It is synchronous; the daemon runtime owns the event poll timer and the
//! album window timer and calls into it.
//!
//! # Catch-up
//!
//! [`IngestEngine::sync_latest_posts`] fetches the most recent messages,
//! groups album members directly (no debounce needed) and classifies each
//! candidate:
//!
//! | stored record | `editDate`   | outcome   |
//! |---------------|--------------|-----------|
//! | absent        | any          | new       |
//! | present       | differs      | updated   |
//! | present       | same         | skipped   |
//!
//! The whole pass is bracketed by `begin` / `complete` / `fail` on the
//! status ledger so syncers keep their hands off the store meanwhile.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;

use relay_core::{PostId, PostRecord, RecordStore, StatusLedger, SyncCounts};

use crate::error::IngestError;
use crate::grouping::{GroupBuffer, GroupPhase, ReadyGroup};
use crate::media;
use crate::source::{FetchQuery, SourceClient, SourceEvent, SourceMessage};

/// Album members are consecutive ids; this many on each side of a member
/// are fetched when an album has to be rediscovered at the source.
const ALBUM_SPAN: i64 = 9;

/// How a catch-up candidate was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUpOutcome {
    New,
    Updated,
    Skipped,
}

/// One unit of a catch-up pass: a single message or a whole album.
#[derive(Debug, Clone)]
enum Candidate {
    Single(SourceMessage),
    Group(ReadyGroup),
}

impl Candidate {
    fn id(&self) -> PostId {
        match self {
            Candidate::Single(message) => PostId::Message(message.id),
            Candidate::Group(group) => PostId::Group(group.grouped_id),
        }
    }

    fn edit_date(&self) -> Option<i64> {
        match self {
            Candidate::Single(message) => message.edit_date,
            Candidate::Group(group) => group.messages.iter().filter_map(|m| m.edit_date).max(),
        }
    }
}

/// Split fetched messages into singles and albums, in ascending id order of
/// each candidate's first message.
fn candidates(messages: Vec<SourceMessage>) -> Vec<Candidate> {
    let mut singles = Vec::new();
    let mut albums: BTreeMap<i64, Vec<SourceMessage>> = BTreeMap::new();
    for message in messages {
        match message.grouped_id {
            Some(grouped_id) => albums.entry(grouped_id).or_default().push(message),
            None => singles.push(message),
        }
    }

    let mut out: Vec<(i64, Candidate)> = singles
        .into_iter()
        .map(|m| (m.id, Candidate::Single(m)))
        .collect();
    for (grouped_id, mut messages) in albums {
        messages.sort_by_key(|m| m.id);
        let first = messages.first().map(|m| m.id).unwrap_or_default();
        out.push((first, Candidate::Group(ReadyGroup { grouped_id, messages })));
    }
    out.sort_by_key(|(first, _)| *first);
    out.into_iter().map(|(_, c)| c).collect()
}

/// The single producer of Post Records.
pub struct IngestEngine<C: SourceClient> {
    store: RecordStore,
    status: StatusLedger,
    source: C,
    groups: GroupBuffer,
}

impl<C: SourceClient> IngestEngine<C> {
    pub fn new(store: RecordStore, source: C, group_window: Duration) -> Self {
        let status = StatusLedger::at(store.root());
        Self {
            store,
            status,
            source,
            groups: GroupBuffer::new(group_window),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn status(&self) -> &StatusLedger {
        &self.status
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut C {
        &mut self.source
    }

    pub fn groups(&self) -> &GroupBuffer {
        &self.groups
    }

    /// Discard a status ledger left by a previous run.
    pub fn clear_stale_status(&self) -> Result<(), IngestError> {
        self.status.clear_on_startup()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Catch-up
    // -----------------------------------------------------------------------

    /// Bounded catch-up over the most recent `limit` messages.
    ///
    /// Errors on individual candidates are logged and counted as skipped.
    /// Errors that abort the pass are recorded as `failed` and returned.
    pub fn sync_latest_posts(&mut self, limit: usize) -> Result<SyncCounts, IngestError> {
        let pass = self.status.begin(limit)?;
        match self.catch_up(limit) {
            Ok(counts) => {
                self.status.complete(pass, counts)?;
                Ok(counts)
            }
            Err(err) => {
                if let Err(status_err) = self.status.fail(pass, err.to_string()) {
                    tracing::error!("could not record failed catch-up: {status_err}");
                }
                Err(err)
            }
        }
    }

    fn catch_up(&mut self, limit: usize) -> Result<SyncCounts, IngestError> {
        let messages = self.source.fetch_messages(&FetchQuery::Latest { limit })?;
        tracing::info!(
            "catch-up: {} message(s) fetched from {}",
            messages.len(),
            self.source.name()
        );
        let mut counts = SyncCounts::default();
        for candidate in candidates(messages) {
            let id = candidate.id();
            match self.apply_candidate(candidate) {
                Ok(CatchUpOutcome::New) => counts.new_posts += 1,
                Ok(CatchUpOutcome::Updated) => counts.updated_posts += 1,
                Ok(CatchUpOutcome::Skipped) => counts.skipped_posts += 1,
                Err(err) => {
                    tracing::warn!("catch-up: post {id} skipped after error: {err}");
                    counts.skipped_posts += 1;
                }
            }
        }
        Ok(counts)
    }

    fn apply_candidate(&mut self, candidate: Candidate) -> Result<CatchUpOutcome, IngestError> {
        let id = candidate.id();
        let stored = self.store.get_available(&id)?;
        match stored {
            None => {
                let record = self.build(&candidate)?;
                self.store.put(&record)?;
                tracing::debug!("catch-up: new post {id}");
                Ok(CatchUpOutcome::New)
            }
            Some(stored) if stored.deleted => Ok(CatchUpOutcome::Skipped),
            Some(stored) if stored.edit_date != candidate.edit_date() => {
                let mut record = self.build(&candidate)?;
                record.inherit_flags(&stored);
                self.store.put(&record)?;
                tracing::debug!("catch-up: updated post {id}");
                Ok(CatchUpOutcome::Updated)
            }
            Some(_) => Ok(CatchUpOutcome::Skipped),
        }
    }

    fn build(&mut self, candidate: &Candidate) -> Result<PostRecord, IngestError> {
        match candidate {
            Candidate::Single(message) => self.build_record(message),
            Candidate::Group(group) => self.build_group_record(group.grouped_id, &group.messages),
        }
    }

    // -----------------------------------------------------------------------
    // Record construction
    // -----------------------------------------------------------------------

    /// Build the record for a single message, downloading its media.
    pub fn build_record(&mut self, message: &SourceMessage) -> Result<PostRecord, IngestError> {
        let mut record = PostRecord::new(PostId::Message(message.id));
        record.date = Some(message.date);
        record.edit_date = message.edit_date;
        record.text = message.text.clone();
        record.reply_to_msg_id = message.reply_to_msg_id;
        record.reply_to_top_id = message.reply_to_top_id;
        record.pinned = message.pinned;
        if let Some(path) = media::fetch(&self.store, &mut self.source, message)? {
            record.media.push(path);
        }
        Ok(record)
    }

    /// Build an album record. Members are ordered by id; the caption is the
    /// first non-empty member text.
    pub fn build_group_record(
        &mut self,
        grouped_id: i64,
        messages: &[SourceMessage],
    ) -> Result<PostRecord, IngestError> {
        let mut members = messages.to_vec();
        members.sort_by_key(|m| m.id);
        members.dedup_by_key(|m| m.id);

        let mut record = PostRecord::new(PostId::Group(grouped_id));
        if let Some(first) = members.first() {
            record.date = Some(first.date);
            record.reply_to_msg_id = first.reply_to_msg_id;
            record.reply_to_top_id = first.reply_to_top_id;
        }
        record.edit_date = members.iter().filter_map(|m| m.edit_date).max();
        record.text = members
            .iter()
            .filter_map(|m| m.text.clone())
            .find(|t| !t.is_empty());
        record.pinned = members.iter().any(|m| m.pinned);
        record.child_messages = members.iter().map(|m| m.id).collect();
        for member in &members {
            if let Some(path) = media::fetch(&self.store, &mut self.source, member)? {
                record.media.push(path);
            }
        }
        Ok(record)
    }

    /// Write `record`, keeping pin state and tombstone of any stored copy.
    fn write_merged(&self, mut record: PostRecord) -> Result<(), IngestError> {
        if let Some(stored) = self.store.get_available(&record.id)? {
            record.inherit_flags(&stored);
        }
        self.store.put(&record)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Live events
    // -----------------------------------------------------------------------

    /// Apply one live event observed at `now`.
    pub fn handle_event(&mut self, event: SourceEvent, now: Instant) -> Result<(), IngestError> {
        match event {
            SourceEvent::New { message } => self.on_new(message, now),
            SourceEvent::Edited { message } => self.on_edit(message, now),
            SourceEvent::Deleted { ids } => self.on_delete(&ids),
            SourceEvent::Pinned { ids } => self.on_pin(&ids),
        }
    }

    fn on_new(&mut self, message: SourceMessage, now: Instant) -> Result<(), IngestError> {
        if let Some(grouped_id) = message.grouped_id {
            self.groups.push(grouped_id, message, now);
            return Ok(());
        }
        let record = self.build_record(&message)?;
        self.write_merged(record)?;
        tracing::info!("new post {}", message.id);
        Ok(())
    }

    fn on_edit(&mut self, message: SourceMessage, now: Instant) -> Result<(), IngestError> {
        let Some(grouped_id) = message.grouped_id else {
            let record = self.build_record(&message)?;
            self.write_merged(record)?;
            tracing::info!("edited post {}", message.id);
            return Ok(());
        };

        if matches!(
            self.groups.phase(grouped_id, now),
            Some(GroupPhase::Buffering | GroupPhase::Finalizing)
        ) {
            self.groups.push(grouped_id, message, now);
            return Ok(());
        }
        let children = match self.store.get_available(&PostId::Group(grouped_id))? {
            Some(stored) => stored.child_messages,
            None => self.album_children(grouped_id, message.id)?,
        };
        self.rebuild_group(grouped_id, &children, vec![message])
    }

    /// Member ids of album `grouped_id` when its record is gone: the album
    /// index first, else the source's messages around `member_id`.
    fn album_children(&mut self, grouped_id: i64, member_id: i64) -> Result<Vec<i64>, IngestError> {
        let indexed = self.store.album_members(grouped_id)?;
        if !indexed.is_empty() {
            return Ok(indexed);
        }
        let around: Vec<i64> = (member_id - ALBUM_SPAN..=member_id + ALBUM_SPAN).collect();
        let mut children: Vec<i64> = self
            .source
            .fetch_messages(&FetchQuery::Ids(around))?
            .into_iter()
            .filter(|m| m.grouped_id == Some(grouped_id))
            .map(|m| m.id)
            .collect();
        children.push(member_id);
        children.sort_unstable();
        children.dedup();
        tracing::debug!(
            "album group_{grouped_id} not indexed, found {} member(s) at the source",
            children.len()
        );
        Ok(children)
    }

    /// Re-fetch every member of an album and rewrite its record. `fresh`
    /// members take precedence over what the source returns.
    fn rebuild_group(
        &mut self,
        grouped_id: i64,
        children: &[i64],
        fresh: Vec<SourceMessage>,
    ) -> Result<(), IngestError> {
        let missing: Vec<i64> = children
            .iter()
            .copied()
            .filter(|id| !fresh.iter().any(|m| m.id == *id))
            .collect();
        let mut members = if missing.is_empty() {
            Vec::new()
        } else {
            self.source.fetch_messages(&FetchQuery::Ids(missing))?
        };
        members.extend(fresh);
        let record = self.build_group_record(grouped_id, &members)?;
        self.write_merged(record)?;
        tracing::info!("rebuilt album group_{grouped_id} ({} members)", members.len());
        Ok(())
    }

    /// Build a whole album record around one member fetched on demand.
    fn build_album_from_source(
        &mut self,
        grouped_id: i64,
        member: SourceMessage,
    ) -> Result<PostRecord, IngestError> {
        let children = self.album_children(grouped_id, member.id)?;
        let others: Vec<i64> = children.into_iter().filter(|id| *id != member.id).collect();
        let mut members = if others.is_empty() {
            Vec::new()
        } else {
            self.source.fetch_messages(&FetchQuery::Ids(others))?
        };
        members.push(member);
        self.build_group_record(grouped_id, &members)
    }

    /// Tombstone every id. Records a syncer already delivered and removed
    /// are recreated as bare tombstones so the delete still reaches it.
    fn on_delete(&mut self, ids: &[i64]) -> Result<(), IngestError> {
        for &id in ids {
            let buffered = self.groups.forget(id);
            if buffered {
                tracing::debug!("dropped buffered album member {id}");
            }
            if let Some(mut record) = self.store.get_available(&PostId::Message(id))? {
                record.deleted = true;
                self.store.put(&record)?;
                self.store.remove_media_dir(id);
                tracing::info!("post {id} deleted");
                continue;
            }
            let grouped_id = match self.store.find_group_containing(id)? {
                Some(group) => group.id.group_id(),
                None => self.store.album_of(id)?,
            };
            match grouped_id {
                Some(grouped_id) => self.tombstone_album(grouped_id, id)?,
                None if buffered => {}
                None => {
                    let mut tombstone = PostRecord::new(PostId::Message(id));
                    tombstone.deleted = true;
                    self.store.put(&tombstone)?;
                    self.store.remove_media_dir(id);
                    tracing::info!("post {id} deleted (no local record)");
                }
            }
        }
        Ok(())
    }

    fn tombstone_album(&mut self, grouped_id: i64, via: i64) -> Result<(), IngestError> {
        let id = PostId::Group(grouped_id);
        let mut group = match self.store.get_available(&id)? {
            Some(group) => group,
            None => {
                let mut group = PostRecord::new(id);
                group.child_messages = self.store.album_members(grouped_id)?;
                group
            }
        };
        if !group.deleted {
            group.deleted = true;
            self.store.put(&group)?;
            tracing::info!("album {id} deleted via member {via}");
        }
        for child in &group.child_messages {
            self.store.remove_media_dir(*child);
        }
        Ok(())
    }

    fn on_pin(&mut self, ids: &[i64]) -> Result<(), IngestError> {
        let pinned_at = Utc::now().timestamp();
        for &id in ids {
            let existing = match self.store.get_available(&PostId::Message(id))? {
                Some(record) => Some(record),
                None => self.store.find_group_containing(id)?,
            };
            let mut record = match existing {
                Some(record) => record,
                None => {
                    let fetched = self.source.fetch_messages(&FetchQuery::Ids(vec![id]))?;
                    let Some(message) = fetched.into_iter().find(|m| m.id == id) else {
                        tracing::warn!("pin for message {id} not found on {}", self.source.name());
                        continue;
                    };
                    match message.grouped_id {
                        Some(grouped_id) => self.build_album_from_source(grouped_id, message)?,
                        None => self.build_record(&message)?,
                    }
                }
            };
            record.pinned = true;
            record.pinned_date = Some(pinned_at);
            self.store.put(&record)?;
            tracing::info!("post {} pinned", record.id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Album finalization
    // -----------------------------------------------------------------------

    /// Earliest instant at which a buffered album becomes due.
    pub fn next_group_deadline(&self) -> Option<Instant> {
        self.groups.next_deadline()
    }

    /// Finalize every album whose window has elapsed at `now`. Returns the
    /// number of records written; failures are logged per album.
    pub fn flush_due_groups(&mut self, now: Instant) -> usize {
        let ready = self.groups.take_due(now);
        self.finalize_all(ready)
    }

    /// Finalize every buffered album regardless of deadlines.
    pub fn flush_all_groups(&mut self) -> usize {
        let ready = self.groups.take_all();
        self.finalize_all(ready)
    }

    fn finalize_all(&mut self, ready: Vec<ReadyGroup>) -> usize {
        let mut written = 0;
        for group in ready {
            let grouped_id = group.grouped_id;
            match self.finalize_group(group) {
                Ok(()) => written += 1,
                Err(err) => tracing::warn!("album group_{grouped_id} not written: {err}"),
            }
        }
        written
    }

    fn finalize_group(&mut self, group: ReadyGroup) -> Result<(), IngestError> {
        let ReadyGroup {
            grouped_id,
            messages,
        } = group;
        // A straggler after finalization merges with the stored album.
        if let Some(stored) = self.store.get_available(&PostId::Group(grouped_id))? {
            let mut children = stored.child_messages.clone();
            children.extend(messages.iter().map(|m| m.id));
            children.sort_unstable();
            children.dedup();
            return self.rebuild_group(grouped_id, &children, messages);
        }
        let record = self.build_group_record(grouped_id, &messages)?;
        self.write_merged(record)?;
        tracing::info!(
            "new album group_{grouped_id} with {} member(s)",
            messages.len()
        );
        Ok(())
    }
}
