//! Media-group debounce buffer.
//!
//! Album members arrive as separate messages sharing a `grouped_id`. Each
//! group moves through `Buffering → Finalizing → Done`:
//!
//! - every arrival (re)starts the quiescence window;
//! - once the window elapses with no new member the group is due and
//!   [`GroupBuffer::take_due`] hands it out for finalization;
//! - a finalized group is remembered as `Done`, so a straggler arriving
//!   later opens a fresh buffer that the engine merges into the stored
//!   record.
//!
//! Time is always passed in explicitly, which keeps the buffer testable
//! without sleeping. The runtime arms a timer for [`GroupBuffer::next_deadline`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::source::SourceMessage;

/// Default quiescence window.
pub const DEFAULT_GROUP_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPhase {
    Buffering,
    Finalizing,
    Done,
}

/// A complete album ready to be written, members sorted by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyGroup {
    pub grouped_id: i64,
    pub messages: Vec<SourceMessage>,
}

#[derive(Debug)]
struct PendingGroup {
    members: BTreeMap<i64, SourceMessage>,
    deadline: Instant,
}

/// Per-group debounce state, owned by the ingest runtime.
#[derive(Debug)]
pub struct GroupBuffer {
    window: Duration,
    pending: HashMap<i64, PendingGroup>,
    done: HashSet<i64>,
}

impl Default for GroupBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_WINDOW)
    }
}

impl GroupBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            done: HashSet::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Buffer an album member observed at `now`. A member with an id already
    /// buffered replaces the earlier copy.
    pub fn push(&mut self, grouped_id: i64, message: SourceMessage, now: Instant) {
        if self.done.remove(&grouped_id) {
            tracing::debug!("late member {} for finalized group {grouped_id}", message.id);
        }
        let deadline = now + self.window;
        let group = self.pending.entry(grouped_id).or_insert_with(|| PendingGroup {
            members: BTreeMap::new(),
            deadline,
        });
        group.members.insert(message.id, message);
        group.deadline = deadline;
    }

    /// Drop a member (deleted before finalization). Empties the group if it
    /// was the last one.
    pub fn forget(&mut self, message_id: i64) -> bool {
        let Some(grouped_id) = self
            .pending
            .iter()
            .find(|(_, g)| g.members.contains_key(&message_id))
            .map(|(id, _)| *id)
        else {
            return false;
        };
        if let Some(group) = self.pending.get_mut(&grouped_id) {
            group.members.remove(&message_id);
            if group.members.is_empty() {
                self.pending.remove(&grouped_id);
            }
        }
        true
    }

    pub fn phase(&self, grouped_id: i64, now: Instant) -> Option<GroupPhase> {
        if let Some(group) = self.pending.get(&grouped_id) {
            if now >= group.deadline {
                return Some(GroupPhase::Finalizing);
            }
            return Some(GroupPhase::Buffering);
        }
        self.done.contains(&grouped_id).then_some(GroupPhase::Done)
    }

    /// Earliest instant at which some group becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|g| g.deadline).min()
    }

    /// Remove and return every group whose window has elapsed at `now`,
    /// ordered by group id.
    pub fn take_due(&mut self, now: Instant) -> Vec<ReadyGroup> {
        let mut due: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, g)| now >= g.deadline)
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();
        due.into_iter().filter_map(|id| self.finalize(id)).collect()
    }

    /// Finalize everything regardless of deadlines (shutdown flush).
    pub fn take_all(&mut self) -> Vec<ReadyGroup> {
        let mut ids: Vec<i64> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.finalize(id)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    fn finalize(&mut self, grouped_id: i64) -> Option<ReadyGroup> {
        let group = self.pending.remove(&grouped_id)?;
        self.done.insert(grouped_id);
        Some(ReadyGroup {
            grouped_id,
            messages: group.members.into_values().collect(),
        })
    }
}
