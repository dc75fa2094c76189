//! Buzz arbitration: who gets to answer.
//!
//! Each room has its own slot behind its own mutex, so buzzes in different
//! rooms never contend and buzzes in the same room are decided one at a time.
//! The window check-and-set in [`Arbitrator::try_buzz_for`] is the only place
//! a winner is chosen.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use buzzline_common::model::{BuzzMode, ParticipantId, QuestionId, RoomId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuzzWindow {
    pub open: bool,
    pub question_id: QuestionId,
    pub winner: Option<ParticipantId>,
    pub locked_at: Option<DateTime<Utc>>,
}

/// A place in line. Entries are never removed, only deactivated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuzzQueueEntry {
    pub seq: u64,
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
    pub buzzed_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("already in queue")]
    AlreadyQueued,
    #[error("no players in queue")]
    Empty,
}

#[derive(Debug, Default)]
struct BuzzQueue {
    entries: Vec<BuzzQueueEntry>,
    next_seq: u64,
}

impl BuzzQueue {
    /// Append a participant, returning their 1-based position among active entries.
    fn push(
        &mut self,
        room_id: &RoomId,
        participant_id: ParticipantId,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        if self.active().any(|e| e.participant_id == participant_id) {
            return Err(QueueError::AlreadyQueued);
        }
        // Keep timestamps non-decreasing even if the wall clock steps back.
        let buzzed_at = self
            .entries
            .last()
            .map_or(now, |last| last.buzzed_at.max(now));
        self.entries.push(BuzzQueueEntry {
            seq: self.next_seq,
            room_id: room_id.clone(),
            participant_id,
            buzzed_at,
            active: true,
        });
        self.next_seq += 1;
        Ok(self.active().count())
    }

    /// Entries are appended in (timestamp, seq) order, so the first active
    /// one is the head of the line.
    fn next(&self) -> Option<&BuzzQueueEntry> {
        self.active().next()
    }

    fn active(&self) -> impl Iterator<Item = &BuzzQueueEntry> {
        self.entries.iter().filter(|e| e.active)
    }

    fn remove(&mut self, participant_id: ParticipantId) -> bool {
        let mut removed = false;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.active && e.participant_id == participant_id)
        {
            entry.active = false;
            removed = true;
        }
        removed
    }

    /// Forget every entry, tombstones included. Sequence numbers keep counting.
    fn restart(&mut self) {
        self.entries.clear();
    }

    fn clear(&mut self) -> usize {
        let mut cleared = 0;
        for entry in self.entries.iter_mut().filter(|e| e.active) {
            entry.active = false;
            cleared += 1;
        }
        cleared
    }
}

#[derive(Debug, Default)]
struct RoomArbitration {
    mode: BuzzMode,
    window: Option<BuzzWindow>,
    queue: BuzzQueue,
}

impl RoomArbitration {
    fn accepts(&self, question_id: QuestionId) -> bool {
        matches!(&self.window, Some(w) if w.open && w.question_id == question_id)
    }

    fn try_buzz(&mut self, participant_id: ParticipantId, question_id: Option<QuestionId>) -> bool {
        let Some(window) = self.window.as_mut() else {
            return false;
        };
        if !window.open || window.winner.is_some() {
            return false;
        }
        if question_id.is_some_and(|q| q != window.question_id) {
            return false;
        }
        window.winner = Some(participant_id);
        window.locked_at = Some(Utc::now());
        true
    }

    fn reset_window(&mut self) {
        if let Some(window) = self.window.as_mut() {
            window.winner = None;
            window.locked_at = None;
        }
    }
}

/// Result of a buzz under the room's [`BuzzMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuzzOutcome {
    Won,
    Lost { winner: Option<ParticipantId> },
    Queued { position: usize },
    AlreadyQueued,
    Closed,
}

#[derive(Default)]
pub struct Arbitrator {
    rooms: DashMap<RoomId, Arc<Mutex<RoomArbitration>>>,
}

impl Arbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, room_id: &RoomId) -> Arc<Mutex<RoomArbitration>> {
        Arc::clone(&self.rooms.entry(room_id.clone()).or_default())
    }

    fn existing(&self, room_id: &RoomId) -> Option<Arc<Mutex<RoomArbitration>>> {
        self.rooms.get(room_id).map(|slot| Arc::clone(slot.value()))
    }

    pub async fn configure(&self, room_id: &RoomId, mode: BuzzMode) {
        self.slot(room_id).lock().await.mode = mode;
    }

    pub async fn mode(&self, room_id: &RoomId) -> BuzzMode {
        match self.existing(room_id) {
            Some(slot) => slot.lock().await.mode,
            None => BuzzMode::default(),
        }
    }

    /// Drop all arbitration state for a room that will see no more rounds.
    pub fn release(&self, room_id: &RoomId) -> bool {
        self.rooms.remove(room_id).is_some()
    }

    // -- Window --

    /// Open the window for a new question. Any previous winner and the last
    /// question's queue, tombstones included, are dropped in the same step.
    pub async fn arm_window(&self, room_id: &RoomId, question_id: QuestionId) {
        let slot = self.slot(room_id);
        let mut state = slot.lock().await;
        state.window = Some(BuzzWindow {
            open: true,
            question_id,
            winner: None,
            locked_at: None,
        });
        state.queue.restart();
        tracing::debug!("Buzz window armed in room {} for question {}", room_id, question_id);
    }

    /// Claim the window for whatever question it is armed with.
    pub async fn try_buzz(&self, room_id: &RoomId, participant_id: ParticipantId) -> bool {
        match self.existing(room_id) {
            Some(slot) => slot.lock().await.try_buzz(participant_id, None),
            None => false,
        }
    }

    /// Claim the window, failing if it has since been re-armed for another question.
    pub async fn try_buzz_for(
        &self,
        room_id: &RoomId,
        participant_id: ParticipantId,
        question_id: QuestionId,
    ) -> bool {
        match self.existing(room_id) {
            Some(slot) => slot.lock().await.try_buzz(participant_id, Some(question_id)),
            None => false,
        }
    }

    /// Clear the winner, leaving the open flag alone.
    pub async fn reset_window(&self, room_id: &RoomId) {
        if let Some(slot) = self.existing(room_id) {
            slot.lock().await.reset_window();
        }
    }

    /// Stop accepting buzzes and forget the winner.
    pub async fn close_window(&self, room_id: &RoomId) {
        if let Some(slot) = self.existing(room_id) {
            let mut state = slot.lock().await;
            if let Some(window) = state.window.as_mut() {
                window.open = false;
            }
            state.reset_window();
        }
    }

    pub async fn window(&self, room_id: &RoomId) -> Option<BuzzWindow> {
        match self.existing(room_id) {
            Some(slot) => slot.lock().await.window.clone(),
            None => None,
        }
    }

    /// Whether a buzz right now could be accepted.
    pub async fn can_buzz(&self, room_id: &RoomId) -> bool {
        let Some(slot) = self.existing(room_id) else {
            return false;
        };
        let state = slot.lock().await;
        match (&state.window, state.mode) {
            (Some(w), BuzzMode::FirstWins) => w.open && w.winner.is_none(),
            (Some(w), BuzzMode::Queue) => w.open,
            (None, _) => false,
        }
    }

    // -- Queue --

    pub async fn enqueue(
        &self,
        room_id: &RoomId,
        participant_id: ParticipantId,
    ) -> Result<usize, QueueError> {
        let slot = self.slot(room_id);
        let mut state = slot.lock().await;
        state.queue.push(room_id, participant_id, Utc::now())
    }

    pub async fn peek_next(&self, room_id: &RoomId) -> Result<BuzzQueueEntry, QueueError> {
        let Some(slot) = self.existing(room_id) else {
            return Err(QueueError::Empty);
        };
        let state = slot.lock().await;
        state.queue.next().cloned().ok_or(QueueError::Empty)
    }

    pub async fn dequeue(&self, room_id: &RoomId, participant_id: ParticipantId) -> bool {
        match self.existing(room_id) {
            Some(slot) => slot.lock().await.queue.remove(participant_id),
            None => false,
        }
    }

    pub async fn clear(&self, room_id: &RoomId) -> usize {
        match self.existing(room_id) {
            Some(slot) => slot.lock().await.queue.clear(),
            None => 0,
        }
    }

    /// Active entries, head of the line first.
    pub async fn queue(&self, room_id: &RoomId) -> Vec<BuzzQueueEntry> {
        match self.existing(room_id) {
            Some(slot) => slot.lock().await.queue.active().cloned().collect(),
            None => Vec::new(),
        }
    }

    // -- Mode-dependent operations --

    /// Register a buzz for `question_id` under the room's mode.
    pub async fn buzz(
        &self,
        room_id: &RoomId,
        participant_id: ParticipantId,
        question_id: QuestionId,
    ) -> BuzzOutcome {
        let Some(slot) = self.existing(room_id) else {
            return BuzzOutcome::Closed;
        };
        let mut state = slot.lock().await;
        if !state.accepts(question_id) {
            return BuzzOutcome::Closed;
        }
        match state.mode {
            BuzzMode::FirstWins => {
                if state.try_buzz(participant_id, Some(question_id)) {
                    BuzzOutcome::Won
                } else {
                    BuzzOutcome::Lost {
                        winner: state.window.as_ref().and_then(|w| w.winner),
                    }
                }
            }
            BuzzMode::Queue => match state.queue.push(room_id, participant_id, Utc::now()) {
                Ok(position) => BuzzOutcome::Queued { position },
                Err(_) => BuzzOutcome::AlreadyQueued,
            },
        }
    }

    /// The participant whose answer is to be judged next, if any.
    pub async fn responder(&self, room_id: &RoomId) -> Option<ParticipantId> {
        let slot = self.existing(room_id)?;
        let state = slot.lock().await;
        match state.mode {
            BuzzMode::FirstWins => state.window.as_ref().and_then(|w| w.winner),
            BuzzMode::Queue => state.queue.next().map(|e| e.participant_id),
        }
    }

    /// Pass over a responder after a wrong answer.
    pub async fn reject(&self, room_id: &RoomId, participant_id: ParticipantId) {
        let Some(slot) = self.existing(room_id) else {
            return;
        };
        let mut state = slot.lock().await;
        match state.mode {
            BuzzMode::FirstWins => {
                if state.window.as_ref().and_then(|w| w.winner) == Some(participant_id) {
                    state.reset_window();
                }
            }
            BuzzMode::Queue => {
                state.queue.remove(participant_id);
            }
        }
    }

    /// Wind down arbitration after a correct answer.
    pub async fn settle(&self, room_id: &RoomId) {
        let Some(slot) = self.existing(room_id) else {
            return;
        };
        let mut state = slot.lock().await;
        match state.mode {
            BuzzMode::FirstWins => state.reset_window(),
            BuzzMode::Queue => {
                state.queue.clear();
            }
        }
    }
}
