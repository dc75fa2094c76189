//! Views of a room as clients see them.

use std::collections::HashSet;

use buzzline_common::model::{ParticipantId, Question, RoomDetail};
use buzzline_common::protocol::{
    ParticipantRef, ParticipantView, QueueEntryView, QuestionView, RoomSnapshot, RoomSummary,
};

use crate::arbitrator::BuzzQueueEntry;

pub const MAX_NAME_LEN: usize = 32;

/// Trim a display name and check its length. Returns `None` if unusable.
pub fn normalize_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return None;
    }
    Some(name.to_string())
}

/// Live arbitration facts folded into a snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundView<'a> {
    pub question: Option<&'a Question>,
    pub can_buzz: bool,
    pub buzzed_by: Option<ParticipantId>,
}

pub fn snapshot(
    detail: &RoomDetail,
    connected: &HashSet<ParticipantId>,
    round: RoundView<'_>,
) -> RoomSnapshot {
    let participants = detail
        .participants
        .iter()
        .map(|p| ParticipantView::new(p, connected.contains(&p.id)))
        .collect();

    RoomSnapshot {
        room_id: detail.room.id.clone(),
        name: detail.room.name.clone(),
        status: detail.room.status,
        mode: detail.room.mode,
        participants,
        current_question: round.question.map(QuestionView::from),
        can_buzz: round.can_buzz,
        buzzed_by: round.buzzed_by,
    }
}

pub fn summary(detail: &RoomDetail) -> RoomSummary {
    RoomSummary {
        room_id: detail.room.id.clone(),
        name: detail.room.name.clone(),
        participant_count: detail.participants.len(),
        mode: detail.room.mode,
    }
}

pub fn participant_ref(detail: &RoomDetail, id: ParticipantId) -> Option<ParticipantRef> {
    detail.participant(id).map(|p| ParticipantRef {
        id: p.id,
        name: p.name.clone(),
    })
}

/// Queue entries with display names. Entries for unknown participants are skipped.
pub fn queue_view(detail: &RoomDetail, entries: &[BuzzQueueEntry]) -> Vec<QueueEntryView> {
    entries
        .iter()
        .filter_map(|e| {
            detail.participant(e.participant_id).map(|p| QueueEntryView {
                participant_id: p.id,
                name: p.name.clone(),
                buzzed_at: e.buzzed_at,
            })
        })
        .collect()
}
