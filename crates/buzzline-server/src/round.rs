//! Gameplay events: starting a round, buzzing, answering and judging.
//!
//! Each operation validates everything it can before its first write, and
//! broadcasts only after the writes it depends on have succeeded.

use chrono::Utc;

use buzzline_common::model::{BuzzMode, ConnectionId, ParticipantId, Question, RoomId, RoomStatus};
use buzzline_common::protocol::{RoomSnapshot, ServerMessage};
use buzzline_common::scoring::{self, Difficulty};
use buzzline_common::session::{GameSession, SessionStatus};

use crate::arbitrator::BuzzOutcome;
use crate::handler::HandlerError;
use crate::room::{self, RoundView};
use crate::server::SharedState;
use crate::store::StoreError;

// -- Room state --

pub async fn room_snapshot(room_id: &RoomId, state: &SharedState) -> Result<RoomSnapshot, HandlerError> {
    let detail = state.rooms.get(room_id).await?;
    let connected = state.hub.connected_participants(room_id).await;
    let session = state.sessions.active_for_room(room_id).await?;

    let question = match session.as_ref().and_then(|s| s.question_id) {
        Some(id) => Some(state.questions.get(id).await?),
        None => None,
    };
    let can_buzz = session
        .as_ref()
        .is_some_and(|s| s.status == SessionStatus::Question)
        && state.arbitrator.can_buzz(room_id).await;

    Ok(room::snapshot(
        &detail,
        &connected,
        RoundView {
            question: question.as_ref(),
            can_buzz,
            buzzed_by: session.and_then(|s| s.buzzed_participant),
        },
    ))
}

pub async fn broadcast_room_state(room_id: &RoomId, state: &SharedState) -> Result<(), HandlerError> {
    let snapshot = room_snapshot(room_id, state).await?;
    state
        .hub
        .broadcast_to_room(room_id, &ServerMessage::RoomUpdated(snapshot));
    Ok(())
}

async fn broadcast_queue(room_id: &RoomId, state: &SharedState) -> Result<(), HandlerError> {
    let detail = state.rooms.get(room_id).await?;
    let entries = state.arbitrator.queue(room_id).await;
    state.hub.broadcast_to_room(
        room_id,
        &ServerMessage::QueueUpdated {
            queue: room::queue_view(&detail, &entries),
        },
    );
    Ok(())
}

/// The room's active round together with the question it is showing.
async fn current_round(
    room_id: &RoomId,
    state: &SharedState,
) -> Result<(GameSession, Question), HandlerError> {
    let session = state
        .sessions
        .active_for_room(room_id)
        .await?
        .ok_or(HandlerError::NoActiveRound)?;
    let question_id = session.question_id.ok_or(HandlerError::NoActiveRound)?;
    let question = state.questions.get(question_id).await?;
    Ok((session, question))
}

async fn award(
    room_id: &RoomId,
    participant_id: ParticipantId,
    points: u32,
    state: &SharedState,
) -> Result<(), HandlerError> {
    let detail = state.rooms.get(room_id).await?;
    let participant = detail
        .participant(participant_id)
        .ok_or(StoreError::NotFound("participant"))?;
    state
        .rooms
        .update_score(participant_id, participant.score.saturating_add(points))
        .await?;
    Ok(())
}

// -- Events --

pub async fn start_game(
    room_id: &RoomId,
    category: Option<&str>,
    difficulty: Option<Difficulty>,
    state: &SharedState,
) -> Result<(), HandlerError> {
    let detail = state.rooms.get(room_id).await?;
    if detail.room.status == RoomStatus::Finished {
        return Err(HandlerError::GameOver);
    }
    if state.sessions.active_for_room(room_id).await?.is_some() {
        return Err(HandlerError::RoundInProgress);
    }
    let question = state.questions.random_matching(category, difficulty).await?;

    let session = match state.sessions.create(room_id).await {
        Ok(session) => session,
        Err(StoreError::Conflict(_)) => return Err(HandlerError::RoundInProgress),
        Err(e) => return Err(e.into()),
    };
    let prepared = async {
        state.sessions.set_question(session.id, question.id).await?;
        if detail.room.status != RoomStatus::Playing {
            state.rooms.update_status(room_id, RoomStatus::Playing).await?;
        }
        Ok::<_, StoreError>(())
    }
    .await;
    if let Err(e) = prepared {
        // A half-built round would block every later start.
        if let Err(undo) = state.sessions.abandon(session.id).await {
            tracing::warn!("Could not abandon round {}: {}", session.id, undo);
        }
        return Err(e.into());
    }
    state.arbitrator.arm_window(room_id, question.id).await;
    tracing::info!(
        "Round {} started in room {} with question {}",
        session.id,
        room_id,
        question.id
    );

    broadcast_room_state(room_id, state).await
}

pub async fn buzz_in(
    conn_id: ConnectionId,
    room_id: &RoomId,
    caller: ParticipantId,
    state: &SharedState,
) -> Result<(), HandlerError> {
    let session = state
        .sessions
        .active_for_room(room_id)
        .await?
        .ok_or(HandlerError::NoActiveRound)?;
    let question_id = session.question_id.ok_or(HandlerError::BuzzClosed)?;

    match state.arbitrator.buzz(room_id, caller, question_id).await {
        BuzzOutcome::Won => {
            if let Err(e) = state.sessions.set_buzzed(session.id, caller).await {
                // The window and the round must agree on the winner.
                state.arbitrator.reset_window(room_id).await;
                return Err(e.into());
            }
            tracing::info!("{} won the buzz in room {}", caller, room_id);
            let detail = state.rooms.get(room_id).await?;
            state.hub.send_to(
                conn_id,
                &ServerMessage::BuzzResult {
                    won: true,
                    winner: room::participant_ref(&detail, caller),
                },
            );
            broadcast_room_state(room_id, state).await
        }
        BuzzOutcome::Lost { winner } => {
            let detail = state.rooms.get(room_id).await?;
            state.hub.send_to(
                conn_id,
                &ServerMessage::BuzzResult {
                    won: false,
                    winner: winner.and_then(|w| room::participant_ref(&detail, w)),
                },
            );
            Ok(())
        }
        BuzzOutcome::Queued { position } => {
            tracing::debug!("{} queued at {} in room {}", caller, position, room_id);
            state.hub.send_to(
                conn_id,
                &ServerMessage::Success {
                    message: "Added to queue".into(),
                    data: serde_json::json!({ "position": position }),
                },
            );
            broadcast_queue(room_id, state).await
        }
        BuzzOutcome::AlreadyQueued => Err(HandlerError::AlreadyQueued),
        BuzzOutcome::Closed => Err(HandlerError::BuzzClosed),
    }
}

pub async fn submit_answer(
    room_id: &RoomId,
    caller: ParticipantId,
    answer: &str,
    state: &SharedState,
) -> Result<(), HandlerError> {
    let (session, question) = current_round(room_id, state).await?;
    if state.arbitrator.responder(room_id).await != Some(caller) {
        return Err(HandlerError::NotResponder);
    }

    let correct = question.is_correct(answer);
    let points = if correct {
        scoring::score(question.difficulty, session.elapsed(Utc::now()))
    } else {
        0
    };
    let ended = conclude(room_id, &session, caller, correct, points, state).await?;

    state.hub.broadcast_to_room(
        room_id,
        &ServerMessage::QuestionResult {
            participant_id: caller,
            correct,
            correct_answer: ended.then(|| question.answer.clone()),
            points,
        },
    );
    if !ended {
        broadcast_queue(room_id, state).await?;
    }
    broadcast_room_state(room_id, state).await
}

pub async fn judge_answer(
    room_id: &RoomId,
    participant_id: ParticipantId,
    correct: bool,
    state: &SharedState,
) -> Result<(), HandlerError> {
    let (session, question) = current_round(room_id, state).await?;
    if state.arbitrator.responder(room_id).await != Some(participant_id) {
        return Err(HandlerError::NotNextInLine);
    }

    let points = if correct {
        scoring::score(question.difficulty, session.elapsed(Utc::now()))
    } else {
        0
    };
    let ended = conclude(room_id, &session, participant_id, correct, points, state).await?;

    state.hub.broadcast_to_room(
        room_id,
        &ServerMessage::JudgeResult {
            correct,
            participant_id,
            points,
        },
    );
    if !ended {
        broadcast_queue(room_id, state).await?;
    }
    broadcast_room_state(room_id, state).await
}

/// Apply a verdict on the responder. Returns whether the round is over.
///
/// A correct answer always ends the round. A miss ends it in first-wins
/// rooms; in queue rooms the next in line gets a turn.
async fn conclude(
    room_id: &RoomId,
    session: &GameSession,
    responder: ParticipantId,
    correct: bool,
    points: u32,
    state: &SharedState,
) -> Result<bool, HandlerError> {
    if correct {
        award(room_id, responder, points, state).await?;
        state.sessions.finalize(session.id, true).await?;
        state.arbitrator.settle(room_id).await;
        tracing::info!("{} answered correctly in room {} (+{})", responder, room_id, points);
        return Ok(true);
    }

    state.arbitrator.reject(room_id, responder).await;
    match state.arbitrator.mode(room_id).await {
        BuzzMode::FirstWins => {
            state.sessions.finalize(session.id, false).await?;
            tracing::info!("{} missed in room {}, round over", responder, room_id);
            Ok(true)
        }
        BuzzMode::Queue => {
            tracing::info!("{} missed in room {}, next in line", responder, room_id);
            Ok(false)
        }
    }
}

pub async fn reset_queue(room_id: &RoomId, state: &SharedState) -> Result<(), HandlerError> {
    state.rooms.get(room_id).await?;
    let cleared = state.arbitrator.clear(room_id).await;
    tracing::info!("Queue reset in room {} ({} cleared)", room_id, cleared);
    state.hub.broadcast_to_room(
        room_id,
        &ServerMessage::QueueReset {
            message: "Queue has been reset".into(),
        },
    );
    Ok(())
}

pub async fn end_game(room_id: &RoomId, state: &SharedState) -> Result<(), HandlerError> {
    let detail = state.rooms.get(room_id).await?;
    if detail.room.status == RoomStatus::Finished {
        return Err(HandlerError::GameOver);
    }
    if let Some(session) = state.sessions.active_for_room(room_id).await? {
        state.sessions.abandon(session.id).await?;
    }
    state.arbitrator.release(room_id);
    state.rooms.update_status(room_id, RoomStatus::Finished).await?;

    let ranking = state.rooms.ranking(room_id).await?;
    tracing::info!("Game in room {} ended", room_id);
    state
        .hub
        .broadcast_to_room(room_id, &ServerMessage::GameEnded { ranking });
    broadcast_room_state(room_id, state).await
}
