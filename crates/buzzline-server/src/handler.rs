//! Inbound event dispatch.
//!
//! Every failure is reported to the sender as `error{message}` and nothing is
//! broadcast for it.

use serde_json::json;

use buzzline_common::model::{BuzzMode, ConnectionId, ParticipantId, RoomId};
use buzzline_common::protocol::{deserialize_message, ClientMessage, ServerMessage};

use crate::room;
use crate::round;
use crate::server::SharedState;
use crate::store::StoreError;

/// What a connection is bound to. Owned by the connection's reader task.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    pub room_id: Option<RoomId>,
    pub participant_id: Option<ParticipantId>,
}

impl ConnectionContext {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            room_id: None,
            participant_id: None,
        }
    }

    /// The participant this connection speaks for in `room_id`.
    pub fn member_of(&self, room_id: &RoomId) -> Result<ParticipantId, HandlerError> {
        match (&self.room_id, self.participant_id) {
            (Some(bound), Some(p)) if bound == room_id => Ok(p),
            _ => Err(HandlerError::NotInRoom),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid message format")]
    InvalidMessage,
    #[error("Name must be between 1 and {max} characters", max = room::MAX_NAME_LEN)]
    InvalidName,
    #[error("Room not found")]
    RoomNotFound,
    #[error("Join the room first")]
    NotInRoom,
    #[error("Admin privileges required")]
    NotAdmin,
    #[error("Player name already exists")]
    NameTaken,
    #[error("No questions available")]
    NoQuestions,
    #[error("A round is already in progress")]
    RoundInProgress,
    #[error("No active round")]
    NoActiveRound,
    #[error("Game has already ended")]
    GameOver,
    #[error("Buzzing is not open")]
    BuzzClosed,
    #[error("Already in queue")]
    AlreadyQueued,
    #[error("It is not your turn to answer")]
    NotResponder,
    #[error("Player not in queue or not next in line")]
    NotNextInLine,
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound("room") => HandlerError::RoomNotFound,
            StoreError::NoQuestions => HandlerError::NoQuestions,
            other => HandlerError::Store(other),
        }
    }
}

/// Decode one inbound frame and handle it.
pub async fn handle_frame(ctx: &mut ConnectionContext, frame: &[u8], state: &SharedState) {
    match deserialize_message::<ClientMessage>(frame) {
        Ok(msg) => handle_message(ctx, msg, state).await,
        Err(e) => {
            tracing::warn!("Failed to parse message from {}: {}", ctx.connection_id, e);
            reply_error(ctx, &HandlerError::InvalidMessage, state);
        }
    }
}

pub async fn handle_message(ctx: &mut ConnectionContext, msg: ClientMessage, state: &SharedState) {
    let event = msg.event_name();
    tracing::debug!("{} from {}", event, ctx.connection_id);
    if let Err(e) = dispatch(ctx, msg, state).await {
        match &e {
            HandlerError::Store(inner) => {
                tracing::error!("{} from {} failed: {}", event, ctx.connection_id, inner)
            }
            _ => tracing::warn!("{} from {} rejected: {}", event, ctx.connection_id, e),
        }
        reply_error(ctx, &e, state);
    }
}

fn reply_error(ctx: &ConnectionContext, e: &HandlerError, state: &SharedState) {
    state.hub.send_to(
        ctx.connection_id,
        &ServerMessage::Error {
            message: e.to_string(),
        },
    );
}

async fn dispatch(
    ctx: &mut ConnectionContext,
    msg: ClientMessage,
    state: &SharedState,
) -> Result<(), HandlerError> {
    if msg.is_privileged() {
        // Unbound senders are reported as unprivileged, not as strangers.
        let room_id = match &msg {
            ClientMessage::JudgeAnswer { room_id, .. }
            | ClientMessage::ResetQueue { room_id }
            | ClientMessage::EndGame { room_id } => room_id,
            _ => return Err(HandlerError::InvalidMessage),
        };
        let caller = ctx.member_of(room_id).map_err(|_| HandlerError::NotAdmin)?;
        if !state.rooms.is_admin(room_id, caller).await? {
            return Err(HandlerError::NotAdmin);
        }
    }

    match msg {
        ClientMessage::CreateRoom {
            name,
            public,
            creator_name,
            mode,
        } => create_room(ctx, &name, public, &creator_name, mode, state).await,

        ClientMessage::JoinRoom { room_id, name } => join_room(ctx, room_id, &name, state).await,

        ClientMessage::ListRooms => {
            let rooms = state
                .rooms
                .list_public_waiting()
                .await?
                .iter()
                .map(room::summary)
                .collect();
            state
                .hub
                .send_to(ctx.connection_id, &ServerMessage::RoomList { rooms });
            Ok(())
        }

        ClientMessage::StartGame {
            room_id,
            category,
            difficulty,
        } => {
            ctx.member_of(&room_id)?;
            round::start_game(&room_id, category.as_deref(), difficulty, state).await
        }

        ClientMessage::BuzzIn { room_id } => {
            let caller = ctx.member_of(&room_id)?;
            round::buzz_in(ctx.connection_id, &room_id, caller, state).await
        }

        ClientMessage::SubmitAnswer { room_id, answer } => {
            let caller = ctx.member_of(&room_id)?;
            round::submit_answer(&room_id, caller, &answer, state).await
        }

        ClientMessage::JudgeAnswer {
            room_id,
            participant_id,
            correct,
        } => round::judge_answer(&room_id, participant_id, correct, state).await,

        ClientMessage::ResetQueue { room_id } => round::reset_queue(&room_id, state).await,

        ClientMessage::EndGame { room_id } => round::end_game(&room_id, state).await,

        ClientMessage::Ping => {
            state.hub.send_to(ctx.connection_id, &ServerMessage::Pong);
            Ok(())
        }
    }
}

async fn create_room(
    ctx: &mut ConnectionContext,
    name: &str,
    public: bool,
    creator_name: &str,
    mode: BuzzMode,
    state: &SharedState,
) -> Result<(), HandlerError> {
    let name = room::normalize_name(name).ok_or(HandlerError::InvalidName)?;
    let creator_name = room::normalize_name(creator_name).ok_or(HandlerError::InvalidName)?;

    let (created, creator) = state
        .rooms
        .create(&name, public, &creator_name, mode)
        .await?;
    state.arbitrator.configure(&created.id, mode).await;
    tracing::info!(
        "Room {} '{}' created by '{}' ({:?})",
        created.id,
        created.name,
        creator.name,
        mode
    );

    // A fresh participant has no other connection.
    bind(ctx, created.id.clone(), creator.id, state).await;
    state.hub.send_to(
        ctx.connection_id,
        &ServerMessage::Success {
            message: "Room created".into(),
            data: json!({ "roomId": created.id, "participantId": creator.id }),
        },
    );
    round::broadcast_room_state(&created.id, state).await
}

async fn join_room(
    ctx: &mut ConnectionContext,
    room_id: RoomId,
    name: &str,
    state: &SharedState,
) -> Result<(), HandlerError> {
    let name = room::normalize_name(name).ok_or(HandlerError::InvalidName)?;
    let joined = state.rooms.add_participant(&room_id, &name).await?;
    let participant = joined.participant;

    // Taking over a name is a reconnect, unless someone is still using it.
    if !bind(ctx, room_id.clone(), participant.id, state).await {
        return Err(HandlerError::NameTaken);
    }
    if joined.existing {
        tracing::info!("'{}' rejoined room {}", participant.name, room_id);
    } else {
        tracing::info!("'{}' joined room {}", participant.name, room_id);
    }

    state.hub.send_to(
        ctx.connection_id,
        &ServerMessage::Success {
            message: "Successfully joined room".into(),
            data: json!({ "roomId": room_id, "participantId": participant.id }),
        },
    );
    round::broadcast_room_state(&room_id, state).await
}

/// Point the connection at a room, refreshing the room it left. Returns false
/// and leaves the connection as it was if another live connection already
/// speaks for `participant_id`.
async fn bind(
    ctx: &mut ConnectionContext,
    room_id: RoomId,
    participant_id: ParticipantId,
    state: &SharedState,
) -> bool {
    if !state
        .hub
        .claim(ctx.connection_id, room_id.clone(), participant_id)
        .await
    {
        return false;
    }
    let previous = ctx.room_id.replace(room_id.clone());
    ctx.participant_id = Some(participant_id);

    if let Some(previous) = previous.filter(|p| p != &room_id) {
        if let Err(e) = round::broadcast_room_state(&previous, state).await {
            tracing::warn!("Could not refresh room {}: {}", previous, e);
        }
    }
    true
}

pub async fn handle_disconnect(ctx: &ConnectionContext, state: &SharedState) {
    state.hub.unregister(ctx.connection_id);
    if let Some(room_id) = &ctx.room_id {
        if let Err(e) = round::broadcast_room_state(room_id, state).await {
            tracing::warn!("Could not refresh room {}: {}", room_id, e);
        }
    }
}
