use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::model::{
    BuzzMode, ConnectionId, Participant, ParticipantId, Question, QuestionId, RankingEntry,
    RoomId, RoomStatus,
};
use crate::scoring::Difficulty;

// -- Framing --

pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

pub type Transport = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed_transport(stream: TcpStream) -> Transport {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_framed(stream)
}

// -- Client -> Server Messages --

/// Events a client may send. On the wire: `{"event": "buzz-in", "data": {"roomId": "..."}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    // Lobby
    CreateRoom {
        name: String,
        #[serde(default)]
        public: bool,
        creator_name: String,
        #[serde(default)]
        mode: BuzzMode,
    },
    JoinRoom {
        room_id: RoomId,
        name: String,
    },
    ListRooms,

    // Gameplay
    StartGame {
        room_id: RoomId,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        difficulty: Option<Difficulty>,
    },
    BuzzIn {
        room_id: RoomId,
    },
    SubmitAnswer {
        room_id: RoomId,
        answer: String,
    },

    // Admin
    JudgeAnswer {
        room_id: RoomId,
        participant_id: ParticipantId,
        correct: bool,
    },
    ResetQueue {
        room_id: RoomId,
    },
    EndGame {
        room_id: RoomId,
    },

    // Connection
    Ping,
}

impl ClientMessage {
    /// Event name as it appears on the wire, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "create-room",
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::ListRooms => "list-rooms",
            ClientMessage::StartGame { .. } => "start-game",
            ClientMessage::BuzzIn { .. } => "buzz-in",
            ClientMessage::SubmitAnswer { .. } => "submit-answer",
            ClientMessage::JudgeAnswer { .. } => "judge-answer",
            ClientMessage::ResetQueue { .. } => "reset-queue",
            ClientMessage::EndGame { .. } => "end-game",
            ClientMessage::Ping => "ping",
        }
    }

    /// Admin-only events.
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            ClientMessage::JudgeAnswer { .. }
                | ClientMessage::ResetQueue { .. }
                | ClientMessage::EndGame { .. }
        )
    }
}

// -- Server -> Client Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    // Connection
    Welcome {
        connection_id: ConnectionId,
        server_version: String,
    },
    Pong,
    Notice {
        message: String,
    },

    // Replies to the sender
    Success {
        message: String,
        data: serde_json::Value,
    },
    Error {
        message: String,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    BuzzResult {
        won: bool,
        winner: Option<ParticipantRef>,
    },

    // Room broadcasts
    RoomUpdated(RoomSnapshot),
    QuestionResult {
        participant_id: ParticipantId,
        correct: bool,
        correct_answer: Option<String>,
        points: u32,
    },
    QueueUpdated {
        queue: Vec<QueueEntryView>,
    },
    JudgeResult {
        correct: bool,
        participant_id: ParticipantId,
        points: u32,
    },
    QueueReset {
        message: String,
    },
    GameEnded {
        ranking: Vec<RankingEntry>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    pub id: ParticipantId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub name: String,
    pub status: RoomStatus,
    pub mode: BuzzMode,
    pub participants: Vec<ParticipantView>,
    pub current_question: Option<QuestionView>,
    pub can_buzz: bool,
    pub buzzed_by: Option<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub name: String,
    pub score: u32,
    pub is_admin: bool,
    pub connected: bool,
}

impl ParticipantView {
    pub fn new(p: &Participant, connected: bool) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            score: p.score,
            is_admin: p.is_admin,
            connected,
        }
    }
}

/// A question as shown to players. The expected answer is never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: QuestionId,
    pub prompt: String,
    pub category: String,
    pub difficulty: Difficulty,
}

impl From<&Question> for QuestionView {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            prompt: q.prompt.clone(),
            category: q.category.clone(),
            difficulty: q.difficulty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryView {
    pub participant_id: ParticipantId,
    pub name: String,
    pub buzzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub name: String,
    pub participant_count: usize,
    pub mode: BuzzMode,
}

// -- Serialization helpers --

pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    Ok(Bytes::from(json))
}

pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    data: &[u8],
) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}

// -- Transport helpers --

pub async fn send_message<T: Serialize>(
    transport: &mut Transport,
    msg: &T,
) -> anyhow::Result<()> {
    let bytes = serialize_message(msg).map_err(|e| anyhow::anyhow!("serialize error: {}", e))?;
    transport
        .send(bytes)
        .await
        .map_err(|e| anyhow::anyhow!("send error: {}", e))
}

pub async fn recv_message<T: for<'de> Deserialize<'de>>(
    transport: &mut Transport,
) -> anyhow::Result<Option<T>> {
    match transport.next().await {
        Some(Ok(frame)) => {
            let msg = deserialize_message(&frame)
                .map_err(|e| anyhow::anyhow!("deserialize error: {}", e))?;
            Ok(Some(msg))
        }
        Some(Err(e)) => Err(anyhow::anyhow!("recv error: {}", e)),
        None => Ok(None),
    }
}
