use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scoring::Difficulty;

// -- Identifiers --

const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_CODE_LEN: usize = 10;

/// Short shareable room code, e.g. `K3X9QZ0ABC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn generate(rng: &mut impl Rng) -> Self {
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_CHARSET[rng.gen_range(0..ROOM_CODE_CHARSET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(ParticipantId);
uuid_id!(SessionId);
uuid_id!(ConnectionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(pub u64);

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// -- Rooms --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// How a room resolves competing buzzes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuzzMode {
    /// A single winner per armed window; everyone else is told they lost.
    #[default]
    FirstWins,
    /// Every buzz takes a place in line and is judged in order.
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub status: RoomStatus,
    pub public: bool,
    pub created_by: ParticipantId,
    pub created_at: DateTime<Utc>,
    pub mode: BuzzMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub name: String,
    pub score: u32,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

/// A room together with its participants ordered by join time.
#[derive(Debug, Clone)]
pub struct RoomDetail {
    pub room: Room,
    pub participants: Vec<Participant>,
}

impl RoomDetail {
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub participant_id: ParticipantId,
    pub name: String,
    pub score: u32,
    pub rank: u32,
}

/// Rank participants by score (highest first), falling back to join order.
pub fn rank_participants(participants: &[Participant]) -> Vec<RankingEntry> {
    let mut sorted: Vec<&Participant> = participants.iter().collect();
    sorted.sort_by(|a, b| b.score.cmp(&a.score).then(a.joined_at.cmp(&b.joined_at)));
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, p)| RankingEntry {
            participant_id: p.id,
            name: p.name.clone(),
            score: p.score,
            rank: i as u32 + 1,
        })
        .collect()
}

// -- Questions --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    pub answer: String,
    pub category: String,
    pub difficulty: Difficulty,
}

impl Question {
    /// Exact-match check, ignoring surrounding whitespace.
    pub fn is_correct(&self, answer: &str) -> bool {
        self.answer.trim() == answer.trim()
    }
}

/// A question as submitted to the bank, before an id is assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestion {
    pub prompt: String,
    pub answer: String,
    #[serde(default)]
    pub category: String,
    pub difficulty: Difficulty,
}
