//! Persistence collaborators: rooms, the question bank and round records.
//!
//! Each call is atomic on its own; nothing here spans calls.

pub mod memory;

use async_trait::async_trait;

use buzzline_common::model::{
    BuzzMode, NewQuestion, Participant, ParticipantId, Question, QuestionId, RankingEntry, Room,
    RoomDetail, RoomId, RoomStatus, SessionId,
};
use buzzline_common::scoring::Difficulty;
use buzzline_common::session::{GameSession, SessionError};

pub use memory::{MemoryQuestionStore, MemoryRoomStore, MemorySessionStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("no questions match the filter")]
    NoQuestions,
}

impl From<SessionError> for StoreError {
    fn from(e: SessionError) -> Self {
        StoreError::Conflict(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A participant as returned by [`RoomStore::add_participant`].
#[derive(Debug, Clone)]
pub struct Joined {
    pub participant: Participant,
    /// The name was already taken in this room and the existing record was returned.
    pub existing: bool,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create a room with its creator as the single admin.
    async fn create(
        &self,
        name: &str,
        public: bool,
        creator_name: &str,
        mode: BuzzMode,
    ) -> StoreResult<(Room, Participant)>;
    async fn get(&self, room_id: &RoomId) -> StoreResult<RoomDetail>;
    async fn add_participant(&self, room_id: &RoomId, name: &str) -> StoreResult<Joined>;
    async fn update_status(&self, room_id: &RoomId, status: RoomStatus) -> StoreResult<()>;
    async fn update_score(&self, participant_id: ParticipantId, score: u32) -> StoreResult<()>;
    async fn list_public_waiting(&self) -> StoreResult<Vec<RoomDetail>>;
    async fn ranking(&self, room_id: &RoomId) -> StoreResult<Vec<RankingEntry>>;
    async fn is_admin(&self, room_id: &RoomId, participant_id: ParticipantId) -> StoreResult<bool>;
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn create(&self, question: NewQuestion) -> StoreResult<Question>;
    async fn get(&self, id: QuestionId) -> StoreResult<Question>;
    async fn list(
        &self,
        category: Option<&str>,
        difficulty: Option<Difficulty>,
    ) -> StoreResult<Vec<Question>>;
    /// Uniform pick among matching questions; [`StoreError::NoQuestions`] if none match.
    async fn random_matching(
        &self,
        category: Option<&str>,
        difficulty: Option<Difficulty>,
    ) -> StoreResult<Question>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, room_id: &RoomId) -> StoreResult<GameSession>;
    async fn get(&self, id: SessionId) -> StoreResult<GameSession>;
    /// The room's session in waiting, question or buzzed state, if any.
    async fn active_for_room(&self, room_id: &RoomId) -> StoreResult<Option<GameSession>>;
    async fn set_question(&self, id: SessionId, question_id: QuestionId) -> StoreResult<GameSession>;
    async fn set_buzzed(&self, id: SessionId, participant_id: ParticipantId) -> StoreResult<GameSession>;
    async fn finalize(&self, id: SessionId, correct: bool) -> StoreResult<GameSession>;
    async fn abandon(&self, id: SessionId) -> StoreResult<GameSession>;
}
