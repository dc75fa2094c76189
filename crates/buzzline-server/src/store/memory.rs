use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;

use buzzline_common::model::{
    rank_participants, BuzzMode, NewQuestion, Participant, ParticipantId, Question, QuestionId,
    RankingEntry, Room, RoomDetail, RoomId, RoomStatus, SessionId,
};
use buzzline_common::scoring::Difficulty;
use buzzline_common::session::GameSession;

use super::{Joined, QuestionStore, RoomStore, SessionStore, StoreError, StoreResult};

// -- Rooms --

#[derive(Default)]
struct RoomTables {
    rooms: HashMap<RoomId, Room>,
    participants: HashMap<ParticipantId, Participant>,
    /// Participant ids per room, in join order.
    members: HashMap<RoomId, Vec<ParticipantId>>,
}

impl RoomTables {
    fn detail(&self, room_id: &RoomId) -> StoreResult<RoomDetail> {
        let room = self.rooms.get(room_id).ok_or(StoreError::NotFound("room"))?;
        let participants = self
            .members
            .get(room_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.participants.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(RoomDetail {
            room: room.clone(),
            participants,
        })
    }

    fn fresh_room_id(&self) -> RoomId {
        let mut rng = rand::thread_rng();
        loop {
            let id = RoomId::generate(&mut rng);
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryRoomStore {
    tables: RwLock<RoomTables>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create(
        &self,
        name: &str,
        public: bool,
        creator_name: &str,
        mode: BuzzMode,
    ) -> StoreResult<(Room, Participant)> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let id = tables.fresh_room_id();
        let creator = Participant {
            id: ParticipantId::new(),
            room_id: id.clone(),
            name: creator_name.to_string(),
            score: 0,
            is_admin: true,
            joined_at: now,
        };
        let room = Room {
            id: id.clone(),
            name: name.to_string(),
            status: RoomStatus::Waiting,
            public,
            created_by: creator.id,
            created_at: now,
            mode,
        };
        tables.rooms.insert(id.clone(), room.clone());
        tables.members.insert(id, vec![creator.id]);
        tables.participants.insert(creator.id, creator.clone());
        Ok((room, creator))
    }

    async fn get(&self, room_id: &RoomId) -> StoreResult<RoomDetail> {
        self.tables.read().await.detail(room_id)
    }

    async fn add_participant(&self, room_id: &RoomId, name: &str) -> StoreResult<Joined> {
        let mut tables = self.tables.write().await;
        if !tables.rooms.contains_key(room_id) {
            return Err(StoreError::NotFound("room"));
        }
        let existing = tables
            .members
            .get(room_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.participants.get(id))
            .find(|p| p.name == name)
            .cloned();
        if let Some(participant) = existing {
            return Ok(Joined {
                participant,
                existing: true,
            });
        }

        let participant = Participant {
            id: ParticipantId::new(),
            room_id: room_id.clone(),
            name: name.to_string(),
            score: 0,
            is_admin: false,
            joined_at: Utc::now(),
        };
        tables
            .members
            .entry(room_id.clone())
            .or_default()
            .push(participant.id);
        tables.participants.insert(participant.id, participant.clone());
        Ok(Joined {
            participant,
            existing: false,
        })
    }

    async fn update_status(&self, room_id: &RoomId, status: RoomStatus) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let room = tables
            .rooms
            .get_mut(room_id)
            .ok_or(StoreError::NotFound("room"))?;
        room.status = status;
        Ok(())
    }

    async fn update_score(&self, participant_id: ParticipantId, score: u32) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let participant = tables
            .participants
            .get_mut(&participant_id)
            .ok_or(StoreError::NotFound("participant"))?;
        participant.score = score;
        Ok(())
    }

    async fn list_public_waiting(&self) -> StoreResult<Vec<RoomDetail>> {
        let tables = self.tables.read().await;
        let mut rooms: Vec<&Room> = tables
            .rooms
            .values()
            .filter(|r| r.public && r.status == RoomStatus::Waiting)
            .collect();
        rooms.sort_by_key(|r| r.created_at);
        rooms.into_iter().map(|r| tables.detail(&r.id)).collect()
    }

    async fn ranking(&self, room_id: &RoomId) -> StoreResult<Vec<RankingEntry>> {
        let detail = self.tables.read().await.detail(room_id)?;
        Ok(rank_participants(&detail.participants))
    }

    async fn is_admin(&self, room_id: &RoomId, participant_id: ParticipantId) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        if !tables.rooms.contains_key(room_id) {
            return Err(StoreError::NotFound("room"));
        }
        Ok(tables
            .participants
            .get(&participant_id)
            .is_some_and(|p| &p.room_id == room_id && p.is_admin))
    }
}

// -- Questions --

#[derive(Default)]
struct QuestionBank {
    questions: BTreeMap<QuestionId, Question>,
    next_id: u64,
}

impl QuestionBank {
    fn matching<'a>(
        &'a self,
        category: Option<&'a str>,
        difficulty: Option<Difficulty>,
    ) -> impl Iterator<Item = &'a Question> {
        self.questions.values().filter(move |q| {
            category.map_or(true, |c| q.category == c)
                && difficulty.map_or(true, |d| q.difficulty == d)
        })
    }

    fn pick(&self, category: Option<&str>, difficulty: Option<Difficulty>) -> Option<Question> {
        let pool: Vec<&Question> = self.matching(category, difficulty).collect();
        pool.choose(&mut rand::thread_rng()).map(|q| (*q).clone())
    }
}

#[derive(Default)]
pub struct MemoryQuestionStore {
    bank: RwLock<QuestionBank>,
}

impl MemoryQuestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, questions: Vec<NewQuestion>) -> StoreResult<usize> {
        let count = questions.len();
        for q in questions {
            self.create(q).await?;
        }
        Ok(count)
    }

    /// Load a JSON array of questions into the bank.
    pub async fn seed_from_file(&self, path: &Path) -> anyhow::Result<usize> {
        let raw = tokio::fs::read_to_string(path).await?;
        let questions: Vec<NewQuestion> = serde_json::from_str(&raw)?;
        Ok(self.seed(questions).await?)
    }
}

#[async_trait]
impl QuestionStore for MemoryQuestionStore {
    async fn create(&self, question: NewQuestion) -> StoreResult<Question> {
        if question.prompt.trim().is_empty() || question.answer.trim().is_empty() {
            return Err(StoreError::Conflict(
                "question needs a prompt and an answer".into(),
            ));
        }
        let mut bank = self.bank.write().await;
        bank.next_id += 1;
        let question = Question {
            id: QuestionId(bank.next_id),
            prompt: question.prompt,
            answer: question.answer,
            category: question.category,
            difficulty: question.difficulty,
        };
        bank.questions.insert(question.id, question.clone());
        Ok(question)
    }

    async fn get(&self, id: QuestionId) -> StoreResult<Question> {
        self.bank
            .read()
            .await
            .questions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("question"))
    }

    async fn list(
        &self,
        category: Option<&str>,
        difficulty: Option<Difficulty>,
    ) -> StoreResult<Vec<Question>> {
        let bank = self.bank.read().await;
        Ok(bank.matching(category, difficulty).cloned().collect())
    }

    async fn random_matching(
        &self,
        category: Option<&str>,
        difficulty: Option<Difficulty>,
    ) -> StoreResult<Question> {
        self.bank
            .read()
            .await
            .pick(category, difficulty)
            .ok_or(StoreError::NoQuestions)
    }
}

// -- Sessions --

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, GameSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: SessionId, apply: F) -> StoreResult<GameSession>
    where
        F: FnOnce(&mut GameSession) -> StoreResult<()> + Send,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(StoreError::NotFound("session"))?;
        // Apply to a copy so a rejected transition leaves the record untouched.
        let mut next = session.clone();
        apply(&mut next)?;
        *session = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, room_id: &RoomId) -> StoreResult<GameSession> {
        let mut sessions = self.sessions.write().await;
        if sessions
            .values()
            .any(|s| &s.room_id == room_id && s.is_active())
        {
            return Err(StoreError::Conflict(format!(
                "room {} already has an active round",
                room_id
            )));
        }
        let session = GameSession::new(room_id.clone(), Utc::now());
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: SessionId) -> StoreResult<GameSession> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("session"))
    }

    async fn active_for_room(&self, room_id: &RoomId) -> StoreResult<Option<GameSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| &s.room_id == room_id && s.is_active())
            .cloned())
    }

    async fn set_question(&self, id: SessionId, question_id: QuestionId) -> StoreResult<GameSession> {
        self.update(id, |s| s.present(question_id, Utc::now()).map_err(Into::into)).await
    }

    async fn set_buzzed(&self, id: SessionId, participant_id: ParticipantId) -> StoreResult<GameSession> {
        self.update(id, |s| s.record_buzz(participant_id).map_err(Into::into)).await
    }

    async fn finalize(&self, id: SessionId, correct: bool) -> StoreResult<GameSession> {
        self.update(id, |s| s.resolve(correct, Utc::now()).map(|_| ()).map_err(Into::into))
            .await
    }

    async fn abandon(&self, id: SessionId) -> StoreResult<GameSession> {
        self.update(id, |s| s.abandon(Utc::now()).map_err(Into::into)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buzzline_common::session::SessionStatus;

    fn new_question(prompt: &str, answer: &str, category: &str, difficulty: Difficulty) -> NewQuestion {
        NewQuestion {
            prompt: prompt.into(),
            answer: answer.into(),
            category: category.into(),
            difficulty,
        }
    }

    #[tokio::test]
    async fn test_create_room_makes_creator_admin() {
        let store = MemoryRoomStore::new();
        let (room, creator) = store
            .create("Friday quiz", true, "Host", BuzzMode::Queue)
            .await
            .unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.created_by, creator.id);
        assert_eq!(room.mode, BuzzMode::Queue);
        assert!(creator.is_admin);
        assert!(store.is_admin(&room.id, creator.id).await.unwrap());

        let detail = store.get(&room.id).await.unwrap();
        assert_eq!(detail.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_add_participant_is_idempotent_by_name() {
        let store = MemoryRoomStore::new();
        let (room, _) = store.create("r", false, "Host", BuzzMode::FirstWins).await.unwrap();

        let first = store.add_participant(&room.id, "Alice").await.unwrap();
        assert!(!first.existing);
        assert!(!first.participant.is_admin);

        let again = store.add_participant(&room.id, "Alice").await.unwrap();
        assert!(again.existing);
        assert_eq!(again.participant.id, first.participant.id);

        let detail = store.get(&room.id).await.unwrap();
        let names: Vec<&str> = detail.participants.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Host", "Alice"]);
    }

    #[tokio::test]
    async fn test_only_creator_is_admin() {
        let store = MemoryRoomStore::new();
        let (room, _) = store.create("r", false, "Host", BuzzMode::FirstWins).await.unwrap();
        let alice = store.add_participant(&room.id, "Alice").await.unwrap().participant;
        assert!(!store.is_admin(&room.id, alice.id).await.unwrap());

        // An admin of another room is not an admin here.
        let (_, other_host) = store.create("r2", false, "Other", BuzzMode::FirstWins).await.unwrap();
        assert!(!store.is_admin(&room.id, other_host.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found() {
        let store = MemoryRoomStore::new();
        let missing = RoomId::new("NOPE000000");
        assert!(matches!(store.get(&missing).await, Err(StoreError::NotFound("room"))));
        assert!(store.add_participant(&missing, "Alice").await.is_err());
        assert!(store.update_status(&missing, RoomStatus::Playing).await.is_err());
        assert!(store.update_score(ParticipantId::new(), 10).await.is_err());
    }

    #[tokio::test]
    async fn test_public_waiting_listing() {
        let store = MemoryRoomStore::new();
        let (open, _) = store.create("open", true, "A", BuzzMode::FirstWins).await.unwrap();
        let (_, _) = store.create("private", false, "B", BuzzMode::FirstWins).await.unwrap();
        let (busy, _) = store.create("busy", true, "C", BuzzMode::FirstWins).await.unwrap();
        store.update_status(&busy.id, RoomStatus::Playing).await.unwrap();

        let listed = store.list_public_waiting().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].room.id, open.id);
    }

    #[tokio::test]
    async fn test_ranking_follows_scores() {
        let store = MemoryRoomStore::new();
        let (room, host) = store.create("r", false, "Host", BuzzMode::FirstWins).await.unwrap();
        let alice = store.add_participant(&room.id, "Alice").await.unwrap().participant;
        store.update_score(alice.id, 150).await.unwrap();

        let ranking = store.ranking(&room.id).await.unwrap();
        assert_eq!(ranking[0].participant_id, alice.id);
        assert_eq!(ranking[0].score, 150);
        assert_eq!(ranking[1].participant_id, host.id);
        assert_eq!(ranking[1].rank, 2);
    }

    #[tokio::test]
    async fn test_question_bank_filters() {
        let bank = MemoryQuestionStore::new();
        bank.seed(vec![
            new_question("Capital of Japan?", "Tokyo", "geography", Difficulty::Easy),
            new_question("Capital of Bhutan?", "Thimphu", "geography", Difficulty::Hard),
            new_question("2 + 2?", "4", "math", Difficulty::Easy),
        ])
        .await
        .unwrap();

        assert_eq!(bank.list(None, None).await.unwrap().len(), 3);
        assert_eq!(bank.list(Some("geography"), None).await.unwrap().len(), 2);
        assert_eq!(bank.list(None, Some(Difficulty::Easy)).await.unwrap().len(), 2);

        let q = bank
            .random_matching(Some("geography"), Some(Difficulty::Hard))
            .await
            .unwrap();
        assert_eq!(q.answer, "Thimphu");
        assert_eq!(bank.get(q.id).await.unwrap(), q);

        assert!(matches!(
            bank.random_matching(Some("history"), None).await,
            Err(StoreError::NoQuestions)
        ));
    }

    #[tokio::test]
    async fn test_question_ids_are_unique() {
        let bank = MemoryQuestionStore::new();
        let a = bank.create(new_question("a?", "a", "", Difficulty::Easy)).await.unwrap();
        let b = bank.create(new_question("b?", "b", "", Difficulty::Easy)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(bank.create(new_question(" ", "x", "", Difficulty::Easy)).await.is_err());
    }

    #[tokio::test]
    async fn test_seed_from_file() {
        let path = std::env::temp_dir().join(format!("buzzline-seed-{}.json", SessionId::new()));
        tokio::fs::write(
            &path,
            r#"[{"prompt": "Capital of Japan?", "answer": "Tokyo", "category": "geography", "difficulty": "easy"},
               {"prompt": "Speed of light (km/s)?", "answer": "299792", "difficulty": "legendary"}]"#,
        )
        .await
        .unwrap();

        let bank = MemoryQuestionStore::new();
        assert_eq!(bank.seed_from_file(&path).await.unwrap(), 2);
        let easy = bank.list(None, Some(Difficulty::Easy)).await.unwrap();
        assert_eq!(easy.len(), 2);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_one_active_session_per_room() {
        let store = MemorySessionStore::new();
        let room = RoomId::new("ROOM000001");
        let session = store.create(&room).await.unwrap();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(matches!(store.create(&room).await, Err(StoreError::Conflict(_))));

        // Other rooms are unaffected.
        store.create(&RoomId::new("ROOM000002")).await.unwrap();

        store.abandon(session.id).await.unwrap();
        assert!(store.active_for_room(&room).await.unwrap().is_none());
        store.create(&room).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_transitions_are_enforced() {
        let store = MemorySessionStore::new();
        let room = RoomId::new("ROOM000001");
        let session = store.create(&room).await.unwrap();
        let p = ParticipantId::new();

        assert!(store.set_buzzed(session.id, p).await.is_err());
        assert_eq!(store.get(session.id).await.unwrap().status, SessionStatus::Waiting);

        store.set_question(session.id, QuestionId(7)).await.unwrap();
        let buzzed = store.set_buzzed(session.id, p).await.unwrap();
        assert_eq!(buzzed.buzzed_participant, Some(p));
        assert!(store.set_buzzed(session.id, ParticipantId::new()).await.is_err());

        let done = store.finalize(session.id, true).await.unwrap();
        assert_eq!(done.status, SessionStatus::Answered);
        assert!(store.finalize(session.id, false).await.is_err());
        assert!(store.active_for_room(&room).await.unwrap().is_none());
    }
}
