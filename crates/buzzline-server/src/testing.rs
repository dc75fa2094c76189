//! Fake connections and a seeded server for handler tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use buzzline_common::model::{
    BuzzMode, ConnectionId, NewQuestion, ParticipantId, QuestionId, RoomId, SessionId,
};
use buzzline_common::protocol::{deserialize_message, ClientMessage, ServerMessage};
use buzzline_common::scoring::Difficulty;

use crate::handler::{self, ConnectionContext};
use crate::hub::Connection;
use crate::arbitrator::Arbitrator;
use crate::hub::HubHandle;
use crate::server::{Limits, ServerState, SharedState};
use crate::store::{
    MemoryQuestionStore, MemoryRoomStore, MemorySessionStore, SessionStore, StoreError,
    StoreResult,
};
use buzzline_common::session::GameSession;

const LIMITS: Limits = Limits {
    max_connections: 64,
    outbound_capacity: 256,
};

pub async fn state() -> SharedState {
    Arc::new(ServerState::new(Arc::new(bank().await), LIMITS))
}

/// Like [`state`], with round records kept in `sessions`.
pub async fn state_with_sessions(sessions: Arc<dyn SessionStore>) -> SharedState {
    Arc::new(ServerState {
        hub: HubHandle::spawn(),
        arbitrator: Arbitrator::new(),
        rooms: Arc::new(MemoryRoomStore::new()),
        questions: Arc::new(bank().await),
        sessions,
        limits: LIMITS,
    })
}

async fn bank() -> MemoryQuestionStore {
    let bank = MemoryQuestionStore::new();
    bank.seed(vec![NewQuestion {
        prompt: "Capital of Japan?".into(),
        answer: "Tokyo".into(),
        category: "geography".into(),
        difficulty: Difficulty::Easy,
    }])
    .await
    .unwrap();
    bank
}

/// In-memory session store whose named operations can be taken offline.
#[derive(Default)]
pub struct FlakySessionStore {
    inner: MemorySessionStore,
    down: Mutex<HashSet<&'static str>>,
}

impl FlakySessionStore {
    pub fn fail(&self, op: &'static str) {
        self.down.lock().unwrap().insert(op);
    }

    pub fn recover(&self) {
        self.down.lock().unwrap().clear();
    }

    fn check(&self, op: &'static str) -> StoreResult<()> {
        if self.down.lock().unwrap().contains(op) {
            return Err(StoreError::Unavailable(format!("{} offline", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FlakySessionStore {
    async fn create(&self, room_id: &RoomId) -> StoreResult<GameSession> {
        self.check("create")?;
        self.inner.create(room_id).await
    }

    async fn get(&self, id: SessionId) -> StoreResult<GameSession> {
        self.check("get")?;
        self.inner.get(id).await
    }

    async fn active_for_room(&self, room_id: &RoomId) -> StoreResult<Option<GameSession>> {
        self.check("active_for_room")?;
        self.inner.active_for_room(room_id).await
    }

    async fn set_question(&self, id: SessionId, question_id: QuestionId) -> StoreResult<GameSession> {
        self.check("set_question")?;
        self.inner.set_question(id, question_id).await
    }

    async fn set_buzzed(&self, id: SessionId, participant_id: ParticipantId) -> StoreResult<GameSession> {
        self.check("set_buzzed")?;
        self.inner.set_buzzed(id, participant_id).await
    }

    async fn finalize(&self, id: SessionId, correct: bool) -> StoreResult<GameSession> {
        self.check("finalize")?;
        self.inner.finalize(id, correct).await
    }

    async fn abandon(&self, id: SessionId) -> StoreResult<GameSession> {
        self.check("abandon")?;
        self.inner.abandon(id).await
    }
}

pub fn error_message(msg: &ServerMessage) -> Option<&str> {
    match msg {
        ServerMessage::Error { message } => Some(message),
        _ => None,
    }
}

/// A registered connection whose outbound queue the test reads directly.
pub struct TestClient {
    pub ctx: ConnectionContext,
    rx: mpsc::Receiver<Bytes>,
}

impl TestClient {
    pub fn connect(state: &SharedState) -> Self {
        Self::connect_with_capacity(state, 256)
    }

    pub fn connect_with_capacity(state: &SharedState, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let ctx = ConnectionContext::new(ConnectionId::new());
        state.hub.register(Connection::new(ctx.connection_id, tx));
        Self { ctx, rx }
    }

    pub async fn send(&mut self, state: &SharedState, msg: ClientMessage) {
        handler::handle_message(&mut self.ctx, msg, state).await;
    }

    /// Everything delivered so far, once the hub has caught up.
    pub async fn drain(&mut self, state: &SharedState) -> Vec<ServerMessage> {
        state.hub.connection_count().await;
        let mut out = Vec::new();
        while let Ok(bytes) = self.rx.try_recv() {
            out.push(deserialize_message(&bytes).unwrap());
        }
        out
    }
}

/// A room created by its host's connection.
pub struct TestRoom {
    pub id: RoomId,
    pub host: TestClient,
}

impl TestRoom {
    pub async fn create(state: &SharedState, mode: BuzzMode) -> Self {
        let mut host = TestClient::connect(state);
        host.send(
            state,
            ClientMessage::CreateRoom {
                name: "Friday quiz".into(),
                public: true,
                creator_name: "Host".into(),
                mode,
            },
        )
        .await;
        let id = host.ctx.room_id.clone().unwrap();
        Self { id, host }
    }

    pub async fn join(&self, state: &SharedState, name: &str) -> TestClient {
        let mut client = TestClient::connect(state);
        client
            .send(
                state,
                ClientMessage::JoinRoom {
                    room_id: self.id.clone(),
                    name: name.into(),
                },
            )
            .await;
        client
    }
}
