//! Connection registry and per-room broadcast.
//!
//! All membership changes and deliveries go through a single task that owns
//! the maps, so a broadcast never observes a half-applied registration or
//! eviction. Callers talk to it through a cheap, cloneable [`HubHandle`].
//!
//! Delivery never waits on a slow client: each connection has a bounded
//! outbound queue and a failed `try_send` evicts that connection on the spot.
//! The hub holds the only sender for each queue, so removing the entry is what
//! closes the queue, and that can only happen once.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use buzzline_common::model::{ConnectionId, ParticipantId, RoomId};
use buzzline_common::protocol::serialize_message;

/// A live client as the hub sees it.
pub struct Connection {
    pub id: ConnectionId,
    pub room_id: Option<RoomId>,
    pub participant_id: Option<ParticipantId>,
    outbound: mpsc::Sender<Bytes>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            room_id: None,
            participant_id: None,
            outbound,
        }
    }

    pub fn in_room(mut self, room_id: RoomId, participant_id: ParticipantId) -> Self {
        self.room_id = Some(room_id);
        self.participant_id = Some(participant_id);
        self
    }
}

enum Command {
    Register(Connection),
    Claim {
        id: ConnectionId,
        room_id: RoomId,
        participant_id: ParticipantId,
        reply: oneshot::Sender<bool>,
    },
    Unregister(ConnectionId),
    SendTo {
        id: ConnectionId,
        payload: Bytes,
    },
    BroadcastRoom {
        room_id: RoomId,
        payload: Bytes,
    },
    BroadcastAll(Bytes),
    RoomMembers {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    ConnectedParticipants {
        room_id: RoomId,
        reply: oneshot::Sender<HashSet<ParticipantId>>,
    },
    ConnectionCount(oneshot::Sender<usize>),
}

#[derive(Default)]
struct Hub {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl Hub {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(conn) => self.register(conn),
            Command::Claim {
                id,
                room_id,
                participant_id,
                reply,
            } => {
                let _ = reply.send(self.claim(id, room_id, participant_id));
            }
            Command::Unregister(id) => {
                if self.remove(id) {
                    tracing::debug!("Connection {} unregistered", id);
                }
            }
            Command::SendTo { id, payload } => {
                self.deliver(id, payload);
            }
            Command::BroadcastRoom { room_id, payload } => self.broadcast_room(&room_id, payload),
            Command::BroadcastAll(payload) => self.broadcast_all(payload),
            Command::RoomMembers { room_id, reply } => {
                let _ = reply.send(self.members(&room_id));
            }
            Command::ConnectedParticipants { room_id, reply } => {
                let participants = self
                    .members(&room_id)
                    .iter()
                    .filter_map(|id| self.connections.get(id))
                    .filter_map(|c| c.participant_id)
                    .collect();
                let _ = reply.send(participants);
            }
            Command::ConnectionCount(reply) => {
                let _ = reply.send(self.connections.len());
            }
        }
    }

    /// Insert or replace a connection. Re-registering the same id moves it to
    /// the room it now carries.
    fn register(&mut self, conn: Connection) {
        if self.connections.contains_key(&conn.id) {
            self.leave_room(conn.id);
        }
        if let Some(room_id) = &conn.room_id {
            self.rooms.entry(room_id.clone()).or_default().insert(conn.id);
        }
        self.connections.insert(conn.id, conn);
    }

    fn assign(&mut self, id: ConnectionId, room_id: RoomId, participant_id: ParticipantId) {
        if !self.connections.contains_key(&id) {
            // Evicted while the join was in flight.
            return;
        }
        self.leave_room(id);
        self.rooms.entry(room_id.clone()).or_default().insert(id);
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.room_id = Some(room_id);
            conn.participant_id = Some(participant_id);
        }
    }

    /// Bind `id` to a participant unless another live connection in the room
    /// already speaks for it. Check and bind happen in one step.
    fn claim(&mut self, id: ConnectionId, room_id: RoomId, participant_id: ParticipantId) -> bool {
        let held = self
            .members(&room_id)
            .iter()
            .filter(|member| **member != id)
            .filter_map(|member| self.connections.get(member))
            .any(|c| c.participant_id == Some(participant_id));
        if held {
            return false;
        }
        self.assign(id, room_id, participant_id);
        true
    }

    fn leave_room(&mut self, id: ConnectionId) {
        let Some(room_id) = self.connections.get(&id).and_then(|c| c.room_id.clone()) else {
            return;
        };
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
    }

    /// Drop a connection, which closes its outbound queue.
    fn remove(&mut self, id: ConnectionId) -> bool {
        self.leave_room(id);
        self.connections.remove(&id).is_some()
    }

    /// Non-blocking send. A full or closed queue evicts the connection.
    fn deliver(&mut self, id: ConnectionId, payload: Bytes) -> bool {
        let Some(conn) = self.connections.get(&id) else {
            return false;
        };
        match conn.outbound.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full for {}, evicting slow client", id);
                self.remove(id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Outbound queue closed for {}, evicting", id);
                self.remove(id);
                false
            }
        }
    }

    fn members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    fn broadcast_room(&mut self, room_id: &RoomId, payload: Bytes) {
        for id in self.members(room_id) {
            self.deliver(id, payload.clone());
        }
    }

    fn broadcast_all(&mut self, payload: Bytes) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.deliver(id, payload.clone());
        }
    }
}

/// Handle to the hub task. Operations never fail from the caller's side; a
/// stopped hub simply drops them.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl HubHandle {
    /// Start the hub on the current runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut hub = Hub::default();
            while let Some(command) = rx.recv().await {
                hub.apply(command);
            }
            tracing::debug!("Hub stopped");
        });
        Self { commands: tx }
    }

    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Hub is not running, dropping command");
        }
    }

    pub fn register(&self, conn: Connection) {
        self.submit(Command::Register(conn));
    }

    /// Bind a registered connection to a room and participant. Returns false,
    /// changing nothing, when another live connection holds that participant.
    pub async fn claim(
        &self,
        id: ConnectionId,
        room_id: RoomId,
        participant_id: ParticipantId,
    ) -> bool {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Claim {
            id,
            room_id,
            participant_id,
            reply,
        });
        rx.await.unwrap_or(false)
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.submit(Command::Unregister(id));
    }

    pub fn send_to<T: Serialize>(&self, id: ConnectionId, msg: &T) {
        if let Some(payload) = encode(msg) {
            self.submit(Command::SendTo { id, payload });
        }
    }

    /// Serialize once and deliver the same bytes to every member of the room.
    pub fn broadcast_to_room<T: Serialize>(&self, room_id: &RoomId, msg: &T) {
        if let Some(payload) = encode(msg) {
            self.submit(Command::BroadcastRoom {
                room_id: room_id.clone(),
                payload,
            });
        }
    }

    pub fn broadcast_all<T: Serialize>(&self, msg: &T) {
        if let Some(payload) = encode(msg) {
            self.submit(Command::BroadcastAll(payload));
        }
    }

    pub async fn room_members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::RoomMembers {
            room_id: room_id.clone(),
            reply,
        });
        rx.await.unwrap_or_default()
    }

    /// Participants in the room that currently have a live connection.
    pub async fn connected_participants(&self, room_id: &RoomId) -> HashSet<ParticipantId> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::ConnectedParticipants {
            room_id: room_id.clone(),
            reply,
        });
        rx.await.unwrap_or_default()
    }

    /// Number of registered connections. Also acts as a barrier: every command
    /// submitted before it has been applied once it returns.
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::ConnectionCount(reply));
        rx.await.unwrap_or_default()
    }
}

fn encode<T: Serialize>(msg: &T) -> Option<Bytes> {
    match serialize_message(msg) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            None
        }
    }
}
