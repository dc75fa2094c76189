use buzzline_common::model::{ParticipantId, RoomId};
use buzzline_common::protocol::{ParticipantView, RoomSnapshot, ServerMessage};

/// What the client knows about where it is.
#[derive(Debug, Default)]
pub struct Session {
    pub room_id: Option<RoomId>,
    pub participant_id: Option<ParticipantId>,
    pub room: Option<RoomSnapshot>,
}

impl Session {
    pub fn apply(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::Success { data, .. } => {
                let room_id = data
                    .get("roomId")
                    .and_then(|v| serde_json::from_value::<RoomId>(v.clone()).ok());
                let participant_id = data
                    .get("participantId")
                    .and_then(|v| serde_json::from_value::<ParticipantId>(v.clone()).ok());
                if let (Some(room_id), Some(participant_id)) = (room_id, participant_id) {
                    if self.room_id.as_ref() != Some(&room_id) {
                        self.room = None;
                    }
                    self.room_id = Some(room_id);
                    self.participant_id = Some(participant_id);
                }
            }
            ServerMessage::RoomUpdated(snapshot) => {
                if self.room_id.as_ref() == Some(&snapshot.room_id) {
                    self.room = Some(snapshot.clone());
                }
            }
            _ => {}
        }
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&ParticipantView> {
        self.room
            .as_ref()
            .and_then(|r| r.participants.iter().find(|p| p.id == id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ParticipantView> {
        self.room.as_ref().and_then(|r| {
            r.participants
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
        })
    }

    /// Display name for a participant id, falling back to a short id.
    pub fn name_of(&self, id: ParticipantId) -> String {
        match self.participant(id) {
            Some(p) => p.name.clone(),
            None => id.to_string().chars().take(8).collect(),
        }
    }

    pub fn is_me(&self, id: ParticipantId) -> bool {
        self.participant_id == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buzzline_common::model::{BuzzMode, RoomStatus};
    use serde_json::json;

    fn snapshot(room_id: &RoomId, alice: ParticipantId) -> RoomSnapshot {
        RoomSnapshot {
            room_id: room_id.clone(),
            name: "Friday quiz".into(),
            status: RoomStatus::Waiting,
            mode: BuzzMode::FirstWins,
            participants: vec![ParticipantView {
                id: alice,
                name: "Alice".into(),
                score: 0,
                is_admin: true,
                connected: true,
            }],
            current_question: None,
            can_buzz: false,
            buzzed_by: None,
        }
    }

    #[test]
    fn test_success_binds_room() {
        let mut session = Session::default();
        let me = ParticipantId::new();
        session.apply(&ServerMessage::Success {
            message: "Room created".into(),
            data: json!({ "roomId": "ABCDEF1234", "participantId": me }),
        });
        assert_eq!(session.room_id, Some(RoomId::new("ABCDEF1234")));
        assert!(session.is_me(me));
    }

    #[test]
    fn test_unrelated_success_ignored() {
        let mut session = Session::default();
        session.apply(&ServerMessage::Success {
            message: "Added to queue".into(),
            data: json!({ "position": 2 }),
        });
        assert!(session.room_id.is_none());
    }

    #[test]
    fn test_room_updates_tracked_for_own_room() {
        let mut session = Session::default();
        let me = ParticipantId::new();
        let room_id = RoomId::new("ABCDEF1234");
        session.apply(&ServerMessage::Success {
            message: "ok".into(),
            data: json!({ "roomId": room_id, "participantId": me }),
        });

        session.apply(&ServerMessage::RoomUpdated(snapshot(&RoomId::new("OTHER00000"), me)));
        assert!(session.room.is_none());

        session.apply(&ServerMessage::RoomUpdated(snapshot(&room_id, me)));
        assert_eq!(session.name_of(me), "Alice");
        assert_eq!(session.find_by_name("alice").map(|p| p.id), Some(me));
        assert_eq!(session.name_of(ParticipantId::new()).len(), 8);
    }
}
