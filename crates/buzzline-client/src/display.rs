use buzzline_common::protocol::{RoomSnapshot, ServerMessage};

use crate::state::Session;

/// One line per server event. `session` should already reflect `msg`.
pub fn render(msg: &ServerMessage, session: &Session) -> String {
    match msg {
        ServerMessage::Welcome { server_version, .. } => {
            format!("Connected to buzzline server v{}. Type /help for commands.", server_version)
        }
        ServerMessage::Pong => "pong".to_string(),
        ServerMessage::Notice { message } => format!("** {}", message),
        ServerMessage::Success { message, data } => match data.get("roomId") {
            Some(room_id) => format!("{} (room code {})", message, room_id.as_str().unwrap_or("?")),
            None => message.clone(),
        },
        ServerMessage::Error { message } => format!("error: {}", message),
        ServerMessage::RoomList { rooms } => {
            if rooms.is_empty() {
                return "No open rooms.".to_string();
            }
            let listed: Vec<String> = rooms
                .iter()
                .map(|r| format!("{} '{}' ({} players)", r.room_id, r.name, r.participant_count))
                .collect();
            format!("Open rooms: {}", listed.join(", "))
        }
        ServerMessage::BuzzResult { won: true, .. } => "You buzzed first! Answer now.".to_string(),
        ServerMessage::BuzzResult { won: false, winner } => match winner {
            Some(w) => format!("Too slow, {} buzzed first.", w.name),
            None => "Too slow.".to_string(),
        },
        ServerMessage::RoomUpdated(snapshot) => room_line(snapshot, session),
        ServerMessage::QuestionResult {
            participant_id,
            correct,
            correct_answer,
            points,
        } => {
            let who = session.name_of(*participant_id);
            let mut line = if *correct {
                format!("{} is right! +{} points", who, points)
            } else {
                format!("{} is wrong.", who)
            };
            if let Some(answer) = correct_answer {
                line.push_str(&format!(" The answer was: {}", answer));
            }
            line
        }
        ServerMessage::QueueUpdated { queue } => {
            if queue.is_empty() {
                return "Queue is empty.".to_string();
            }
            let names: Vec<String> = queue
                .iter()
                .enumerate()
                .map(|(i, e)| format!("{}. {}", i + 1, e.name))
                .collect();
            format!("Queue: {}", names.join("  "))
        }
        ServerMessage::JudgeResult {
            correct,
            participant_id,
            points,
        } => {
            let who = session.name_of(*participant_id);
            if *correct {
                format!("Judge: {} is correct (+{})", who, points)
            } else {
                format!("Judge: {} is incorrect", who)
            }
        }
        ServerMessage::QueueReset { message } => message.clone(),
        ServerMessage::GameEnded { ranking } => {
            let board: Vec<String> = ranking
                .iter()
                .map(|r| format!("#{} {} ({})", r.rank, r.name, r.score))
                .collect();
            format!("Game over! {}", board.join("  "))
        }
    }
}

fn room_line(snapshot: &RoomSnapshot, session: &Session) -> String {
    let players: Vec<String> = snapshot
        .participants
        .iter()
        .map(|p| {
            let mut tag = format!("{} {}", p.name, p.score);
            if p.is_admin {
                tag.push('*');
            }
            if !p.connected {
                tag.push_str(" (away)");
            }
            if session.is_me(p.id) {
                tag = format!("[{}]", tag);
            }
            tag
        })
        .collect();

    let mut line = format!(
        "[{}] {:?} | {}",
        snapshot.name,
        snapshot.status,
        players.join(", ")
    );
    if let Some(q) = &snapshot.current_question {
        line.push_str(&format!(
            " | Q ({}, {}): {}",
            q.difficulty.as_str(),
            q.category,
            q.prompt
        ));
    }
    if let Some(id) = snapshot.buzzed_by {
        line.push_str(&format!(" | {} is answering", session.name_of(id)));
    } else if snapshot.can_buzz {
        line.push_str(" | BUZZ NOW");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use buzzline_common::model::{BuzzMode, ParticipantId, QuestionId, RankingEntry, RoomId, RoomStatus};
    use buzzline_common::protocol::{ParticipantRef, ParticipantView, QuestionView};
    use buzzline_common::scoring::Difficulty;

    fn session_with(me: ParticipantId) -> (Session, RoomSnapshot) {
        let room_id = RoomId::new("ABCDEF1234");
        let snapshot = RoomSnapshot {
            room_id: room_id.clone(),
            name: "Friday quiz".into(),
            status: RoomStatus::Playing,
            mode: BuzzMode::FirstWins,
            participants: vec![ParticipantView {
                id: me,
                name: "Alice".into(),
                score: 100,
                is_admin: false,
                connected: true,
            }],
            current_question: Some(QuestionView {
                id: QuestionId(1),
                prompt: "Capital of Japan?".into(),
                category: "geography".into(),
                difficulty: Difficulty::Easy,
            }),
            can_buzz: true,
            buzzed_by: None,
        };
        let session = Session {
            room_id: Some(room_id),
            participant_id: Some(me),
            room: Some(snapshot.clone()),
        };
        (session, snapshot)
    }

    #[test]
    fn test_room_line() {
        let me = ParticipantId::new();
        let (session, snapshot) = session_with(me);
        let line = render(&ServerMessage::RoomUpdated(snapshot), &session);
        assert!(line.contains("[Alice 100]"));
        assert!(line.contains("Capital of Japan?"));
        assert!(line.ends_with("BUZZ NOW"));
    }

    #[test]
    fn test_results_use_names() {
        let me = ParticipantId::new();
        let (session, _) = session_with(me);
        let line = render(
            &ServerMessage::QuestionResult {
                participant_id: me,
                correct: true,
                correct_answer: Some("Tokyo".into()),
                points: 100,
            },
            &session,
        );
        assert_eq!(line, "Alice is right! +100 points The answer was: Tokyo");

        let line = render(
            &ServerMessage::BuzzResult {
                won: false,
                winner: Some(ParticipantRef {
                    id: ParticipantId::new(),
                    name: "Bob".into(),
                }),
            },
            &session,
        );
        assert_eq!(line, "Too slow, Bob buzzed first.");
    }

    #[test]
    fn test_game_over_board() {
        let line = render(
            &ServerMessage::GameEnded {
                ranking: vec![RankingEntry {
                    participant_id: ParticipantId::new(),
                    name: "Alice".into(),
                    score: 250,
                    rank: 1,
                }],
            },
            &Session::default(),
        );
        assert_eq!(line, "Game over! #1 Alice (250)");
    }
}
