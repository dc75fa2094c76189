use buzzline_common::model::{BuzzMode, ParticipantId, RoomId};
use buzzline_common::protocol::ClientMessage;
use buzzline_common::scoring::Difficulty;

use crate::state::Session;

pub const HELP: &str = "\
Commands:
  /create [--public] [--queue] <your-name> <room name>
  /join <room-id> <your-name>
  /rooms                      list open rooms
  /start [easy|medium|hard] [category]
  /buzz                       (or an empty line)
  /answer <text>              (or just type the answer)
  /judge <player> <y|n>       admin: judge the current responder
  /reset                      admin: clear the buzz queue
  /end                        admin: end the game
  /ping
  /quit";

#[derive(Debug, Clone)]
pub enum Action {
    Send(ClientMessage),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command /{0}, try /help")]
    Unknown(String),
    #[error("join or create a room first")]
    NoRoom,
    #[error("no player named '{0}' in this room")]
    UnknownPlayer(String),
}

/// Turn one line of user input into an action.
pub fn parse(line: &str, session: &Session) -> Result<Action, InputError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        // Bare input: an empty line buzzes, anything else is an answer.
        if line.is_empty() {
            return Ok(Action::Send(ClientMessage::BuzzIn {
                room_id: current_room(session)?,
            }));
        }
        return Ok(Action::Send(ClientMessage::SubmitAnswer {
            room_id: current_room(session)?,
            answer: line.to_string(),
        }));
    };

    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };

    let msg = match command {
        "help" | "h" | "?" => return Ok(Action::Help),
        "quit" | "q" | "exit" => return Ok(Action::Quit),
        "ping" => ClientMessage::Ping,
        "rooms" | "list" => ClientMessage::ListRooms,
        "create" => parse_create(args)?,
        "join" => {
            let (room_id, name) = args
                .split_once(char::is_whitespace)
                .ok_or(InputError::Usage("/join <room-id> <your-name>"))?;
            ClientMessage::JoinRoom {
                room_id: RoomId::new(room_id.to_ascii_uppercase()),
                name: name.trim().to_string(),
            }
        }
        "start" => {
            let mut difficulty = None;
            let mut category = Vec::new();
            for word in args.split_whitespace() {
                match word.to_ascii_lowercase().as_str() {
                    "easy" | "medium" | "hard" if difficulty.is_none() => {
                        difficulty = Some(Difficulty::parse(word))
                    }
                    _ => category.push(word),
                }
            }
            ClientMessage::StartGame {
                room_id: current_room(session)?,
                category: (!category.is_empty()).then(|| category.join(" ")),
                difficulty,
            }
        }
        "buzz" | "b" => ClientMessage::BuzzIn {
            room_id: current_room(session)?,
        },
        "answer" | "a" => {
            if args.is_empty() {
                return Err(InputError::Usage("/answer <text>"));
            }
            ClientMessage::SubmitAnswer {
                room_id: current_room(session)?,
                answer: args.to_string(),
            }
        }
        "judge" => {
            let (player, verdict) = args
                .rsplit_once(char::is_whitespace)
                .ok_or(InputError::Usage("/judge <player> <y|n>"))?;
            let correct = match verdict.to_ascii_lowercase().as_str() {
                "y" | "yes" | "correct" | "right" => true,
                "n" | "no" | "wrong" => false,
                _ => return Err(InputError::Usage("/judge <player> <y|n>")),
            };
            ClientMessage::JudgeAnswer {
                room_id: current_room(session)?,
                participant_id: resolve_player(player.trim(), session)?,
                correct,
            }
        }
        "reset" => ClientMessage::ResetQueue {
            room_id: current_room(session)?,
        },
        "end" => ClientMessage::EndGame {
            room_id: current_room(session)?,
        },
        other => return Err(InputError::Unknown(other.to_string())),
    };
    Ok(Action::Send(msg))
}

fn parse_create(args: &str) -> Result<ClientMessage, InputError> {
    const USAGE: &str = "/create [--public] [--queue] <your-name> <room name>";
    let mut public = false;
    let mut mode = BuzzMode::FirstWins;
    let mut words = Vec::new();
    for word in args.split_whitespace() {
        match word {
            "--public" | "-p" => public = true,
            "--queue" | "-q" => mode = BuzzMode::Queue,
            _ => words.push(word),
        }
    }
    let Some((creator_name, name)) = words.split_first() else {
        return Err(InputError::Usage(USAGE));
    };
    if name.is_empty() {
        return Err(InputError::Usage(USAGE));
    }
    Ok(ClientMessage::CreateRoom {
        name: name.join(" "),
        public,
        creator_name: creator_name.to_string(),
        mode,
    })
}

fn current_room(session: &Session) -> Result<RoomId, InputError> {
    session.room_id.clone().ok_or(InputError::NoRoom)
}

/// A player by display name, or by a full participant id.
fn resolve_player(player: &str, session: &Session) -> Result<ParticipantId, InputError> {
    if let Some(p) = session.find_by_name(player) {
        return Ok(p.id);
    }
    uuid::Uuid::parse_str(player)
        .map(ParticipantId)
        .map_err(|_| InputError::UnknownPlayer(player.to_string()))
}
