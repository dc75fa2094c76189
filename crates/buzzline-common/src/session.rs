use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ParticipantId, QuestionId, RoomId, SessionId};

// -- Round State Machine --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Question,
    Buzzed,
    Answered,
    Finished,
}

impl SessionStatus {
    /// Waiting, Question and Buzzed sessions still block a new round.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Waiting | SessionStatus::Question | SessionStatus::Buzzed
        )
    }
}

/// One round in a room: a question is shown, someone buzzes, the answer is judged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub id: SessionId,
    pub room_id: RoomId,
    pub question_id: Option<QuestionId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub buzzed_participant: Option<ParticipantId>,
    pub correct: Option<bool>,
}

impl GameSession {
    pub fn new(room_id: RoomId, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            room_id,
            question_id: None,
            started_at: now,
            ended_at: None,
            status: SessionStatus::Waiting,
            buzzed_participant: None,
            correct: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// waiting -> question. The start timestamp is reset to when the question
    /// is shown, since that is what answer times are measured against.
    pub fn present(&mut self, question_id: QuestionId, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.status != SessionStatus::Waiting {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: SessionStatus::Question,
            });
        }
        self.question_id = Some(question_id);
        self.started_at = now;
        self.status = SessionStatus::Question;
        Ok(())
    }

    /// question -> buzzed
    pub fn record_buzz(&mut self, participant: ParticipantId) -> Result<(), SessionError> {
        if self.status != SessionStatus::Question {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: SessionStatus::Buzzed,
            });
        }
        self.buzzed_participant = Some(participant);
        self.status = SessionStatus::Buzzed;
        Ok(())
    }

    /// Close the round with a judged outcome.
    ///
    /// A correct answer moves to `answered`, anything else to `finished`.
    /// Queue-mode rounds are judged straight from `question`, so both
    /// `question` and `buzzed` may resolve either way.
    pub fn resolve(&mut self, correct: bool, now: DateTime<Utc>) -> Result<SessionStatus, SessionError> {
        let to = if correct {
            SessionStatus::Answered
        } else {
            SessionStatus::Finished
        };
        if !matches!(self.status, SessionStatus::Question | SessionStatus::Buzzed) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.correct = Some(correct);
        self.ended_at = Some(now);
        Ok(to)
    }

    /// Abandon an active round (administrative end of game).
    pub fn abandon(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.is_active() {
            return Err(SessionError::NotActive(self.status));
        }
        self.status = SessionStatus::Finished;
        self.ended_at = Some(now);
        Ok(())
    }

    /// Time since the question was shown; zero if the clock went backwards.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}

// -- Errors --

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("cannot move round from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("round is not active ({0:?})")]
    NotActive(SessionStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn fresh() -> GameSession {
        GameSession::new(RoomId::new("ROOM000001"), Utc::now())
    }

    #[test]
    fn test_new_session_is_waiting_and_active() {
        let session = fresh();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert!(session.is_active());
        assert!(session.question_id.is_none());
        assert!(session.buzzed_participant.is_none());
    }

    #[test]
    fn test_full_round_to_answered() {
        let mut session = fresh();
        let now = Utc::now();
        session.present(QuestionId(3), now).unwrap();
        assert_eq!(session.status, SessionStatus::Question);
        assert_eq!(session.started_at, now);

        let p = ParticipantId::new();
        session.record_buzz(p).unwrap();
        assert_eq!(session.status, SessionStatus::Buzzed);
        assert_eq!(session.buzzed_participant, Some(p));

        let status = session.resolve(true, now + TimeDelta::seconds(2)).unwrap();
        assert_eq!(status, SessionStatus::Answered);
        assert!(!session.is_active());
        assert_eq!(session.correct, Some(true));
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_wrong_answer_finishes_round() {
        let mut session = fresh();
        session.present(QuestionId(1), Utc::now()).unwrap();
        session.record_buzz(ParticipantId::new()).unwrap();
        assert_eq!(session.resolve(false, Utc::now()).unwrap(), SessionStatus::Finished);
    }

    #[test]
    fn test_queue_round_resolves_from_question() {
        let mut session = fresh();
        session.present(QuestionId(1), Utc::now()).unwrap();
        assert_eq!(session.resolve(true, Utc::now()).unwrap(), SessionStatus::Answered);
    }

    #[test]
    fn test_cannot_buzz_before_question() {
        let mut session = fresh();
        assert!(matches!(
            session.record_buzz(ParticipantId::new()),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_second_buzz_rejected() {
        let mut session = fresh();
        session.present(QuestionId(1), Utc::now()).unwrap();
        let first = ParticipantId::new();
        session.record_buzz(first).unwrap();
        assert!(session.record_buzz(ParticipantId::new()).is_err());
        assert_eq!(session.buzzed_participant, Some(first));
    }

    #[test]
    fn test_cannot_resolve_twice() {
        let mut session = fresh();
        session.present(QuestionId(1), Utc::now()).unwrap();
        session.resolve(true, Utc::now()).unwrap();
        assert!(session.resolve(false, Utc::now()).is_err());
        assert_eq!(session.status, SessionStatus::Answered);
    }

    #[test]
    fn test_cannot_present_twice() {
        let mut session = fresh();
        session.present(QuestionId(1), Utc::now()).unwrap();
        assert!(session.present(QuestionId(2), Utc::now()).is_err());
        assert_eq!(session.question_id, Some(QuestionId(1)));
    }

    #[test]
    fn test_abandon_only_active() {
        let mut session = fresh();
        session.abandon(Utc::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Finished);
        assert!(matches!(
            session.abandon(Utc::now()),
            Err(SessionError::NotActive(SessionStatus::Finished))
        ));
    }

    #[test]
    fn test_elapsed_is_measured_from_question() {
        let mut session = fresh();
        let shown = Utc::now();
        session.present(QuestionId(1), shown).unwrap();
        assert_eq!(
            session.elapsed(shown + TimeDelta::seconds(4)),
            Duration::from_secs(4)
        );
        assert_eq!(session.elapsed(shown - TimeDelta::seconds(4)), Duration::ZERO);
    }
}
