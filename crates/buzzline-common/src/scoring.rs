use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    /// Parse a difficulty tier. Anything unrecognised is treated as the lowest tier.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "medium" => Difficulty::Medium,
            "hard" => Difficulty::Hard,
            _ => Difficulty::Easy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl From<String> for Difficulty {
    fn from(s: String) -> Self {
        Difficulty::parse(&s)
    }
}

pub const EASY_BASE: u32 = 50;
pub const MEDIUM_BASE: u32 = 100;
pub const HARD_BASE: u32 = 200;

pub const FAST_ANSWER: Duration = Duration::from_secs(5);
pub const FAST_BONUS: u32 = 50;
pub const STEADY_ANSWER: Duration = Duration::from_secs(10);
pub const STEADY_BONUS: u32 = 25;

pub fn base_points(difficulty: Difficulty) -> u32 {
    match difficulty {
        Difficulty::Easy => EASY_BASE,
        Difficulty::Medium => MEDIUM_BASE,
        Difficulty::Hard => HARD_BASE,
    }
}

/// Bonus for answering quickly, measured from when the question was shown.
pub fn time_bonus(elapsed: Duration) -> u32 {
    if elapsed <= FAST_ANSWER {
        FAST_BONUS
    } else if elapsed <= STEADY_ANSWER {
        STEADY_BONUS
    } else {
        0
    }
}

/// Points awarded for a correct answer.
pub fn score(difficulty: Difficulty, elapsed: Duration) -> u32 {
    base_points(difficulty) + time_bonus(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_harder_questions_score_more() {
        assert!(score(Difficulty::Hard, secs(1)) > score(Difficulty::Medium, secs(1)));
        assert!(score(Difficulty::Medium, secs(1)) > score(Difficulty::Easy, secs(1)));
    }

    #[test]
    fn test_faster_answers_never_score_less() {
        for d in Difficulty::ALL {
            assert!(score(d, secs(3)) >= score(d, secs(12)));
            assert!(score(d, secs(3)) >= score(d, secs(7)));
            assert!(score(d, secs(7)) >= score(d, secs(12)));
        }
    }

    #[test]
    fn test_time_bonus_thresholds() {
        assert_eq!(time_bonus(Duration::ZERO), FAST_BONUS);
        assert_eq!(time_bonus(secs(5)), FAST_BONUS);
        assert_eq!(time_bonus(Duration::from_millis(5_001)), STEADY_BONUS);
        assert_eq!(time_bonus(secs(10)), STEADY_BONUS);
        assert_eq!(time_bonus(Duration::from_millis(10_001)), 0);
        assert_eq!(time_bonus(secs(3600)), 0);
    }

    #[test]
    fn test_known_values() {
        assert_eq!(score(Difficulty::Easy, secs(2)), 100);
        assert_eq!(score(Difficulty::Medium, secs(8)), 125);
        assert_eq!(score(Difficulty::Hard, secs(30)), 200);
    }

    #[test]
    fn test_unknown_difficulty_is_lowest_tier() {
        assert_eq!(Difficulty::parse("legendary"), Difficulty::Easy);
        assert_eq!(Difficulty::parse(""), Difficulty::Easy);
        assert_eq!(Difficulty::parse("HARD"), Difficulty::Hard);

        let d: Difficulty = serde_json::from_str("\"impossible\"").unwrap();
        assert_eq!(d, Difficulty::Easy);
        let d: Difficulty = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(d, Difficulty::Medium);
        assert_eq!(serde_json::to_string(&Difficulty::Hard).unwrap(), "\"hard\"");
    }
}
