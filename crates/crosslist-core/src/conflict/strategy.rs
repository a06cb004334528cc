//! Conflict strategies and the decisions they produce

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Side;

/// How a disagreement on `checked` is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    AWins,
    BWins,
    NewestWins,
    /// Interactive choice; resolves as side A until a prompt exists
    Prompt,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::AWins => "a_wins",
            ConflictStrategy::BWins => "b_wins",
            ConflictStrategy::NewestWins => "newest_wins",
            ConflictStrategy::Prompt => "prompt",
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a decision was based on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBasis {
    /// A fixed-winner strategy
    Strategy,
    /// `Prompt` without a prompt
    PromptFallback,
    /// Only the winner changed since the pre-pass snapshot
    ChangeSource,
    /// Neither side had a timestamp
    DefaultWinner,
    /// Only the winner had a timestamp
    SingleTimestamp,
    /// Timestamps within tolerance
    TimestampTie,
    /// The winner's timestamp is later
    NewerTimestamp,
}

impl DecisionBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionBasis::Strategy => "strategy",
            DecisionBasis::PromptFallback => "prompt_fallback",
            DecisionBasis::ChangeSource => "change_source",
            DecisionBasis::DefaultWinner => "default_winner",
            DecisionBasis::SingleTimestamp => "single_timestamp",
            DecisionBasis::TimestampTie => "timestamp_tie",
            DecisionBasis::NewerTimestamp => "newer_timestamp",
        }
    }
}

impl std::fmt::Display for DecisionBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Winning side of one conflict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub winner: Side,
    pub basis: DecisionBasis,
    pub confidence: f64,
}

impl Decision {
    pub fn new(winner: Side, basis: DecisionBasis, confidence: f64) -> Self {
        Self {
            winner,
            basis,
            confidence,
        }
    }
}

/// Timestamp rule of `NewestWins`
///
/// | A | B | winner | confidence |
/// |---|---|--------|------------|
/// | - | - | `default_winner` | 0.6 |
/// | x | - | A | 0.8 |
/// | - | x | B | 0.8 |
/// | within tolerance || A | 0.7 |
/// | otherwise || later | 0.9 |
pub fn decide_by_timestamps(
    timestamp_a: Option<DateTime<Utc>>,
    timestamp_b: Option<DateTime<Utc>>,
    tolerance: Duration,
    default_winner: Side,
) -> Decision {
    match (timestamp_a, timestamp_b) {
        (None, None) => Decision::new(default_winner, DecisionBasis::DefaultWinner, 0.6),
        (Some(_), None) => Decision::new(Side::A, DecisionBasis::SingleTimestamp, 0.8),
        (None, Some(_)) => Decision::new(Side::B, DecisionBasis::SingleTimestamp, 0.8),
        (Some(a), Some(b)) => {
            if (a - b).abs() <= tolerance {
                Decision::new(Side::A, DecisionBasis::TimestampTie, 0.7)
            } else if b > a {
                Decision::new(Side::B, DecisionBasis::NewerTimestamp, 0.9)
            } else {
                Decision::new(Side::A, DecisionBasis::NewerTimestamp, 0.9)
            }
        }
    }
}
