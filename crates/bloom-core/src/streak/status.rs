//! Streak status classification.
//!
//! Maps a streak length to a named status band. `Broken` is never derived
//! from a length: it is a one-shot transition state the caller assigns when
//! a gap is first detected, and the next classification by length replaces
//! it.

use serde::{Deserialize, Serialize};

/// Named status band for a streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakStatus {
    Inactive,
    Starting,
    Building,
    Strong,
    Champion,
    /// Transient state surfaced once when a gap is detected.
    Broken,
}

impl StreakStatus {
    /// Classify a streak length into its status band.
    pub fn classify(streak_length: u32) -> Self {
        match streak_length {
            0 => StreakStatus::Inactive,
            1 => StreakStatus::Starting,
            2..=6 => StreakStatus::Building,
            7..=29 => StreakStatus::Strong,
            _ => StreakStatus::Champion,
        }
    }

    /// Human-readable description of the status.
    pub fn description(&self) -> &'static str {
        match self {
            StreakStatus::Inactive => "No active streak",
            StreakStatus::Starting => "First day of a new streak",
            StreakStatus::Building => "Streak is building",
            StreakStatus::Strong => "A week or more of daily engagement",
            StreakStatus::Champion => "A month or more of daily engagement",
            StreakStatus::Broken => "Streak was broken",
        }
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, StreakStatus::Broken)
    }
}
