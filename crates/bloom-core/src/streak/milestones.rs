//! Milestone detection and celebration payloads.
//!
//! A fixed tier table maps streak lengths to one-time achievements and
//! bonus points. Detection is idempotent against the set of milestones the
//! user already holds: a tier is earned once per user, ever, and breaking a
//! streak does not put it back on the table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::streak::types::{EngagementStreak, StreakMetrics};

/// Category of a milestone tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneType {
    FirstDay,
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Special,
}

/// A one-time achievement record tied to reaching a streak length.
///
/// Immutable once created except for the `is_celebrated` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakMilestone {
    /// Unique per user; the tier this record stands for.
    pub streak_length: u32,
    pub title: String,
    pub description: String,
    pub achieved_at: DateTime<Utc>,
    pub is_celebrated: bool,
    pub milestone_type: MilestoneType,
    pub bonus_points: u32,
}

/// Presentation style requested for a celebration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CelebrationType {
    Milestone,
    WeeklyStreak,
    MonthlyStreak,
    PersonalBest,
    Comeback,
}

/// Display payload generated when a milestone is achieved, shown at most
/// once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakCelebration {
    pub id: String,
    /// Tier of the milestone this celebration references.
    pub streak_length: u32,
    pub celebration_type: CelebrationType,
    pub message: String,
    pub animation_hint: String,
    pub duration_ms: u32,
    pub is_shown: bool,
    pub shown_at: Option<DateTime<Utc>>,
}

/// One milestone tier: streak length, reward and presentation.
struct MilestoneTier {
    streak_length: u32,
    bonus_points: u32,
    milestone_type: MilestoneType,
    title: &'static str,
    description: &'static str,
}

/// Ascending tier table. Lengths and points are product constants.
const MILESTONE_TIERS: &[MilestoneTier] = &[
    MilestoneTier {
        streak_length: 1,
        bonus_points: 1,
        milestone_type: MilestoneType::FirstDay,
        title: "First Step",
        description: "You showed up for your first day",
    },
    MilestoneTier {
        streak_length: 3,
        bonus_points: 2,
        milestone_type: MilestoneType::Special,
        title: "Three in a Row",
        description: "Three consecutive days of engagement",
    },
    MilestoneTier {
        streak_length: 7,
        bonus_points: 5,
        milestone_type: MilestoneType::Weekly,
        title: "One Full Week",
        description: "Seven consecutive days of engagement",
    },
    MilestoneTier {
        streak_length: 14,
        bonus_points: 10,
        milestone_type: MilestoneType::Biweekly,
        title: "Two Weeks Strong",
        description: "Fourteen consecutive days of engagement",
    },
    MilestoneTier {
        streak_length: 21,
        bonus_points: 15,
        milestone_type: MilestoneType::Special,
        title: "Habit Formed",
        description: "Twenty-one consecutive days of engagement",
    },
    MilestoneTier {
        streak_length: 30,
        bonus_points: 25,
        milestone_type: MilestoneType::Monthly,
        title: "One Month Champion",
        description: "Thirty consecutive days of engagement",
    },
    MilestoneTier {
        streak_length: 60,
        bonus_points: 50,
        milestone_type: MilestoneType::Special,
        title: "Two Month Streak",
        description: "Sixty consecutive days of engagement",
    },
    MilestoneTier {
        streak_length: 90,
        bonus_points: 75,
        milestone_type: MilestoneType::Quarterly,
        title: "Quarter Master",
        description: "Ninety consecutive days of engagement",
    },
    MilestoneTier {
        streak_length: 180,
        bonus_points: 100,
        milestone_type: MilestoneType::Special,
        title: "Half Year Hero",
        description: "One hundred eighty consecutive days of engagement",
    },
    MilestoneTier {
        streak_length: 365,
        bonus_points: 200,
        milestone_type: MilestoneType::Special,
        title: "Full Year Legend",
        description: "A full year of daily engagement",
    },
];

impl MilestoneTier {
    fn to_milestone(&self, now: DateTime<Utc>) -> StreakMilestone {
        StreakMilestone {
            streak_length: self.streak_length,
            title: self.title.to_string(),
            description: self.description.to_string(),
            achieved_at: now,
            is_celebrated: false,
            milestone_type: self.milestone_type,
            bonus_points: self.bonus_points,
        }
    }
}

/// Result of one milestone evaluation.
#[derive(Debug, Clone)]
pub struct MilestoneOutcome {
    /// Tiers crossed for the first time, ascending.
    pub new_milestones: Vec<StreakMilestone>,
    /// At most one celebration, referencing the highest new milestone.
    pub celebration: Option<StreakCelebration>,
    /// Sum of bonus points across the new milestones.
    pub bonus_points: u32,
}

impl Default for MilestoneOutcome {
    fn default() -> Self {
        Self {
            new_milestones: Vec::new(),
            celebration: None,
            bonus_points: 0,
        }
    }
}

/// Detects newly-achieved milestones from a streak transition.
pub struct MilestoneEngine;

impl MilestoneEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compare `metrics` against the milestones `previous` already holds
    /// and emit whatever is newly earned.
    ///
    /// Deterministic and side-effect free: once the returned milestones are
    /// folded into the stored streak, re-evaluating the same metrics yields
    /// nothing.
    pub fn evaluate(
        &self,
        previous: &EngagementStreak,
        metrics: &StreakMetrics,
        now: DateTime<Utc>,
    ) -> MilestoneOutcome {
        let mut new_milestones = Vec::new();
        let mut bonus_points = 0u32;

        for tier in MILESTONE_TIERS {
            if metrics.current_streak >= tier.streak_length
                && !previous.has_milestone(tier.streak_length)
            {
                new_milestones.push(tier.to_milestone(now));
                bonus_points += tier.bonus_points;
            }
        }

        let celebration = new_milestones
            .iter()
            .max_by_key(|m| m.streak_length)
            .map(|top| self.build_celebration(top, previous, metrics));

        MilestoneOutcome {
            new_milestones,
            celebration,
            bonus_points,
        }
    }

    fn build_celebration(
        &self,
        milestone: &StreakMilestone,
        previous: &EngagementStreak,
        metrics: &StreakMetrics,
    ) -> StreakCelebration {
        let celebration_type = if metrics.current_streak > previous.longest_streak {
            CelebrationType::PersonalBest
        } else if previous.status.is_broken() {
            CelebrationType::Comeback
        } else if milestone.streak_length >= 30 {
            CelebrationType::MonthlyStreak
        } else if milestone.streak_length >= 7 {
            CelebrationType::WeeklyStreak
        } else {
            CelebrationType::Milestone
        };

        StreakCelebration {
            id: Uuid::new_v4().to_string(),
            streak_length: milestone.streak_length,
            celebration_type,
            message: celebration_message(celebration_type, milestone, metrics),
            animation_hint: animation_hint(celebration_type).to_string(),
            duration_ms: celebration_duration_ms(milestone.streak_length),
            is_shown: false,
            shown_at: None,
        }
    }
}

impl Default for MilestoneEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate the user-facing celebration message.
fn celebration_message(
    celebration_type: CelebrationType,
    milestone: &StreakMilestone,
    metrics: &StreakMetrics,
) -> String {
    match celebration_type {
        CelebrationType::PersonalBest => format!(
            "New personal best! {} days and counting.",
            metrics.current_streak
        ),
        CelebrationType::Comeback => format!(
            "Welcome back! You rebuilt your streak to {} days.",
            metrics.current_streak
        ),
        CelebrationType::MonthlyStreak => format!(
            "{}: {} -- {} bonus points earned.",
            milestone.title, milestone.description, milestone.bonus_points
        ),
        CelebrationType::WeeklyStreak => format!(
            "{}! A {}-day streak earns {} bonus points.",
            milestone.title, milestone.streak_length, milestone.bonus_points
        ),
        CelebrationType::Milestone => format!(
            "{}: {} bonus points earned.",
            milestone.title, milestone.bonus_points
        ),
    }
}

fn animation_hint(celebration_type: CelebrationType) -> &'static str {
    match celebration_type {
        CelebrationType::Milestone => "confetti",
        CelebrationType::WeeklyStreak => "confetti_burst",
        CelebrationType::MonthlyStreak => "fireworks",
        CelebrationType::PersonalBest => "trophy",
        CelebrationType::Comeback => "sunrise",
    }
}

fn celebration_duration_ms(streak_length: u32) -> u32 {
    match streak_length {
        0..=6 => 3000,
        7..=29 => 4000,
        _ => 6000,
    }
}
