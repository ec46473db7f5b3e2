//! Streak domain: pure computation, status bands, milestone detection.

pub mod calculator;
pub mod milestones;
pub mod status;
pub mod types;

pub use calculator::{local_day, StreakCalculator};
pub use milestones::{
    CelebrationType, MilestoneEngine, MilestoneOutcome, MilestoneType, StreakCelebration,
    StreakMilestone,
};
pub use status::StreakStatus;
pub use types::{EngagementStreak, StreakMetrics};
