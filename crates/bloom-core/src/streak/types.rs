//! Streak state types shared across the engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::streak::milestones::{StreakCelebration, StreakMilestone};
use crate::streak::status::StreakStatus;

/// Pure output of the streak calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakMetrics {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub is_active_today: bool,
    /// First day of the current run, when one exists.
    pub streak_start_date: Option<NaiveDate>,
    /// Most recent engagement day inside the history window.
    pub last_engagement_date: Option<NaiveDate>,
    /// Fraction of days with engagement since the earliest one, in [0, 1].
    pub consistency_rate: f64,
    pub total_engagement_days: u32,
}

impl StreakMetrics {
    /// Metrics for a user with no engagement history.
    pub fn empty() -> Self {
        Self {
            current_streak: 0,
            longest_streak: 0,
            is_active_today: false,
            streak_start_date: None,
            last_engagement_date: None,
            consistency_rate: 0.0,
            total_engagement_days: 0,
        }
    }
}

/// Durable per-user streak state.
///
/// Created on first engagement, mutated on every new engagement or detected
/// break, and reset to [`EngagementStreak::empty`] only on explicit account
/// reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementStreak {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub streak_start_date: Option<NaiveDate>,
    pub last_engagement_date: Option<NaiveDate>,
    pub is_active_today: bool,
    pub status: StreakStatus,
    /// Every milestone ever achieved, ascending by streak length.
    pub achieved_milestones: Vec<StreakMilestone>,
    /// The at-most-one celebration not yet shown to the user.
    pub pending_celebration: Option<StreakCelebration>,
    pub consistency_rate: f64,
    pub total_engagement_days: u32,
}

impl EngagementStreak {
    /// State for a user with no history.
    pub fn empty() -> Self {
        Self {
            current_streak: 0,
            longest_streak: 0,
            streak_start_date: None,
            last_engagement_date: None,
            is_active_today: false,
            status: StreakStatus::Inactive,
            achieved_milestones: Vec::new(),
            pending_celebration: None,
            consistency_rate: 0.0,
            total_engagement_days: 0,
        }
    }

    /// Whether a milestone for this exact length was ever achieved.
    pub fn has_milestone(&self, streak_length: u32) -> bool {
        self.achieved_milestones
            .iter()
            .any(|m| m.streak_length == streak_length)
    }

    /// Re-derive the day-dependent view of this state for `today` without
    /// touching the remote store.
    ///
    /// Detects a gap since the last engagement and surfaces it as the
    /// one-shot `Broken` status; a state already at zero is reclassified by
    /// length. Rate and totals are left as stored -- the next full
    /// recomputation refreshes them.
    pub fn refreshed(&self, today: NaiveDate) -> EngagementStreak {
        let mut view = self.clone();
        let Some(last) = self.last_engagement_date else {
            view.status = StreakStatus::classify(0);
            return view;
        };

        let days_since = (today - last).num_days();
        if days_since <= 0 {
            view.is_active_today = true;
            return view;
        }
        if days_since == 1 {
            // Not yet broken: yesterday's run still counts today.
            view.is_active_today = false;
            view.status = StreakStatus::classify(view.current_streak);
            return view;
        }

        view.is_active_today = false;
        if self.current_streak > 0 {
            view.current_streak = 0;
            view.streak_start_date = None;
            view.status = StreakStatus::Broken;
        } else {
            view.status = StreakStatus::classify(0);
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn streak_ending(last: NaiveDate, current: u32) -> EngagementStreak {
        EngagementStreak {
            current_streak: current,
            longest_streak: current.max(5),
            streak_start_date: Some(last - chrono::Duration::days(current as i64 - 1)),
            last_engagement_date: Some(last),
            is_active_today: true,
            status: StreakStatus::classify(current),
            achieved_milestones: Vec::new(),
            pending_celebration: None,
            consistency_rate: 1.0,
            total_engagement_days: current,
        }
    }

    #[test]
    fn test_refreshed_same_day_unchanged() {
        let today = day(2025, 6, 10);
        let view = streak_ending(today, 3).refreshed(today);
        assert_eq!(view.current_streak, 3);
        assert!(view.is_active_today);
        assert_eq!(view.status, StreakStatus::Building);
    }

    #[test]
    fn test_refreshed_one_day_gap_keeps_streak() {
        let today = day(2025, 6, 10);
        let view = streak_ending(today - chrono::Duration::days(1), 3).refreshed(today);
        assert_eq!(view.current_streak, 3);
        assert!(!view.is_active_today);
        assert_eq!(view.status, StreakStatus::Building);
    }

    #[test]
    fn test_refreshed_two_day_gap_breaks() {
        let today = day(2025, 6, 10);
        let view = streak_ending(today - chrono::Duration::days(2), 5).refreshed(today);
        assert_eq!(view.current_streak, 0);
        assert_eq!(view.status, StreakStatus::Broken);
        assert_eq!(view.streak_start_date, None);
        // Longest is untouched by the break.
        assert_eq!(view.longest_streak, 5);
    }

    #[test]
    fn test_refreshed_broken_reclassifies_to_inactive() {
        let today = day(2025, 6, 10);
        let broken = streak_ending(today - chrono::Duration::days(2), 5).refreshed(today);
        assert_eq!(broken.status, StreakStatus::Broken);

        // The one-shot state does not survive a second refresh.
        let next = broken.refreshed(today);
        assert_eq!(next.status, StreakStatus::Inactive);
        assert_eq!(next.current_streak, 0);
    }

    #[test]
    fn test_has_milestone() {
        use crate::streak::milestones::{MilestoneType, StreakMilestone};

        let mut streak = EngagementStreak::empty();
        assert!(!streak.has_milestone(7));
        streak.achieved_milestones.push(StreakMilestone {
            streak_length: 7,
            title: "One Full Week".to_string(),
            description: String::new(),
            achieved_at: chrono::Utc::now(),
            is_celebrated: false,
            milestone_type: MilestoneType::Weekly,
            bonus_points: 5,
        });
        assert!(streak.has_milestone(7));
    }
}
