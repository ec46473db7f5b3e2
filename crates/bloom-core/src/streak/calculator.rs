//! Pure streak computation over a set of engagement days.
//!
//! The calculator walks a deduplicated set of calendar dates and derives
//! the current run, the longest run ever seen in the window, and the
//! consistency rate. Same input, same output -- milestone detection relies
//! on that.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use std::collections::BTreeSet;

use crate::config::CalculatorConfig;
use crate::streak::types::StreakMetrics;

/// Truncate an event timestamp to the user's local calendar day.
pub fn local_day(ts: DateTime<Utc>, timezone_offset_hours: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(timezone_offset_hours * 3600)
        .unwrap_or(FixedOffset::east_opt(0).unwrap());
    ts.with_timezone(&offset).date_naive()
}

/// Streak metric computation.
pub struct StreakCalculator {
    /// Bounded history window in days; dates older than this are ignored.
    history_window_days: u32,
}

impl StreakCalculator {
    /// Create a calculator with the default 365-day window.
    pub fn new() -> Self {
        Self {
            history_window_days: 365,
        }
    }

    /// Create a calculator from configuration.
    pub fn with_config(config: &CalculatorConfig) -> Self {
        Self {
            history_window_days: config.history_window_days,
        }
    }

    /// Compute streak metrics from a set of engagement days as of `as_of`.
    ///
    /// Dates after `as_of` and dates outside the history window are
    /// ignored. An empty (or fully filtered) input yields
    /// [`StreakMetrics::empty`].
    pub fn compute(&self, dates: &BTreeSet<NaiveDate>, as_of: NaiveDate) -> StreakMetrics {
        let window_start = as_of - Duration::days(self.history_window_days as i64 - 1);
        let days: BTreeSet<NaiveDate> = dates
            .iter()
            .copied()
            .filter(|d| *d <= as_of && *d >= window_start)
            .collect();

        let (Some(&earliest), Some(&latest)) = (days.first(), days.last()) else {
            return StreakMetrics::empty();
        };

        let is_active_today = days.contains(&as_of);

        // Current run: walk backward one day at a time. A missing `as_of`
        // with `as_of - 1` present keeps the run alive, just not active
        // today.
        let mut cursor = if is_active_today {
            as_of
        } else {
            as_of - Duration::days(1)
        };
        let mut current_streak = 0u32;
        while days.contains(&cursor) {
            current_streak += 1;
            cursor = cursor - Duration::days(1);
        }
        let streak_start_date = (current_streak > 0).then(|| cursor + Duration::days(1));

        // Longest run: single ascending pass counting consecutive days.
        let mut longest_streak = 0u32;
        let mut run = 0u32;
        let mut prev: Option<NaiveDate> = None;
        for &day in &days {
            run = match prev {
                Some(p) if (day - p).num_days() == 1 => run + 1,
                _ => 1,
            };
            longest_streak = longest_streak.max(run);
            prev = Some(day);
        }
        let longest_streak = longest_streak.max(current_streak);

        let span_days = (as_of - earliest).num_days() + 1;
        let consistency_rate = (days.len() as f64 / span_days as f64).clamp(0.0, 1.0);

        StreakMetrics {
            current_streak,
            longest_streak,
            is_active_today,
            streak_start_date,
            last_engagement_date: Some(latest),
            consistency_rate,
            total_engagement_days: days.len() as u32,
        }
    }
}

impl Default for StreakCalculator {
    fn default() -> Self {
        Self::new()
    }
}
