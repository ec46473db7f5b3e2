//! In-process gateway backend for tests and local development.
//!
//! Behaves like the remote store, plus an availability switch to simulate
//! connectivity loss: while unavailable every call fails with a transient
//! error. Calls that mutate state are recorded in an apply log so tests
//! can assert delivery order.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use super::{GatewayError, PersistenceGateway, Result};
use crate::streak::{EngagementStreak, StreakCelebration, StreakMilestone};

#[derive(Default)]
struct UserRecord {
    streak: Option<EngagementStreak>,
    engagement_dates: BTreeSet<NaiveDate>,
    milestones: Vec<StreakMilestone>,
    celebrations: Vec<StreakCelebration>,
}

/// In-memory [`PersistenceGateway`].
pub struct InMemoryGateway {
    users: Mutex<HashMap<String, UserRecord>>,
    available: AtomicBool,
    rejecting: AtomicBool,
    latency_ms: AtomicU64,
    apply_log: Mutex<Vec<String>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            rejecting: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            apply_log: Mutex::new(Vec::new()),
        }
    }

    /// Toggle reachability. While `false`, every call returns a transient
    /// error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// While `true`, every call fails permanently (validation-style).
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Simulated round-trip latency per call.
    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
    }

    /// Pre-load engagement days for a user.
    pub fn seed_engagement_dates(&self, user_id: &str, dates: impl IntoIterator<Item = NaiveDate>) {
        let mut users = self.users.lock().unwrap();
        users
            .entry(user_id.to_string())
            .or_default()
            .engagement_dates
            .extend(dates);
    }

    /// Stored streak row, bypassing availability (test inspection).
    pub fn stored_streak(&self, user_id: &str) -> Option<EngagementStreak> {
        let users = self.users.lock().unwrap();
        users.get(user_id).and_then(|u| u.streak.clone())
    }

    /// Stored milestone rows (test inspection).
    pub fn stored_milestones(&self, user_id: &str) -> Vec<StreakMilestone> {
        let users = self.users.lock().unwrap();
        users
            .get(user_id)
            .map(|u| u.milestones.clone())
            .unwrap_or_default()
    }

    /// Every mutating call applied so far, in order.
    pub fn apply_log(&self) -> Vec<String> {
        self.apply_log.lock().unwrap().clone()
    }

    /// Apply simulated latency, then the configured failure mode.
    async fn observe(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency)).await;
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(GatewayError::Permanent("rejected by store".to_string()));
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Transient("store unreachable".to_string()))
        }
    }

    fn log(&self, entry: String) {
        self.apply_log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn fetch_streak(&self, user_id: &str) -> Result<Option<EngagementStreak>> {
        self.observe().await?;
        let users = self.users.lock().unwrap();
        Ok(users.get(user_id).and_then(|u| u.streak.clone()))
    }

    async fn upsert_streak(&self, user_id: &str, streak: &EngagementStreak) -> Result<()> {
        self.observe().await?;
        let mut users = self.users.lock().unwrap();
        users.entry(user_id.to_string()).or_default().streak = Some(streak.clone());
        drop(users);
        self.log(format!("upsert_streak:{user_id}:{}", streak.current_streak));
        Ok(())
    }

    async fn fetch_engagement_dates(
        &self,
        user_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        self.observe().await?;
        let users = self.users.lock().unwrap();
        Ok(users
            .get(user_id)
            .map(|u| {
                u.engagement_dates
                    .iter()
                    .copied()
                    .filter(|d| *d >= since)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_milestones(&self, user_id: &str) -> Result<Vec<StreakMilestone>> {
        self.observe().await?;
        let users = self.users.lock().unwrap();
        Ok(users
            .get(user_id)
            .map(|u| u.milestones.clone())
            .unwrap_or_default())
    }

    async fn insert_milestone(&self, user_id: &str, milestone: &StreakMilestone) -> Result<()> {
        self.observe().await?;
        let mut users = self.users.lock().unwrap();
        let record = users.entry(user_id.to_string()).or_default();
        // Keyed by (user, streak_length); replays are no-ops.
        if !record
            .milestones
            .iter()
            .any(|m| m.streak_length == milestone.streak_length)
        {
            record.milestones.push(milestone.clone());
            record.milestones.sort_by_key(|m| m.streak_length);
        }
        drop(users);
        self.log(format!(
            "insert_milestone:{user_id}:{}",
            milestone.streak_length
        ));
        Ok(())
    }

    async fn fetch_pending_celebration(
        &self,
        user_id: &str,
    ) -> Result<Option<StreakCelebration>> {
        self.observe().await?;
        let users = self.users.lock().unwrap();
        Ok(users
            .get(user_id)
            .and_then(|u| u.celebrations.iter().find(|c| !c.is_shown).cloned()))
    }

    async fn insert_celebration(
        &self,
        user_id: &str,
        celebration: &StreakCelebration,
    ) -> Result<()> {
        self.observe().await?;
        let mut users = self.users.lock().unwrap();
        let record = users.entry(user_id.to_string()).or_default();
        match record
            .celebrations
            .iter_mut()
            .find(|c| c.id == celebration.id)
        {
            Some(existing) => *existing = celebration.clone(),
            None => record.celebrations.push(celebration.clone()),
        }
        drop(users);
        self.log(format!("insert_celebration:{user_id}:{}", celebration.id));
        Ok(())
    }

    async fn delete_user_data(&self, user_id: &str) -> Result<()> {
        self.observe().await?;
        let mut users = self.users.lock().unwrap();
        users.remove(user_id);
        drop(users);
        self.log(format!("delete_user_data:{user_id}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn milestone(len: u32) -> StreakMilestone {
        StreakMilestone {
            streak_length: len,
            title: format!("{len} days"),
            description: String::new(),
            achieved_at: Utc::now(),
            is_celebrated: false,
            milestone_type: crate::streak::MilestoneType::Special,
            bonus_points: 1,
        }
    }

    #[tokio::test]
    async fn test_unavailable_gateway_fails_transiently() {
        let gateway = InMemoryGateway::new();
        gateway.set_available(false);
        let err = gateway.fetch_streak("u1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_milestone_insert_is_idempotent() {
        let gateway = InMemoryGateway::new();
        gateway.insert_milestone("u1", &milestone(7)).await.unwrap();
        gateway.insert_milestone("u1", &milestone(7)).await.unwrap();
        assert_eq!(gateway.stored_milestones("u1").len(), 1);
    }

    #[tokio::test]
    async fn test_celebration_upsert_flips_shown() {
        let gateway = InMemoryGateway::new();
        let mut celebration = StreakCelebration {
            id: "c-1".to_string(),
            streak_length: 7,
            celebration_type: crate::streak::CelebrationType::WeeklyStreak,
            message: String::new(),
            animation_hint: "confetti".to_string(),
            duration_ms: 4000,
            is_shown: false,
            shown_at: None,
        };
        gateway.insert_celebration("u1", &celebration).await.unwrap();
        assert!(gateway
            .fetch_pending_celebration("u1")
            .await
            .unwrap()
            .is_some());

        celebration.is_shown = true;
        celebration.shown_at = Some(Utc::now());
        gateway.insert_celebration("u1", &celebration).await.unwrap();
        assert!(gateway
            .fetch_pending_celebration("u1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_engagement_dates_respect_since() {
        let gateway = InMemoryGateway::new();
        let d = |s: &str| s.parse::<NaiveDate>().unwrap();
        gateway.seed_engagement_dates("u1", [d("2025-06-01"), d("2025-06-05"), d("2025-06-09")]);

        let dates = gateway
            .fetch_engagement_dates("u1", d("2025-06-05"))
            .await
            .unwrap();
        assert_eq!(dates, vec![d("2025-06-05"), d("2025-06-09")]);
    }
}
