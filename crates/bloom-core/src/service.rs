//! Engagement streak service.
//!
//! The one entry point the rest of the app talks to. An engagement event
//! comes in, the streak is recomputed from history, milestones are
//! detected, and the resulting writes go straight to the store or into the
//! offline queue. The cache is updated synchronously either way, so the
//! session never reads stale state.
//!
//! The service is constructed explicitly with its collaborators injected;
//! there is no process-global instance. Call [`StreakService::shutdown`]
//! when the session ends.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{CacheStats, StreakCache};
use crate::config::EngineConfig;
use crate::error::{ComputationError, ConfigError};
use crate::gateway::{GatewayError, PersistenceGateway};
use crate::streak::{
    local_day, EngagementStreak, MilestoneEngine, MilestoneOutcome, StreakCalculator,
    StreakCelebration, StreakMilestone, StreakStatus,
};
use crate::sync::{
    ConnectivityState, ConnectivitySubscription, FlushReport, MutationPayload, OfflineSyncQueue,
    PendingMutation, QueueStatus,
};

/// Receiver of momentum point awards.
///
/// Point awards are fire-and-forget notifications; they carry no
/// durability guarantee from this engine.
pub trait MomentumSink: Send + Sync {
    /// Called whenever a milestone fires.
    fn on_points_awarded(&self, _user_id: &str, _points: u32, _streak_length: u32) {
        // default no-op
    }
}

/// Sink that ignores every award.
pub struct NoopMomentumSink;

impl MomentumSink for NoopMomentumSink {}

/// Outcome of a mutating streak operation, consumed by presentation code.
#[derive(Debug, Clone)]
pub struct StreakUpdateResult {
    pub success: bool,
    pub updated_streak: Option<EngagementStreak>,
    pub new_milestones: Vec<StreakMilestone>,
    pub celebration: Option<StreakCelebration>,
    pub momentum_points_earned: u32,
    pub message: String,
    pub error: Option<String>,
}

impl StreakUpdateResult {
    fn succeeded(updated: EngagementStreak, outcome: MilestoneOutcome, message: String) -> Self {
        Self {
            success: true,
            updated_streak: Some(updated),
            celebration: outcome.celebration,
            momentum_points_earned: outcome.bonus_points,
            new_milestones: outcome.new_milestones,
            message,
            error: None,
        }
    }

    fn failed(message: impl Into<String>, error: impl ToString) -> Self {
        Self {
            success: false,
            updated_streak: None,
            new_milestones: Vec::new(),
            celebration: None,
            momentum_points_earned: 0,
            message: message.into(),
            error: Some(error.to_string()),
        }
    }
}

/// The engagement streak engine.
pub struct StreakService {
    gateway: Arc<dyn PersistenceGateway>,
    cache: StreakCache,
    queue: Arc<OfflineSyncQueue>,
    calculator: StreakCalculator,
    milestones: MilestoneEngine,
    config: EngineConfig,
    connectivity: watch::Receiver<ConnectivityState>,
    momentum: Arc<dyn MomentumSink>,
    subscription: Mutex<Option<ConnectivitySubscription>>,
}

impl StreakService {
    /// Create a service with a queue persisting to the default data
    /// directory. Must run inside a tokio runtime (the queue spawns its
    /// connectivity watcher here).
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        config: EngineConfig,
        connectivity: watch::Receiver<ConnectivityState>,
        momentum: Arc<dyn MomentumSink>,
    ) -> Result<Self, ConfigError> {
        let queue = Arc::new(OfflineSyncQueue::new(
            Arc::clone(&gateway),
            config.queue.clone(),
        ));
        Self::with_queue(gateway, config, connectivity, momentum, queue)
    }

    /// Create a service around an existing queue (for testing and custom
    /// queue placement).
    pub fn with_queue(
        gateway: Arc<dyn PersistenceGateway>,
        config: EngineConfig,
        connectivity: watch::Receiver<ConnectivityState>,
        momentum: Arc<dyn MomentumSink>,
        queue: Arc<OfflineSyncQueue>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if let Err(e) = queue.load() {
            warn!("could not restore offline queue: {e}");
        }
        let subscription = queue.watch_connectivity(connectivity.clone());
        Ok(Self {
            cache: StreakCache::with_config(&config.cache),
            calculator: StreakCalculator::with_config(&config.calculator),
            milestones: MilestoneEngine::new(),
            gateway,
            queue,
            config,
            connectivity,
            momentum,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    /// Record one qualifying engagement and recompute the streak.
    ///
    /// The only inbound entry point into streak recomputation. Works
    /// offline: writes that cannot reach the store are queued, and the
    /// returned state is already visible to subsequent reads.
    pub async fn record_engagement(
        &self,
        user_id: &str,
        timestamp: DateTime<Utc>,
    ) -> StreakUpdateResult {
        let tz = self.config.calculator.timezone_offset_hours;
        let today = local_day(Utc::now(), tz);
        let day = local_day(timestamp, tz);
        if day > today {
            return StreakUpdateResult::failed(
                "Engagement timestamp is in the future",
                ComputationError::FutureEngagement { day, as_of: today },
            );
        }

        let loaded = self.load_streak(user_id).await;
        let was_broken = loaded.status.is_broken();
        let mut previous = loaded.refreshed(today);
        if was_broken {
            // Keep the one-shot state visible to milestone evaluation: this
            // engagement is the recovery from it.
            previous.status = StreakStatus::Broken;
        }

        let mut dates = self.load_history(user_id, today, &previous).await;
        dates.insert(day);

        let metrics = self.calculator.compute(&dates, today);
        let status = if metrics.current_streak == 0 && previous.current_streak > 0 {
            StreakStatus::Broken
        } else {
            StreakStatus::classify(metrics.current_streak)
        };

        let outcome = self.milestones.evaluate(&previous, &metrics, Utc::now());
        let updated = build_updated(&previous, &metrics, status, &outcome);

        let writes = collect_writes(&updated, &outcome);
        if let Err(err) = self.write_back(user_id, writes).await {
            // Previous cache state stays untouched so the UI can show
            // stale-but-consistent data.
            return StreakUpdateResult::failed("Could not save streak update", err);
        }

        self.cache.put(user_id, updated.clone());
        if outcome.bonus_points > 0 {
            self.momentum
                .on_points_awarded(user_id, outcome.bonus_points, metrics.current_streak);
        }

        let message = result_message(&updated, &outcome);
        StreakUpdateResult::succeeded(updated, outcome, message)
    }

    /// Current streak state for a user, read through the cache.
    ///
    /// A gap since the last engagement surfaces as the one-shot `Broken`
    /// status; the next read reclassifies by length. Falls back to an
    /// empty streak when the store is unreachable and nothing is cached.
    pub async fn streak_for(&self, user_id: &str) -> EngagementStreak {
        let tz = self.config.calculator.timezone_offset_hours;
        let today = local_day(Utc::now(), tz);

        if let Some(cached) = self.cache.get(user_id) {
            let view = cached.refreshed(today);
            if view != cached {
                self.cache.put(user_id, view.clone());
            }
            return view;
        }

        let previous = self.load_streak(user_id).await;
        let dates = self.load_history(user_id, today, &previous).await;
        let metrics = self.calculator.compute(&dates, today);
        let status = if metrics.current_streak == 0 && previous.current_streak > 0 {
            StreakStatus::Broken
        } else {
            StreakStatus::classify(metrics.current_streak)
        };

        let outcome = MilestoneOutcome::default();
        let view = build_updated(&previous, &metrics, status, &outcome);
        self.cache.put(user_id, view.clone());
        view
    }

    /// Flip the user's pending celebration to shown.
    pub async fn mark_celebration_shown(
        &self,
        user_id: &str,
        celebration_id: &str,
    ) -> StreakUpdateResult {
        let mut streak = self.load_streak(user_id).await;
        let Some(mut celebration) = streak
            .pending_celebration
            .clone()
            .filter(|c| c.id == celebration_id)
        else {
            return StreakUpdateResult::failed(
                "No matching unshown celebration",
                format!("celebration {celebration_id} not pending"),
            );
        };

        celebration.is_shown = true;
        celebration.shown_at = Some(Utc::now());
        streak.pending_celebration = None;
        if let Some(milestone) = streak
            .achieved_milestones
            .iter_mut()
            .find(|m| m.streak_length == celebration.streak_length)
        {
            milestone.is_celebrated = true;
        }

        let writes = vec![
            MutationPayload::StreakUpdate(streak.clone()),
            MutationPayload::CelebrationCreate(celebration),
        ];
        if let Err(err) = self.write_back(user_id, writes).await {
            return StreakUpdateResult::failed("Could not mark celebration shown", err);
        }

        self.cache.put(user_id, streak.clone());
        let outcome = MilestoneOutcome::default();
        StreakUpdateResult::succeeded(streak, outcome, "Celebration shown".to_string())
    }

    /// Wipe the user's streak state. The only deletion the model allows,
    /// and it requires a reachable store.
    pub async fn reset_account(&self, user_id: &str) -> StreakUpdateResult {
        match self.bounded(self.gateway.delete_user_data(user_id)).await {
            Ok(()) => {
                self.cache.invalidate(Some(user_id));
                let empty = EngagementStreak::empty();
                self.cache.put(user_id, empty.clone());
                let outcome = MilestoneOutcome::default();
                StreakUpdateResult::succeeded(empty, outcome, "Account reset".to_string())
            }
            Err(err) => {
                StreakUpdateResult::failed("Account reset requires a reachable store", err)
            }
        }
    }

    /// Deliver the offline queue now.
    pub async fn flush_queue(&self) -> FlushReport {
        self.queue.flush().await
    }

    /// Queue snapshot for diagnostics.
    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Cache counters for diagnostics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Persist the queue and detach the connectivity watcher.
    pub fn shutdown(&self) {
        if let Err(e) = self.queue.persist() {
            warn!("failed to persist offline queue at shutdown: {e}");
        }
        if let Some(mut subscription) = self.subscription.lock().unwrap().take() {
            subscription.release();
        }
    }

    fn is_online(&self) -> bool {
        self.connectivity.borrow().is_online()
    }

    /// Bound a gateway call by the configured timeout; elapsing counts as
    /// transient.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, GatewayError>
    where
        F: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let timeout_secs = self.config.queue.call_timeout_secs;
        match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout { timeout_secs }),
        }
    }

    /// Cache-first load of the stored streak, hydrated with the milestone
    /// history; conservative empty fallback when the store is unreachable.
    async fn load_streak(&self, user_id: &str) -> EngagementStreak {
        if let Some(cached) = self.cache.get(user_id) {
            return cached;
        }
        match self.bounded(self.gateway.fetch_streak(user_id)).await {
            Ok(Some(mut streak)) => {
                match self.bounded(self.gateway.fetch_milestones(user_id)).await {
                    Ok(milestones) if !milestones.is_empty() => {
                        streak.achieved_milestones = milestones;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(user_id, "could not hydrate milestones: {e}"),
                }
                if streak.pending_celebration.is_none() {
                    if let Ok(celebration) = self
                        .bounded(self.gateway.fetch_pending_celebration(user_id))
                        .await
                    {
                        streak.pending_celebration = celebration;
                    }
                }
                streak
            }
            Ok(None) => EngagementStreak::empty(),
            Err(e) => {
                debug!(user_id, "streak fetch failed, falling back to empty: {e}");
                EngagementStreak::empty()
            }
        }
    }

    /// Engagement days inside the history window. When the store is
    /// unreachable, the current run is reconstructed from the cached
    /// streak so recording can proceed offline.
    async fn load_history(
        &self,
        user_id: &str,
        today: NaiveDate,
        previous: &EngagementStreak,
    ) -> BTreeSet<NaiveDate> {
        let window = self.config.calculator.history_window_days;
        let since = today - Duration::days(window as i64 - 1);
        match self
            .bounded(self.gateway.fetch_engagement_dates(user_id, since))
            .await
        {
            Ok(dates) => dates.into_iter().collect(),
            Err(e) => {
                debug!(user_id, "history fetch failed, reconstructing from cached streak: {e}");
                let mut dates = BTreeSet::new();
                if let (Some(start), Some(last)) =
                    (previous.streak_start_date, previous.last_engagement_date)
                {
                    let mut cursor = start;
                    while cursor <= last {
                        dates.insert(cursor);
                        cursor = cursor + Duration::days(1);
                    }
                }
                dates
            }
        }
    }

    /// Apply writes directly while online; divert to the queue otherwise.
    ///
    /// Once anything for this user sits in the queue, new writes are
    /// queued behind it: delivering them directly would reorder the
    /// user's mutation stream. Only a permanent error escapes.
    async fn write_back(
        &self,
        user_id: &str,
        writes: Vec<MutationPayload>,
    ) -> Result<(), GatewayError> {
        if !self.is_online() || self.queue.has_pending_for(user_id) {
            debug!(user_id, "store not directly writable; queueing writes");
            for write in writes {
                self.queue.enqueue(PendingMutation::new(user_id, write));
            }
            return Ok(());
        }

        for (i, write) in writes.iter().enumerate() {
            match self.apply_direct(user_id, write).await {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    warn!(user_id, "write failed transiently; queueing remainder: {err}");
                    for rest in &writes[i..] {
                        self.queue
                            .enqueue(PendingMutation::new(user_id, rest.clone()));
                    }
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn apply_direct(
        &self,
        user_id: &str,
        payload: &MutationPayload,
    ) -> Result<(), GatewayError> {
        match payload {
            MutationPayload::StreakUpdate(streak) => {
                self.bounded(self.gateway.upsert_streak(user_id, streak)).await
            }
            MutationPayload::MilestoneCreate(milestone) => {
                self.bounded(self.gateway.insert_milestone(user_id, milestone))
                    .await
            }
            MutationPayload::CelebrationCreate(celebration) => {
                self.bounded(self.gateway.insert_celebration(user_id, celebration))
                    .await
            }
        }
    }
}

/// Fold freshly computed metrics and milestone outcome into the stored
/// state.
fn build_updated(
    previous: &EngagementStreak,
    metrics: &crate::streak::StreakMetrics,
    status: StreakStatus,
    outcome: &MilestoneOutcome,
) -> EngagementStreak {
    let mut achieved = previous.achieved_milestones.clone();
    achieved.extend(outcome.new_milestones.iter().cloned());
    achieved.sort_by_key(|m| m.streak_length);
    achieved.dedup_by_key(|m| m.streak_length);

    EngagementStreak {
        current_streak: metrics.current_streak,
        // The window-bounded metric may undercount the all-time longest.
        longest_streak: metrics.longest_streak.max(previous.longest_streak),
        streak_start_date: metrics.streak_start_date,
        last_engagement_date: metrics.last_engagement_date,
        is_active_today: metrics.is_active_today,
        status,
        achieved_milestones: achieved,
        pending_celebration: outcome
            .celebration
            .clone()
            .or_else(|| previous.pending_celebration.clone()),
        consistency_rate: metrics.consistency_rate,
        total_engagement_days: metrics.total_engagement_days,
    }
}

fn collect_writes(updated: &EngagementStreak, outcome: &MilestoneOutcome) -> Vec<MutationPayload> {
    let mut writes = Vec::with_capacity(2 + outcome.new_milestones.len());
    writes.push(MutationPayload::StreakUpdate(updated.clone()));
    for milestone in &outcome.new_milestones {
        writes.push(MutationPayload::MilestoneCreate(milestone.clone()));
    }
    if let Some(celebration) = &outcome.celebration {
        writes.push(MutationPayload::CelebrationCreate(celebration.clone()));
    }
    writes
}

fn result_message(updated: &EngagementStreak, outcome: &MilestoneOutcome) -> String {
    if let Some(celebration) = &outcome.celebration {
        return celebration.message.clone();
    }
    match updated.current_streak {
        0 => "Engagement recorded".to_string(),
        1 => "Streak started: day 1".to_string(),
        n => format!("Streak at {n} days"),
    }
}
