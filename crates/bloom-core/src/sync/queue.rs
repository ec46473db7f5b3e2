//! Durable offline queue for remote mutations.
//!
//! Writes that cannot reach the store are parked here and replayed with
//! exponential backoff once connectivity returns. Ordering is FIFO per
//! user across flush cycles; different users flush in parallel under a
//! bounded permit count. Flushing is single-flight: a request landing
//! mid-flush is coalesced into one more pass instead of stacking.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{data_dir, QueueConfig};
use crate::gateway::{GatewayError, PersistenceGateway};
use crate::sync::connectivity::{ConnectivityState, ConnectivitySubscription};
use crate::sync::types::{
    DeadLetter, FlushReport, MutationPayload, PendingMutation, QueueError, QueueStatus,
};

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingMutation>,
    dead_letters: Vec<DeadLetter>,
    flush_in_progress: bool,
    rerun_requested: bool,
    last_flush_at: Option<DateTime<Utc>>,
}

/// On-disk snapshot of the queue.
#[derive(Default, Serialize, Deserialize)]
struct PersistedQueue {
    pending: Vec<PendingMutation>,
    dead_letters: Vec<DeadLetter>,
}

/// Result of delivering one mutation.
struct DeliveryOutcome {
    id: String,
    result: Result<(), GatewayError>,
}

/// Ordered, retrying queue of pending remote mutations.
pub struct OfflineSyncQueue {
    state: Mutex<QueueState>,
    gateway: Arc<dyn PersistenceGateway>,
    config: QueueConfig,
    /// Persistent queue file path.
    queue_file: PathBuf,
}

impl OfflineSyncQueue {
    /// Create a queue persisting to the default data directory.
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: QueueConfig) -> Self {
        let dir = data_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new_with_path(gateway, config, dir.join("sync_queue.json"))
    }

    /// Create a queue with a specific queue file (for testing).
    pub fn new_with_path(
        gateway: Arc<dyn PersistenceGateway>,
        config: QueueConfig,
        path: PathBuf,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            gateway,
            config,
            queue_file: path,
        }
    }

    /// Park a mutation for later delivery.
    pub fn enqueue(&self, mutation: PendingMutation) {
        {
            let mut state = self.state.lock().unwrap();
            if state.pending.len() >= self.config.max_pending {
                self.apply_overflow_policy(&mut state);
            }
            state.pending.push(mutation);
        }
        self.persist_best_effort();
    }

    /// Deliver every due mutation, one pass plus one coalesced rerun at
    /// most per request.
    ///
    /// Returns a report with `coalesced = true` when another flush was
    /// already running and this request was folded into it.
    pub async fn flush(&self) -> FlushReport {
        {
            let mut state = self.state.lock().unwrap();
            if state.flush_in_progress {
                state.rerun_requested = true;
                debug!("flush already in progress; coalescing request");
                return FlushReport {
                    coalesced: true,
                    remaining: state.pending.len(),
                    ..FlushReport::default()
                };
            }
            state.flush_in_progress = true;
        }

        let mut report = FlushReport::default();
        loop {
            let pass = self.flush_pass().await;
            report.absorb(pass);

            let mut state = self.state.lock().unwrap();
            if state.rerun_requested {
                state.rerun_requested = false;
                drop(state);
                continue;
            }
            state.flush_in_progress = false;
            state.last_flush_at = Some(Utc::now());
            report.remaining = state.pending.len();
            break;
        }
        self.persist_best_effort();
        report
    }

    /// One delivery pass over the currently-due mutations.
    async fn flush_pass(&self) -> FlushReport {
        let now = Utc::now();
        let batches: Vec<Vec<PendingMutation>> = {
            let state = self.state.lock().unwrap();
            let mut per_user: HashMap<String, Vec<PendingMutation>> = HashMap::new();
            let mut blocked: HashSet<String> = HashSet::new();
            let mut order: Vec<String> = Vec::new();
            for mutation in &state.pending {
                if blocked.contains(&mutation.user_id) {
                    continue;
                }
                if mutation.next_attempt_at > now {
                    // FIFO per user: nothing may jump a backoff gate.
                    blocked.insert(mutation.user_id.clone());
                    continue;
                }
                if !per_user.contains_key(&mutation.user_id) {
                    order.push(mutation.user_id.clone());
                }
                per_user
                    .entry(mutation.user_id.clone())
                    .or_default()
                    .push(mutation.clone());
            }
            order
                .into_iter()
                .filter_map(|user| per_user.remove(&user))
                .collect()
        };

        if batches.is_empty() {
            return FlushReport::default();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.flush_concurrency));
        let mut join_set = JoinSet::new();
        for mutations in batches {
            let semaphore = Arc::clone(&semaphore);
            let gateway = Arc::clone(&self.gateway);
            let timeout_secs = self.config.call_timeout_secs;
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Vec::new(),
                };
                deliver_user_batch(gateway, mutations, timeout_secs).await
            });
        }

        let mut outcomes: Vec<DeliveryOutcome> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(list) => outcomes.extend(list),
                Err(e) => warn!("flush worker failed: {e}"),
            }
        }

        self.fold_outcomes(outcomes)
    }

    /// Apply delivery outcomes to the queue state.
    fn fold_outcomes(&self, outcomes: Vec<DeliveryOutcome>) -> FlushReport {
        let now = Utc::now();
        let mut report = FlushReport::default();
        let mut state = self.state.lock().unwrap();

        for outcome in outcomes {
            report.attempted += 1;
            let Some(pos) = state.pending.iter().position(|m| m.id == outcome.id) else {
                continue;
            };
            match outcome.result {
                Ok(()) => {
                    state.pending.remove(pos);
                    report.confirmed += 1;
                }
                Err(err) if err.is_transient() => {
                    state.pending[pos].attempt_count += 1;
                    let attempts = state.pending[pos].attempt_count;
                    if attempts >= self.config.max_attempts {
                        let dead = state.pending.remove(pos);
                        warn!(
                            user_id = %dead.user_id,
                            kind = ?dead.kind(),
                            "mutation exhausted {attempts} attempts; moving to dead letters"
                        );
                        state.dead_letters.push(DeadLetter {
                            mutation: dead,
                            reason: err.to_string(),
                            failed_at: now,
                        });
                        report.dead_lettered += 1;
                    } else {
                        state.pending[pos].next_attempt_at = now + self.backoff_delay(attempts);
                        report.requeued += 1;
                    }
                }
                Err(err) => {
                    let dead = state.pending.remove(pos);
                    warn!(
                        user_id = %dead.user_id,
                        kind = ?dead.kind(),
                        error = %err,
                        "permanent failure; moving to dead letters"
                    );
                    state.dead_letters.push(DeadLetter {
                        mutation: dead,
                        reason: err.to_string(),
                        failed_at: now,
                    });
                    report.dead_lettered += 1;
                }
            }
        }
        report
    }

    /// Delay before attempt `attempt_count + 1` may run.
    fn backoff_delay(&self, attempt_count: u32) -> Duration {
        let secs = self
            .config
            .base_backoff_secs
            .saturating_mul(1u64 << attempt_count.min(16))
            .min(self.config.backoff_cap_secs);
        Duration::seconds(secs as i64)
    }

    /// Shrink the queue once the pending cap is reached: coalesce each
    /// user's streak updates to the latest value, then drop the oldest
    /// celebration entries. Milestone mutations are never dropped.
    fn apply_overflow_policy(&self, state: &mut QueueState) {
        let mut latest: HashMap<String, MutationPayload> = HashMap::new();
        for mutation in &state.pending {
            if matches!(mutation.payload, MutationPayload::StreakUpdate(_)) {
                latest.insert(mutation.user_id.clone(), mutation.payload.clone());
            }
        }
        let mut kept: HashSet<String> = HashSet::new();
        let before = state.pending.len();
        state.pending.retain_mut(|mutation| {
            if !matches!(mutation.payload, MutationPayload::StreakUpdate(_)) {
                return true;
            }
            if kept.insert(mutation.user_id.clone()) {
                // The earliest slot keeps its queue position but carries
                // the newest streak value.
                if let Some(payload) = latest.get(&mutation.user_id) {
                    mutation.payload = payload.clone();
                }
                true
            } else {
                false
            }
        });
        if state.pending.len() < before {
            warn!(
                dropped = before - state.pending.len(),
                "queue overflow: coalesced streak updates"
            );
        }

        while state.pending.len() >= self.config.max_pending {
            let Some(pos) = state
                .pending
                .iter()
                .position(|m| matches!(m.payload, MutationPayload::CelebrationCreate(_)))
            else {
                warn!(
                    pending = state.pending.len(),
                    "queue overflow: no droppable entries, exceeding cap"
                );
                break;
            };
            let dropped = state.pending.remove(pos);
            warn!(
                user_id = %dropped.user_id,
                "queue overflow: dropped oldest celebration mutation"
            );
        }
    }

    /// Remove and return every pending mutation (diagnostics and tests).
    pub fn drain_all(&self) -> Vec<PendingMutation> {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.pending)
    }

    /// Pending mutations, in enqueue order, without removing them.
    pub fn pending(&self) -> Vec<PendingMutation> {
        self.state.lock().unwrap().pending.clone()
    }

    /// Mutations that exhausted their retry budget.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().unwrap().dead_letters.clone()
    }

    /// Whether any pending mutation belongs to `user_id`.
    pub fn has_pending_for(&self, user_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .pending
            .iter()
            .any(|m| m.user_id == user_id)
    }

    /// Get number of pending mutations.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Check if queue is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().pending.is_empty()
    }

    /// Current queue snapshot.
    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock().unwrap();
        QueueStatus {
            pending_count: state.pending.len(),
            dead_letter_count: state.dead_letters.len(),
            in_progress: state.flush_in_progress,
            last_flush_at: state.last_flush_at,
        }
    }

    /// Persist queue to disk.
    pub fn persist(&self) -> Result<(), QueueError> {
        let snapshot = {
            let state = self.state.lock().unwrap();
            PersistedQueue {
                pending: state.pending.clone(),
                dead_letters: state.dead_letters.clone(),
            }
        };
        let data = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&self.queue_file, data)?;
        Ok(())
    }

    /// Load queue from disk.
    pub fn load(&self) -> Result<(), QueueError> {
        if !self.queue_file.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.queue_file)?;
        let loaded: PersistedQueue = serde_json::from_str(&content)?;
        let mut state = self.state.lock().unwrap();
        state.pending = loaded.pending;
        state.dead_letters = loaded.dead_letters;
        Ok(())
    }

    fn persist_best_effort(&self) {
        if let Err(e) = self.persist() {
            warn!("failed to persist offline queue: {e}");
        }
    }

    /// Spawn a watcher that flushes on every offline-to-online transition.
    ///
    /// The returned guard owns the watcher; dropping it detaches the
    /// listener.
    pub fn watch_connectivity(
        self: &Arc<Self>,
        mut rx: watch::Receiver<ConnectivityState>,
    ) -> ConnectivitySubscription {
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut last = *rx.borrow();
            while rx.changed().await.is_ok() {
                let current = *rx.borrow();
                if last == ConnectivityState::Offline && current.is_online() {
                    debug!("connectivity restored; flushing offline queue");
                    let report = queue.flush().await;
                    debug!(
                        confirmed = report.confirmed,
                        remaining = report.remaining,
                        "connectivity flush finished"
                    );
                }
                last = current;
            }
        });
        ConnectivitySubscription::new(handle)
    }
}

/// Deliver one user's mutations in order, stopping at the first failure so
/// later writes cannot overtake it.
async fn deliver_user_batch(
    gateway: Arc<dyn PersistenceGateway>,
    mutations: Vec<PendingMutation>,
    timeout_secs: u64,
) -> Vec<DeliveryOutcome> {
    let mut outcomes = Vec::new();
    for mutation in mutations {
        let result = apply_mutation(gateway.as_ref(), &mutation, timeout_secs).await;
        let failed = result.is_err();
        outcomes.push(DeliveryOutcome {
            id: mutation.id.clone(),
            result,
        });
        if failed {
            break;
        }
    }
    outcomes
}

/// Replay one mutation against the gateway under the call timeout.
async fn apply_mutation(
    gateway: &dyn PersistenceGateway,
    mutation: &PendingMutation,
    timeout_secs: u64,
) -> Result<(), GatewayError> {
    let call = async {
        match &mutation.payload {
            MutationPayload::StreakUpdate(streak) => {
                gateway.upsert_streak(&mutation.user_id, streak).await
            }
            MutationPayload::MilestoneCreate(milestone) => {
                gateway.insert_milestone(&mutation.user_id, milestone).await
            }
            MutationPayload::CelebrationCreate(celebration) => {
                gateway
                    .insert_celebration(&mutation.user_id, celebration)
                    .await
            }
        }
    };
    match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout { timeout_secs }),
    }
}
