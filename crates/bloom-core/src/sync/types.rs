//! Core types for the offline mutation queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::streak::{EngagementStreak, StreakCelebration, StreakMilestone};

/// Mutation kind identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    StreakUpdate,
    MilestoneCreate,
    CelebrationCreate,
}

/// The write a pending mutation will replay against the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MutationPayload {
    StreakUpdate(EngagementStreak),
    MilestoneCreate(StreakMilestone),
    CelebrationCreate(StreakCelebration),
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::StreakUpdate(_) => MutationKind::StreakUpdate,
            MutationPayload::MilestoneCreate(_) => MutationKind::MilestoneCreate,
            MutationPayload::CelebrationCreate(_) => MutationKind::CelebrationCreate,
        }
    }
}

/// A remote write that could not reach the store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Unique identifier of this queue entry.
    pub id: String,
    pub user_id: String,
    pub payload: MutationPayload,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    /// Earliest time the next delivery attempt may run.
    pub next_attempt_at: DateTime<Utc>,
}

impl PendingMutation {
    /// Create a fresh, immediately-deliverable mutation.
    pub fn new(user_id: &str, payload: MutationPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            payload,
            enqueued_at: now,
            attempt_count: 0,
            next_attempt_at: now,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.payload.kind()
    }
}

/// A mutation that exhausted its retry budget, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub mutation: PendingMutation,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Outcome of one flush call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Deliveries attempted this flush.
    pub attempted: usize,
    /// Mutations confirmed and removed.
    pub confirmed: usize,
    /// Mutations that failed transiently and stay queued with backoff.
    pub requeued: usize,
    /// Mutations moved to the dead-letter record.
    pub dead_lettered: usize,
    /// Mutations still pending after the flush.
    pub remaining: usize,
    /// True when this call landed mid-flush and was folded into the
    /// in-progress one.
    pub coalesced: bool,
}

impl FlushReport {
    pub(crate) fn absorb(&mut self, other: FlushReport) {
        self.attempted += other.attempted;
        self.confirmed += other.confirmed;
        self.requeued += other.requeued;
        self.dead_lettered += other.dead_lettered;
    }
}

/// Queue snapshot for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub dead_letter_count: usize,
    pub in_progress: bool,
    pub last_flush_at: Option<DateTime<Utc>>,
}

/// Queue persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_kind_mapping() {
        let m = PendingMutation::new(
            "u1",
            MutationPayload::StreakUpdate(EngagementStreak::empty()),
        );
        assert_eq!(m.kind(), MutationKind::StreakUpdate);
        assert_eq!(m.attempt_count, 0);
        assert!(m.next_attempt_at <= Utc::now());
    }

    #[test]
    fn test_payload_round_trips_through_json() {
        let m = PendingMutation::new(
            "u1",
            MutationPayload::StreakUpdate(EngagementStreak::empty()),
        );
        let text = serde_json::to_string(&m).unwrap();
        let parsed: PendingMutation = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, m);
    }
}
