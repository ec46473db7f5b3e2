//! Narrow gateway to the remote store.
//!
//! The concrete store is an external collaborator; the engine only ever
//! talks to it through [`PersistenceGateway`]. Every failure is classed as
//! transient (retry via the offline queue) or permanent (surface to the
//! caller, do not retry).
//!
//! ## Backends
//!
//! - [`HttpGateway`] - REST backend of the production app
//! - [`InMemoryGateway`] - in-process backend for tests and local runs

pub mod http;
pub mod memory;

pub use http::{HttpGateway, HttpGatewayConfig};
pub use memory::InMemoryGateway;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::streak::{EngagementStreak, StreakCelebration, StreakMilestone};

/// Errors surfaced by a gateway backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network-shaped failure worth retrying later.
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// Validation or authorization failure; retrying cannot help.
    #[error("Permanent remote error: {0}")]
    Permanent(String),

    /// A bounded remote call did not return in time.
    #[error("Remote call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl GatewayError {
    /// Whether the queue should retry the failed call.
    pub fn is_transient(&self) -> bool {
        !matches!(self, GatewayError::Permanent(_))
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GatewayError::Timeout { timeout_secs: 0 }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Read/write contract against the remote store.
///
/// Writes initiated while offline are never assumed durable by the caller;
/// the offline queue owns redelivery.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Fetch the stored streak row, if the user has one.
    async fn fetch_streak(&self, user_id: &str) -> Result<Option<EngagementStreak>>;

    /// Create or replace the streak row for a user.
    async fn upsert_streak(&self, user_id: &str, streak: &EngagementStreak) -> Result<()>;

    /// Distinct local engagement days on or after `since`, unordered.
    async fn fetch_engagement_dates(&self, user_id: &str, since: NaiveDate)
        -> Result<Vec<NaiveDate>>;

    /// Every milestone row for a user.
    async fn fetch_milestones(&self, user_id: &str) -> Result<Vec<StreakMilestone>>;

    /// Insert a milestone row keyed by `(user_id, streak_length)`.
    /// Re-inserting an existing key is a no-op, not an error.
    async fn insert_milestone(&self, user_id: &str, milestone: &StreakMilestone) -> Result<()>;

    /// The user's unshown celebration, if any.
    async fn fetch_pending_celebration(&self, user_id: &str) -> Result<Option<StreakCelebration>>;

    /// Insert or replace a celebration row by id. Replacement carries the
    /// `is_shown` flip.
    async fn insert_celebration(&self, user_id: &str, celebration: &StreakCelebration)
        -> Result<()>;

    /// Remove every row for a user. Only the explicit account reset calls
    /// this.
    async fn delete_user_data(&self, user_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classes() {
        assert!(GatewayError::Transient("503".into()).is_transient());
        assert!(GatewayError::Timeout { timeout_secs: 10 }.is_transient());
        assert!(!GatewayError::Permanent("validation".into()).is_transient());
    }
}
