//! # Bloom Core Library
//!
//! This library provides the engagement-streak engine for the Bloom
//! wellness app: it turns raw daily engagement events into durable streak
//! state, detects milestones, and keeps a local cache consistent with the
//! remote store under intermittent connectivity. Screens, coaching flows
//! and the concrete store live outside this crate.
//!
//! ## Architecture
//!
//! - **Streak**: pure calculation from engagement days, status bands,
//!   milestone and celebration detection
//! - **Cache**: TTL-bounded per-user cache of computed streak state
//! - **Sync**: durable offline queue with retry, backoff, dead-letters and
//!   connectivity-triggered flushing
//! - **Gateway**: narrow async contract to the remote store, with HTTP and
//!   in-memory backends
//!
//! ## Key Components
//!
//! - [`StreakService`]: the engine's public entry point
//! - [`StreakCalculator`]: deterministic metric computation
//! - [`MilestoneEngine`]: idempotent milestone detection
//! - [`OfflineSyncQueue`]: ordered offline mutation replay
//! - [`PersistenceGateway`]: trait the remote store is consumed through

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod service;
pub mod streak;
pub mod sync;

pub use cache::{CacheStats, StreakCache};
pub use config::{CacheConfig, CalculatorConfig, EngineConfig, QueueConfig};
pub use error::{ComputationError, ConfigError, CoreError, Result};
pub use gateway::{GatewayError, HttpGateway, HttpGatewayConfig, InMemoryGateway, PersistenceGateway};
pub use service::{MomentumSink, NoopMomentumSink, StreakService, StreakUpdateResult};
pub use streak::{
    CelebrationType, EngagementStreak, MilestoneEngine, MilestoneType, StreakCalculator,
    StreakCelebration, StreakMetrics, StreakMilestone, StreakStatus,
};
pub use sync::{
    ConnectivityMonitor, ConnectivityState, FlushReport, MutationKind, MutationPayload,
    OfflineSyncQueue, PendingMutation, QueueStatus,
};
