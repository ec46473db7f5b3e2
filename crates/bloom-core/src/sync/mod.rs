//! Offline synchronization layer.
//!
//! Remote writes that cannot reach the store are parked in a durable queue
//! and replayed once connectivity returns, in per-user FIFO order with
//! retry, backoff and a dead-letter record.

pub mod connectivity;
pub mod queue;
pub mod types;

#[cfg(test)]
mod queue_tests;

pub use connectivity::{ConnectivityMonitor, ConnectivityState, ConnectivitySubscription};
pub use queue::OfflineSyncQueue;
pub use types::{
    DeadLetter, FlushReport, MutationKind, MutationPayload, PendingMutation, QueueError,
    QueueStatus,
};
