//! Connectivity signal plumbing.
//!
//! The platform's reachability callback feeds a [`ConnectivityMonitor`];
//! the queue subscribes through a watch channel and reacts to
//! offline-to-online transitions. The subscription is a scoped guard:
//! dropping it detaches the watcher task exactly once.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Network reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

/// Source side of the connectivity signal.
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a state change. No-op when the state is unchanged.
    pub fn set_state(&self, state: ConnectivityState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ConnectivityState {
        *self.tx.borrow()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}

/// Owned handle to a spawned connectivity watcher.
///
/// Releasing aborts the task; dropping releases implicitly. Either way the
/// listener is detached exactly once.
pub struct ConnectivitySubscription {
    handle: Option<JoinHandle<()>>,
}

impl ConnectivitySubscription {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Detach the watcher now instead of at drop time.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ConnectivitySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_publishes_changes() {
        let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
        let rx = monitor.subscribe();
        assert_eq!(*rx.borrow(), ConnectivityState::Offline);

        monitor.set_state(ConnectivityState::Online);
        assert_eq!(*rx.borrow(), ConnectivityState::Online);
        assert!(monitor.current().is_online());
    }

    #[tokio::test]
    async fn test_unchanged_state_does_not_wake_subscribers() {
        let monitor = ConnectivityMonitor::new(ConnectivityState::Online);
        let mut rx = monitor.subscribe();
        rx.mark_unchanged();

        monitor.set_state(ConnectivityState::Online);
        assert!(!rx.has_changed().unwrap());

        monitor.set_state(ConnectivityState::Offline);
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_subscription_release_is_idempotent() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        let mut subscription = ConnectivitySubscription::new(handle);
        subscription.release();
        subscription.release(); // second release is a no-op
    }
}
