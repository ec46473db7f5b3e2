//! End-to-end offline flow: engage while disconnected, reconnect, verify
//! ordered delivery and a consistent cache.

use std::sync::Arc;

use bloom_core::{
    ConnectivityMonitor, ConnectivityState, EngineConfig, InMemoryGateway, NoopMomentumSink,
    OfflineSyncQueue, PersistenceGateway, StreakService, StreakStatus,
};
use tempfile::TempDir;

fn service_with(
    gateway: &Arc<InMemoryGateway>,
    monitor: &ConnectivityMonitor,
    dir: &TempDir,
) -> StreakService {
    let config = EngineConfig::default();
    let queue = Arc::new(OfflineSyncQueue::new_with_path(
        Arc::clone(gateway) as Arc<dyn PersistenceGateway>,
        config.queue.clone(),
        dir.path().join("queue.json"),
    ));
    StreakService::with_queue(
        Arc::clone(gateway) as Arc<dyn PersistenceGateway>,
        config,
        monitor.subscribe(),
        Arc::new(NoopMomentumSink),
        queue,
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_engagement_flushes_in_order_on_reconnect() {
    let dir = TempDir::new().unwrap();
    let gateway = Arc::new(InMemoryGateway::new());
    let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
    let service = service_with(&gateway, &monitor, &dir);

    // One first-day engagement while disconnected produces three
    // mutations: the streak row, the first-day milestone, the celebration.
    let result = service.record_engagement("u1", chrono::Utc::now()).await;
    assert!(result.success);
    assert_eq!(service.queue_status().pending_count, 3);
    assert!(gateway.stored_streak("u1").is_none());

    // The session keeps reading the new state from cache meanwhile.
    let cached = service.streak_for("u1").await;
    assert_eq!(cached.current_streak, 1);
    assert_eq!(cached.status, StreakStatus::Starting);
    assert!(cached.pending_celebration.is_some());

    // Reconnect: the queue watcher flushes everything in enqueue order.
    monitor.set_state(ConnectivityState::Online);
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    assert_eq!(service.queue_status().pending_count, 0);
    let log = gateway.apply_log();
    assert_eq!(log.len(), 3);
    assert!(log[0].starts_with("upsert_streak:u1"));
    assert!(log[1].starts_with("insert_milestone:u1"));
    assert!(log[2].starts_with("insert_celebration:u1"));

    // Remote and cache agree on the merged state.
    let stored = gateway.stored_streak("u1").unwrap();
    assert_eq!(stored.current_streak, 1);
    assert_eq!(stored, service.streak_for("u1").await);

    service.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queue_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let gateway = Arc::new(InMemoryGateway::new());
    let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);

    {
        let service = service_with(&gateway, &monitor, &dir);
        let result = service.record_engagement("u1", chrono::Utc::now()).await;
        assert!(result.success);
        service.shutdown();
    }

    // A new session restores the parked writes and delivers them.
    let monitor = ConnectivityMonitor::new(ConnectivityState::Online);
    let service = service_with(&gateway, &monitor, &dir);
    assert_eq!(service.queue_status().pending_count, 3);

    let report = service.flush_queue().await;
    assert_eq!(report.confirmed, 3);
    assert_eq!(gateway.stored_streak("u1").unwrap().current_streak, 1);

    service.shutdown();
}
