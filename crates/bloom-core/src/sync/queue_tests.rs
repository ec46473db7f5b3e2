//! Tests for the offline sync queue.

#[cfg(test)]
mod tests {
    use crate::config::QueueConfig;
    use crate::gateway::InMemoryGateway;
    use crate::streak::EngagementStreak;
    use crate::sync::connectivity::{ConnectivityMonitor, ConnectivityState};
    use crate::sync::queue::OfflineSyncQueue;
    use crate::sync::types::{MutationPayload, PendingMutation};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fast_config() -> QueueConfig {
        QueueConfig {
            max_attempts: 3,
            base_backoff_secs: 0,
            backoff_cap_secs: 0,
            max_pending: 100,
            flush_concurrency: 4,
            call_timeout_secs: 5,
        }
    }

    fn queue_with(
        gateway: &Arc<InMemoryGateway>,
        config: QueueConfig,
        dir: &TempDir,
    ) -> Arc<OfflineSyncQueue> {
        let gateway: Arc<dyn crate::gateway::PersistenceGateway> = gateway.clone();
        Arc::new(OfflineSyncQueue::new_with_path(
            gateway,
            config,
            dir.path().join("queue.json"),
        ))
    }

    fn streak_update(user: &str, current: u32) -> PendingMutation {
        let mut streak = EngagementStreak::empty();
        streak.current_streak = current;
        PendingMutation::new(user, MutationPayload::StreakUpdate(streak))
    }

    fn milestone_create(user: &str, len: u32) -> PendingMutation {
        let milestone = crate::streak::StreakMilestone {
            streak_length: len,
            title: format!("{len} days"),
            description: String::new(),
            achieved_at: chrono::Utc::now(),
            is_celebrated: false,
            milestone_type: crate::streak::MilestoneType::Special,
            bonus_points: 1,
        };
        PendingMutation::new(user, MutationPayload::MilestoneCreate(milestone))
    }

    fn celebration_create(user: &str, id: &str) -> PendingMutation {
        let celebration = crate::streak::StreakCelebration {
            id: id.to_string(),
            streak_length: 7,
            celebration_type: crate::streak::CelebrationType::WeeklyStreak,
            message: String::new(),
            animation_hint: "confetti".to_string(),
            duration_ms: 4000,
            is_shown: false,
            shown_at: None,
        };
        PendingMutation::new(user, MutationPayload::CelebrationCreate(celebration))
    }

    #[tokio::test]
    async fn test_flush_applies_in_enqueue_order() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        queue.enqueue(streak_update("u1", 7));
        queue.enqueue(milestone_create("u1", 7));
        queue.enqueue(celebration_create("u1", "c-1"));

        let report = queue.flush().await;
        assert_eq!(report.confirmed, 3);
        assert_eq!(report.remaining, 0);
        assert!(queue.is_empty());

        let log = gateway.apply_log();
        assert_eq!(
            log,
            vec![
                "upsert_streak:u1:7",
                "insert_milestone:u1:7",
                "insert_celebration:u1:c-1",
            ]
        );
    }

    #[tokio::test]
    async fn test_order_is_preserved_across_flush_cycles() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        gateway.set_available(false);
        queue.enqueue(streak_update("u1", 5));
        queue.enqueue(milestone_create("u1", 3));

        // First cycle fails on the first mutation; nothing may overtake it.
        let report = queue.flush().await;
        assert_eq!(report.confirmed, 0);
        assert_eq!(report.attempted, 1);
        assert_eq!(report.remaining, 2);

        gateway.set_available(true);
        queue.enqueue(celebration_create("u1", "c-1"));
        let report = queue.flush().await;
        assert_eq!(report.confirmed, 3);

        let log = gateway.apply_log();
        assert_eq!(
            log,
            vec![
                "upsert_streak:u1:5",
                "insert_milestone:u1:3",
                "insert_celebration:u1:c-1",
            ]
        );
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_with_attempt_count() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        gateway.set_available(false);
        queue.enqueue(streak_update("u1", 1));

        let report = queue.flush().await;
        assert_eq!(report.requeued, 1);
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_move_to_dead_letters() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        gateway.set_available(false);
        queue.enqueue(streak_update("u1", 1));

        for _ in 0..3 {
            queue.flush().await;
        }

        assert!(queue.is_empty());
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].mutation.attempt_count, 3);
        assert!(dead[0].reason.contains("unreachable"));
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        gateway.set_rejecting(true);
        queue.enqueue(streak_update("u1", 1));

        let report = queue.flush().await;
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.requeued, 0);
        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_gates_next_attempt() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let config = QueueConfig {
            base_backoff_secs: 60,
            backoff_cap_secs: 900,
            ..fast_config()
        };
        let queue = queue_with(&gateway, config, &dir);

        gateway.set_available(false);
        queue.enqueue(streak_update("u1", 1));
        queue.flush().await;

        // The retry is parked a minute out; an immediate flush skips it.
        gateway.set_available(true);
        let report = queue.flush().await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn test_users_flush_independently() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        queue.enqueue(streak_update("u1", 2));
        queue.enqueue(streak_update("u2", 4));
        queue.enqueue(milestone_create("u2", 3));

        let report = queue.flush().await;
        assert_eq!(report.confirmed, 3);

        // Within u2, order held.
        let log = gateway.apply_log();
        let u2: Vec<&String> = log.iter().filter(|l| l.contains("u2")).collect();
        assert_eq!(u2, vec!["upsert_streak:u2:4", "insert_milestone:u2:3"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_is_single_flight() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set_latency_ms(100);
        let queue = queue_with(&gateway, fast_config(), &dir);

        queue.enqueue(streak_update("u1", 1));

        let first = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.flush().await }
        });
        // Give the first flush time to take the guard.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = queue.flush().await;
        let first = first.await.unwrap();

        assert!(second.coalesced);
        assert!(!first.coalesced);
        // The single delivery happened exactly once.
        assert_eq!(gateway.apply_log().len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_overflow_coalesces_streak_updates() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let config = QueueConfig {
            max_pending: 3,
            ..fast_config()
        };
        let queue = queue_with(&gateway, config, &dir);

        queue.enqueue(streak_update("u1", 1));
        queue.enqueue(milestone_create("u1", 1));
        queue.enqueue(streak_update("u1", 2));
        // Cap reached: the two streak updates collapse into the earliest
        // slot carrying the newest value.
        queue.enqueue(streak_update("u1", 3));

        let pending = queue.pending();
        assert_eq!(pending.len(), 3);
        match &pending[0].payload {
            MutationPayload::StreakUpdate(streak) => assert_eq!(streak.current_streak, 2),
            other => panic!("expected streak update first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_celebrations_only() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let config = QueueConfig {
            max_pending: 2,
            ..fast_config()
        };
        let queue = queue_with(&gateway, config, &dir);

        queue.enqueue(celebration_create("u1", "c-old"));
        queue.enqueue(milestone_create("u1", 1));
        queue.enqueue(celebration_create("u1", "c-new"));

        let pending = queue.pending();
        assert_eq!(pending.len(), 2);
        // The milestone survived; the oldest celebration did not.
        assert!(matches!(
            pending[0].payload,
            MutationPayload::MilestoneCreate(_)
        ));
        match &pending[1].payload {
            MutationPayload::CelebrationCreate(c) => assert_eq!(c.id, "c-new"),
            other => panic!("expected celebration, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        queue.enqueue(streak_update("u1", 3));
        queue.enqueue(milestone_create("u1", 3));
        queue.persist().unwrap();

        let restored = queue_with(&gateway, fast_config(), &dir);
        restored.load().unwrap();
        assert_eq!(restored.len(), 2);

        let report = restored.flush().await;
        assert_eq!(report.confirmed, 2);
        assert_eq!(gateway.apply_log()[0], "upsert_streak:u1:3");
    }

    #[tokio::test]
    async fn test_drain_all_empties_queue() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        queue.enqueue(streak_update("u1", 1));
        queue.enqueue(streak_update("u2", 2));

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_connectivity_restore_triggers_flush() {
        let dir = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_with(&gateway, fast_config(), &dir);

        let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
        let _subscription = queue.watch_connectivity(monitor.subscribe());

        queue.enqueue(streak_update("u1", 2));
        assert_eq!(queue.len(), 1);

        monitor.set_state(ConnectivityState::Online);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(queue.is_empty());
        assert_eq!(gateway.apply_log(), vec!["upsert_streak:u1:2"]);
    }
}
