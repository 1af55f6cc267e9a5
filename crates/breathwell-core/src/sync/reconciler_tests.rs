//! Tests for the sync reconciler.

#[cfg(test)]
mod tests {
    use super::super::reconciler::*;
    use crate::events::Event;
    use crate::storage::{DeviceKind, SessionRecord, SessionStore};
    use crate::sync::{MemoryTransport, Outbox, PeerTransport, RetryPolicy, SyncMessage};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    fn record(start_secs: i64, millis: u32, device: DeviceKind) -> SessionRecord {
        let started_at = Utc
            .timestamp_opt(1_700_000_000 + start_secs, millis * 1_000_000)
            .unwrap();
        SessionRecord {
            id: Uuid::new_v4(),
            started_at,
            ended_at: started_at + chrono::Duration::seconds(76),
            cycles_completed: 4,
            duration_secs: 76.0,
            hrv_before: Some(40.0),
            hrv_after: Some(50.0),
            average_heart_rate: None,
            synced_to_health: true,
            source_device: device,
        }
    }

    fn reconciler() -> (SyncReconciler, Arc<SessionStore>, Arc<MemoryTransport>) {
        let store = Arc::new(SessionStore::open_memory().unwrap());
        let transport = Arc::new(MemoryTransport::new());
        let reconciler = SyncReconciler::new(
            store.clone(),
            transport.clone(),
            Outbox::in_memory(RetryPolicy::default()),
        );
        (reconciler, store, transport)
    }

    fn wire(record: &SessionRecord) -> serde_json::Value {
        SyncMessage::new_session(record).to_wire().unwrap()
    }

    #[test]
    fn test_push_delivers_immediately_when_reachable() {
        let (reconciler, _, transport) = reconciler();
        let report = reconciler.push(&record(0, 0, DeviceKind::Watch)).unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.pending, 0);
        let sent = transport.take_delivered();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "newSession");
    }

    #[test]
    fn test_push_uses_queued_channel_when_unreachable() {
        let (reconciler, _, transport) = reconciler();
        transport.set_reachable(false);
        let report = reconciler.push(&record(0, 0, DeviceKind::Watch)).unwrap();

        assert_eq!(report.transferred, 1);
        assert_eq!(transport.take_transferred().len(), 1);
        assert_eq!(reconciler.pending(), 0);
    }

    #[test]
    fn test_failed_delivery_stays_in_outbox() {
        let (reconciler, _, transport) = reconciler();
        transport.set_reachable(false);
        transport.set_queued_available(false);

        let report = reconciler.push(&record(0, 0, DeviceKind::Phone)).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(reconciler.pending(), 1);

        // Not due again until the backoff expires.
        transport.set_reachable(true);
        let report = reconciler.flush().unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.pending, 1);
    }

    #[test]
    fn test_duplicate_delivery_stores_one_record() {
        let (reconciler, store, _) = reconciler();
        let message = wire(&record(0, 0, DeviceKind::Watch));

        assert!(matches!(reconciler.receive(&message), InboundOutcome::Inserted { .. }));
        assert!(matches!(reconciler.receive(&message), InboundOutcome::Duplicate { .. }));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_inbound_copy_of_local_session_is_discarded() {
        let (reconciler, store, _) = reconciler();
        let local = record(0, 0, DeviceKind::Phone);
        store.append(&local).unwrap();

        let echoed = record(0, 400, DeviceKind::Watch);
        assert_eq!(
            reconciler.receive(&wire(&echoed)),
            InboundOutcome::Duplicate { existing: local.id }
        );
    }

    #[test]
    fn test_distinct_starts_are_both_kept() {
        let (reconciler, store, _) = reconciler();
        reconciler.receive(&wire(&record(0, 0, DeviceKind::Watch)));
        reconciler.receive(&wire(&record(0, 600, DeviceKind::Watch)));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_malformed_messages_are_dropped() {
        let (reconciler, store, _) = reconciler();
        for message in [
            json!({"type": "newSession", "startDate": "yesterday"}),
            json!({"type": "somethingElse"}),
            json!("newSession"),
        ] {
            assert!(matches!(reconciler.receive(&message), InboundOutcome::Rejected { .. }));
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_inbound_results_are_published() {
        let (tx, mut rx) = broadcast::channel(8);
        let store = Arc::new(SessionStore::open_memory().unwrap());
        let reconciler = SyncReconciler::new(
            store,
            Arc::new(MemoryTransport::new()),
            Outbox::in_memory(RetryPolicy::default()),
        )
        .with_events(tx);

        let message = wire(&record(0, 0, DeviceKind::Watch));
        reconciler.receive(&message);
        reconciler.receive(&message);

        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::RecordReceived { source_device: DeviceKind::Watch, .. }
        ));
        assert!(matches!(rx.try_recv().unwrap(), Event::DuplicateDiscarded { .. }));
    }

    #[test]
    fn test_receive_from_dir_imports_and_clears() {
        let temp = tempfile::tempdir().unwrap();
        let (reconciler, store, _) = reconciler();
        std::fs::write(
            temp.path().join("1-a.json"),
            serde_json::to_vec(&wire(&record(0, 0, DeviceKind::Watch))).unwrap(),
        )
        .unwrap();
        std::fs::write(
            temp.path().join("2-b.json"),
            serde_json::to_vec(&wire(&record(3600, 0, DeviceKind::Watch))).unwrap(),
        )
        .unwrap();

        let outcomes = reconciler.receive_from_dir(temp.path()).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(store.count().unwrap(), 2);
        assert!(reconciler.receive_from_dir(temp.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_loop_delivers_after_backoff() {
        let store = Arc::new(SessionStore::open_memory().unwrap());
        let transport = Arc::new(MemoryTransport::new());
        let policy = RetryPolicy::new(
            std::time::Duration::from_millis(100),
            std::time::Duration::from_secs(1),
        );
        let reconciler = Arc::new(SyncReconciler::new(
            store,
            transport.clone(),
            Outbox::in_memory(policy),
        ));

        transport.set_reachable(false);
        transport.set_queued_available(false);
        reconciler.push(&record(0, 0, DeviceKind::Watch)).unwrap();
        assert_eq!(reconciler.pending(), 1);

        transport.set_reachable(true);
        let cancel = tokio_util::sync::CancellationToken::new();
        let handle = tokio::spawn(reconciler.clone().run(cancel.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(reconciler.pending(), 0);
        assert_eq!(transport.take_delivered().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    /// Transport whose sends hold the calling thread.
    struct SlowTransport {
        inner: MemoryTransport,
        delay: std::time::Duration,
    }

    impl PeerTransport for SlowTransport {
        fn is_reachable(&self) -> bool {
            self.inner.is_reachable()
        }

        fn send_message(&self, message: &serde_json::Value) -> Result<(), crate::error::SyncError> {
            std::thread::sleep(self.delay);
            self.inner.send_message(message)
        }

        fn transfer(&self, message: &serde_json::Value) -> Result<(), crate::error::SyncError> {
            self.inner.transfer(message)
        }
    }

    #[tokio::test]
    async fn test_retry_loop_keeps_runtime_responsive() {
        let store = Arc::new(SessionStore::open_memory().unwrap());
        let transport = Arc::new(SlowTransport {
            inner: MemoryTransport::new(),
            delay: std::time::Duration::from_millis(600),
        });
        let policy = RetryPolicy::new(
            std::time::Duration::from_millis(50),
            std::time::Duration::from_secs(1),
        );
        let reconciler = Arc::new(SyncReconciler::new(
            store,
            transport.clone(),
            Outbox::in_memory(policy),
        ));

        transport.inner.set_reachable(false);
        transport.inner.set_queued_available(false);
        reconciler.push(&record(0, 0, DeviceKind::Watch)).unwrap();
        transport.inner.set_reachable(true);

        let cancel = tokio_util::sync::CancellationToken::new();
        let handle = tokio::spawn(reconciler.clone().run(cancel.clone()));

        // Lands inside the slow send on this single-threaded runtime.
        let started = std::time::Instant::now();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(started.elapsed() < std::time::Duration::from_millis(500));

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(transport.inner.take_delivered().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
