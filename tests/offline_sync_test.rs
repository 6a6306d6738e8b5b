//! Integration tests for the offline round trip: scans taken while the store
//! is unreachable end up attended exactly once after reconnect.

use chrono::{DateTime, Utc};
use scan_engine::domain::types::{AttendeeId, BoothId, DeviceId, SessionId};
use scan_engine::domain::{EventSnapshot, ScanStatus, ScanTarget};
use scan_engine::infra::Metrics;
use scan_engine::io::store::AuthoritativeStore;
use scan_engine::io::{InMemoryStore, OfflineScanQueue, QueueConfig};
use scan_engine::services::{ScanIngestService, SyncManager};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{watch, Notify};

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn fixture() -> EventSnapshot {
    EventSnapshot::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/event.json"))
        .unwrap()
}

fn queue_at(dir: &TempDir) -> Arc<OfflineScanQueue> {
    let config = QueueConfig {
        path: Some(dir.path().join("pending_scans.jsonl")),
        ..QueueConfig::default()
    };
    Arc::new(OfflineScanQueue::open(config).unwrap())
}

struct Harness {
    ingest: ScanIngestService,
    sync: SyncManager,
    store: Arc<InMemoryStore>,
    queue: Arc<OfflineScanQueue>,
}

fn harness(queue: Arc<OfflineScanQueue>, store: Arc<InMemoryStore>) -> Harness {
    let metrics = Arc::new(Metrics::new());
    let signal = Arc::new(Notify::new());
    let ingest = ScanIngestService::new(fixture(), queue.clone(), store.clone(), metrics.clone())
        .with_commit_timeout(Duration::from_millis(200))
        .with_sync_signal(signal.clone());
    let sync = SyncManager::new(queue.clone(), store.clone(), metrics)
        .with_commit_timeout(Duration::from_millis(200))
        .with_signal(signal);
    Harness { ingest, sync, store, queue }
}

async fn scan_b1(ingest: &ScanIngestService, at: &str) -> scan_engine::domain::ScanOutcome {
    ingest
        .submit_scan(
            AttendeeId::from("A101"),
            ScanTarget::Booth(BoothId::from("B1")),
            DeviceId::from("dev-1"),
            Some(ts(at)),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_offline_round_trip_single_transition() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_online(false);
    let h = harness(queue_at(&dir), store);

    let outcome = scan_b1(&h.ingest, "2026-05-04T10:05:00Z").await;
    assert_eq!(outcome.status, ScanStatus::Expected);
    assert!(outcome.was_offline);
    assert_eq!(h.queue.len(), 1);

    // Re-scan inside the cooldown: cached outcome, nothing new queued
    let replay = scan_b1(&h.ingest, "2026-05-04T10:06:00Z").await;
    assert_eq!(replay.status, ScanStatus::Expected);
    assert!(replay.was_offline);
    assert_eq!(h.queue.len(), 1);

    // Still offline: the cycle fails and keeps the record
    let report = h.sync.run_cycle(Utc::now(), true).await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.queue.len(), 1);

    h.store.set_online(true);
    let report = h.sync.run_cycle(Utc::now(), true).await;
    assert_eq!(report.applied, 1);
    assert!(h.queue.is_empty());
    assert_eq!(h.store.transitions(), 1);
    assert!(h.store.is_attended(&AttendeeId::from("A101"), &SessionId::from("S1")));

    // Nothing left to replay
    let report = h.sync.run_cycle(Utc::now(), true).await;
    assert_eq!(report.attempted, 0);
    assert_eq!(h.store.transitions(), 1);
}

#[tokio::test]
async fn test_lost_acknowledgement_is_not_double_counted() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_online(false);
    let h = harness(queue_at(&dir), store);

    scan_b1(&h.ingest, "2026-05-04T10:05:00Z").await;
    let record = h.queue.drain().remove(0);

    // The store applied the commit but the reply never reached the device
    h.store.set_online(true);
    h.store.commit(&record.dedup_key, &record.mutation).await.unwrap();
    assert_eq!(h.store.transitions(), 1);

    let report = h.sync.run_cycle(Utc::now(), true).await;
    assert_eq!(report.already_applied, 1);
    assert!(h.queue.is_empty());
    assert_eq!(h.store.transitions(), 1);
}

#[tokio::test]
async fn test_pending_scans_survive_restart() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_online(false);

    {
        let h = harness(queue_at(&dir), store.clone());
        let outcome = scan_b1(&h.ingest, "2026-05-04T10:05:00Z").await;
        assert!(outcome.was_offline);
        let walk_in = h
            .ingest
            .submit_scan(
                AttendeeId::from("A104"),
                ScanTarget::Booth(BoothId::from("B3")),
                DeviceId::from("dev-2"),
                Some(ts("2026-05-04T13:10:00Z")),
            )
            .await
            .unwrap();
        assert_eq!(walk_in.status, ScanStatus::WalkIn);
        assert_eq!(h.ingest.pending_count(), 2);
    }

    // New process: same journal, store back online
    store.set_online(true);
    let h = harness(queue_at(&dir), store);
    assert_eq!(h.ingest.pending_count(), 2);

    let order: Vec<String> =
        h.queue.drain().iter().map(|r| r.scan.attendee_id.to_string()).collect();
    assert_eq!(order, vec!["A101", "A104"]);

    let report = h.sync.run_cycle(Utc::now(), true).await;
    assert_eq!(report.confirmed(), 2);
    assert!(h.queue.is_empty());
    assert_eq!(h.store.transitions(), 2);
    assert_eq!(h.store.walk_in_count(), 1);

    // The confirmed state is durable too
    drop(h);
    let reopened = OfflineScanQueue::open(QueueConfig {
        path: Some(dir.path().join("pending_scans.jsonl")),
        ..QueueConfig::default()
    })
    .unwrap();
    assert!(reopened.is_empty());
}

#[tokio::test]
async fn test_reconnect_signal_drains_running_manager() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.set_online(false);
    let h = harness(queue_at(&dir), store);

    scan_b1(&h.ingest, "2026-05-04T10:05:00Z").await;
    assert_eq!(h.ingest.pending_count(), 1);

    let Harness { ingest, sync, store, queue } = h;
    let sync = sync.with_interval(Duration::from_secs(3600));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(sync.run(shutdown_rx));

    store.set_online(true);
    ingest.trigger_sync();

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "queue was not drained after reconnect");
    assert_eq!(store.transitions(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
