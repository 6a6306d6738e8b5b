//! Scan ingestion: classify, commit, fall back to the offline queue
//!
//! The caller always gets the classification immediately. Persistence is
//! attempted once with a bounded timeout; anything transient moves the scan
//! into the offline queue for the sync manager, and the outcome is returned
//! with `was_offline = true`.

use crate::domain::scan::{MutationRequest, Scan, ScanOutcome, ScanTarget};
use crate::domain::snapshot::{Directory, EventSnapshot};
use crate::domain::types::{AttendeeId, BoothId, DeviceId, RegistrationStatus};
use crate::error::{CommitError, QueueError, ScanError};
use crate::infra::metrics::Metrics;
use crate::io::offline_queue::{OfflineScanQueue, PendingScanRecord};
use crate::io::store::{AuthoritativeStore, CommitResponse};
use crate::services::classifier::{ScanClassifier, DEFAULT_COOLDOWN};
use crate::services::registration_index::{MarkResult, RegistrationIndex};
use crate::services::session_resolver::SessionConfigResolver;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Default bound on the synchronous commit attempt
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Directory and registrations are swapped together on refresh
struct EventState {
    directory: Directory,
    index: RegistrationIndex,
}

/// Undo information for a local `Marked`
#[derive(Debug, Clone, Copy)]
struct LocalMark {
    previous: Option<RegistrationStatus>,
}

pub struct ScanIngestService {
    state: RwLock<EventState>,
    classifier: Mutex<ScanClassifier>,
    queue: Arc<OfflineScanQueue>,
    store: Arc<dyn AuthoritativeStore>,
    metrics: Arc<Metrics>,
    commit_timeout: Duration,
    sync_signal: Arc<Notify>,
}

impl ScanIngestService {
    pub fn new(
        snapshot: EventSnapshot,
        queue: Arc<OfflineScanQueue>,
        store: Arc<dyn AuthoritativeStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let directory = Directory::from_snapshot(&snapshot);
        let index = RegistrationIndex::from_registrations(snapshot.registrations);
        Self {
            state: RwLock::new(EventState { directory, index }),
            classifier: Mutex::new(ScanClassifier::new(DEFAULT_COOLDOWN)),
            queue,
            store,
            metrics,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            sync_signal: Arc::new(Notify::new()),
        }
    }

    pub fn with_cooldown(self, cooldown: Duration) -> Self {
        *self.classifier.lock() = ScanClassifier::new(cooldown);
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Share a reconnect signal with the sync manager
    pub fn with_sync_signal(mut self, signal: Arc<Notify>) -> Self {
        self.sync_signal = signal;
        self
    }

    pub fn sync_signal(&self) -> Arc<Notify> {
        self.sync_signal.clone()
    }

    pub fn queue(&self) -> &Arc<OfflineScanQueue> {
        &self.queue
    }

    /// Classify a badge read and try to persist what it asks for.
    ///
    /// `client_timestamp` defaults to now. Only classification failures
    /// (unknown ids, broken session config) are errors; persistence trouble is
    /// reported through `was_offline` and `persistence_warning`.
    pub async fn submit_scan(
        &self,
        attendee_id: AttendeeId,
        target: ScanTarget,
        device_id: DeviceId,
        client_timestamp: Option<DateTime<Utc>>,
    ) -> Result<ScanOutcome, ScanError> {
        let scan =
            Scan::new(attendee_id, target, device_id, client_timestamp.unwrap_or_else(Utc::now));

        let start = Instant::now();
        let classified = {
            let state = self.state.read();
            self.classifier.lock().classify(&scan, &state.directory, &state.index)
        };
        let classification = match classified {
            Ok(c) => c,
            Err(e) => {
                match &e {
                    ScanError::Validation(_) => self.metrics.record_validation_error(),
                    ScanError::Config { .. } => {
                        self.metrics.record_config_error();
                        error!(scan_target = %scan.target, error = %e, "session_config_invalid");
                    }
                }
                info!(
                    attendee_id = %scan.attendee_id,
                    scan_target = %scan.target,
                    device_id = %scan.device_id,
                    error = %e,
                    "scan_rejected"
                );
                return Err(e);
            }
        };
        self.metrics.record_scan(
            classification.outcome.status,
            classification.replay,
            start.elapsed().as_micros() as u64,
        );

        let Some(mutation) = classification.mutation else {
            return Ok(classification.outcome);
        };

        let local = self.apply_locally(&mutation);

        let outcome = self.persist(&scan, classification.outcome, &mutation, local).await;
        self.classifier.lock().remember(&scan, &outcome);

        info!(
            scan_id = %scan.id,
            attendee_id = %scan.attendee_id,
            scan_target = %scan.target,
            device_id = %scan.device_id,
            status = %outcome.status.as_str(),
            was_offline = %outcome.was_offline,
            "scan_recorded"
        );
        Ok(outcome)
    }

    /// Optimistic update of the local cache; the store re-validates on commit
    fn apply_locally(&self, mutation: &MutationRequest) -> Option<LocalMark> {
        let mut state = self.state.write();
        let previous = state
            .index
            .find_registration(mutation.attendee_id(), mutation.session_id())
            .map(|r| r.status);
        if state.index.apply(mutation) != MarkResult::Marked {
            return None;
        }
        let mark = LocalMark { previous };

        let Some(session) = state.directory.session(mutation.session_id()) else {
            return Some(mark);
        };
        let config = SessionConfigResolver::effective_config(session);
        if let (true, Some(max)) = (config.has_capacity, config.max_capacity) {
            let attended = state.index.attended_count(&session.id);
            if attended >= max as usize {
                warn!(
                    session_id = %session.id,
                    attended = %attended,
                    max_capacity = %max,
                    "session_capacity_reached"
                );
            }
        }
        Some(mark)
    }

    async fn persist(
        &self,
        scan: &Scan,
        mut outcome: ScanOutcome,
        mutation: &MutationRequest,
        local: Option<LocalMark>,
    ) -> ScanOutcome {
        let dedup_key = self.queue.dedup_key_for(scan);
        let started = Instant::now();
        let result =
            match tokio::time::timeout(self.commit_timeout, self.store.commit(&dedup_key, mutation))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(CommitError::Timeout),
            };
        self.metrics.record_commit_latency(started.elapsed().as_millis() as u64);

        match result {
            Ok(CommitResponse::Applied) => {
                self.metrics.record_commit_applied();
                debug!(dedup_key = %dedup_key, kind = %mutation.kind(), "scan_committed");
            }
            Ok(CommitResponse::AlreadyApplied) => {
                // Another device got there first; same outcome for the user
                self.metrics.record_commit_already_applied();
                debug!(dedup_key = %dedup_key, kind = %mutation.kind(), "scan_already_applied");
            }
            Ok(CommitResponse::Rejected(reason)) => {
                self.metrics.record_commit_rejected();
                warn!(dedup_key = %dedup_key, reason = %reason, "scan_commit_rejected");
                // The store is authoritative; drop the optimistic mark
                if let Some(mark) = local {
                    self.state.write().index.revert(mutation, mark.previous);
                }
                let parked = self
                    .queue
                    .enqueue(scan, &outcome, mutation, scan.client_timestamp)
                    .and_then(|record| self.queue.park(&record.dedup_key, &reason));
                match parked {
                    Ok(_) => {
                        self.metrics.record_parked();
                        outcome.persistence_warning =
                            Some(format!("rejected by store ({}), held for review", reason));
                    }
                    Err(e) => outcome.persistence_warning = Some(self.queue_failure(&e)),
                }
            }
            Err(e) => {
                self.metrics.record_commit_failed();
                warn!(dedup_key = %dedup_key, error = %e, "scan_commit_failed");
                outcome.was_offline = true;
                match self.queue.enqueue(scan, &outcome, mutation, Utc::now()) {
                    Ok(_) => self.metrics.record_offline_enqueued(),
                    Err(e) => outcome.persistence_warning = Some(self.queue_failure(&e)),
                }
            }
        }

        self.update_queue_gauges();
        outcome
    }

    fn queue_failure(&self, e: &QueueError) -> String {
        match e {
            QueueError::Quota { capacity } => {
                self.metrics.record_quota_rejection();
                warn!(capacity = %capacity, "offline_queue_quota_exceeded");
                format!("offline queue full ({} pending), scan not saved", capacity)
            }
            other => {
                error!(error = %other, "offline_queue_write_failed");
                format!("scan not saved: {}", other)
            }
        }
    }

    fn update_queue_gauges(&self) {
        let total = self.queue.len();
        let pending = self.queue.pending_count();
        self.metrics.set_queue_depth(pending as u64, total.saturating_sub(pending) as u64);
    }

    /// Swap in a new snapshot of event data
    pub fn refresh_snapshot(&self, snapshot: EventSnapshot) {
        let directory = Directory::from_snapshot(&snapshot);
        let mut state = self.state.write();
        state.index.refresh(snapshot.registrations);
        state.directory = directory;
        info!(
            attendees = %state.directory.attendee_count(),
            sessions = %state.directory.session_count(),
            registrations = %state.index.len(),
            "snapshot_refreshed"
        );
    }

    pub fn reload_snapshot(&self, path: &str) -> anyhow::Result<()> {
        let snapshot = EventSnapshot::from_file(path)?;
        self.refresh_snapshot(snapshot);
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    pub fn list_manual_review(&self) -> Vec<PendingScanRecord> {
        self.queue.list_manual_review()
    }

    /// Return a parked record to the retry pool and wake the sync manager
    pub fn release_manual_review(&self, dedup_key: &str) -> Result<PendingScanRecord, QueueError> {
        let record = self.queue.release_manual_review(dedup_key, Utc::now())?;
        self.update_queue_gauges();
        self.trigger_sync();
        Ok(record)
    }

    /// Ask the sync manager to drain now (reconnect signal)
    pub fn trigger_sync(&self) {
        self.sync_signal.notify_one();
    }

    pub fn occupancy(&self, booth: &BoothId) -> u64 {
        self.state.read().index.occupancy(booth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scan::ScanStatus;
    use crate::domain::types::{
        Attendee, Booth, BoothRestriction, RegistrationId, RegistrationStatus, Session,
        SessionConfig, SessionId, SessionRegistration,
    };
    use crate::error::ValidationError;
    use crate::io::offline_queue::QueueConfig;
    use crate::io::store::InMemoryStore;
    use async_trait::async_trait;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn snapshot() -> EventSnapshot {
        let mut config = SessionConfig::open_attendance();
        config.booth_restriction = BoothRestriction::Assigned;
        config.booth_ids = [BoothId::from("B1"), BoothId::from("B2")].into_iter().collect();
        config.allows_walk_ins = true;

        EventSnapshot {
            attendees: ["A101", "A102", "A103"]
                .iter()
                .map(|id| Attendee {
                    id: AttendeeId::from(*id),
                    name: format!("Guest {}", id),
                    organization: None,
                })
                .collect(),
            booths: ["B1", "B2"]
                .iter()
                .map(|id| Booth {
                    id: BoothId::from(*id),
                    physical_id: id.to_string(),
                    company_name: format!("{} Corp", id),
                    capacity: None,
                })
                .collect(),
            sessions: vec![Session {
                id: SessionId::from("S1"),
                name: "Morning meetings".to_string(),
                start_time: ts("2026-05-04T10:00:00Z"),
                end_time: ts("2026-05-04T10:30:00Z"),
                config: Some(config),
                session_type: None,
            }],
            registrations: vec![SessionRegistration {
                id: RegistrationId::from("R1"),
                session_id: SessionId::from("S1"),
                attendee_id: AttendeeId::from("A101"),
                expected_booth_id: Some(BoothId::from("B1")),
                status: RegistrationStatus::Registered,
            }],
        }
    }

    fn service_with(store: Arc<dyn AuthoritativeStore>, queue: QueueConfig) -> ScanIngestService {
        ScanIngestService::new(
            snapshot(),
            Arc::new(OfflineScanQueue::in_memory(queue)),
            store,
            Arc::new(Metrics::new()),
        )
    }

    async fn scan_at(
        service: &ScanIngestService,
        attendee: &str,
        booth: &str,
        at: &str,
    ) -> Result<ScanOutcome, ScanError> {
        service
            .submit_scan(
                AttendeeId::from(attendee),
                ScanTarget::Booth(BoothId::from(booth)),
                DeviceId::from("dev-1"),
                Some(ts(at)),
            )
            .await
    }

    struct SlowStore;

    #[async_trait]
    impl AuthoritativeStore for SlowStore {
        async fn commit(
            &self,
            _dedup_key: &str,
            _mutation: &MutationRequest,
        ) -> Result<CommitResponse, CommitError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(CommitResponse::Applied)
        }
    }

    #[tokio::test]
    async fn test_online_commit() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone(), QueueConfig::default());

        let outcome = scan_at(&service, "A101", "B1", "2026-05-04T10:05:00Z").await.unwrap();
        assert_eq!(outcome.status, ScanStatus::Expected);
        assert!(!outcome.was_offline);
        assert_eq!(store.transitions(), 1);
        assert!(service.queue().is_empty());
        assert_eq!(service.occupancy(&BoothId::from("B1")), 1);
    }

    #[tokio::test]
    async fn test_offline_enqueues_once_and_replays_cached_outcome() {
        let store = Arc::new(InMemoryStore::new());
        store.set_online(false);
        let service = service_with(store.clone(), QueueConfig::default());

        let first = scan_at(&service, "A101", "B1", "2026-05-04T10:05:00Z").await.unwrap();
        assert!(first.was_offline);
        assert_eq!(service.pending_count(), 1);

        let again = scan_at(&service, "A101", "B1", "2026-05-04T10:06:00Z").await.unwrap();
        assert_eq!(again, first);
        assert_eq!(service.pending_count(), 1);
        // the replay never reached the store
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_timeout_goes_offline() {
        let service = service_with(Arc::new(SlowStore), QueueConfig::default())
            .with_commit_timeout(Duration::from_millis(50));

        let outcome = scan_at(&service, "A101", "B1", "2026-05-04T10:05:00Z").await.unwrap();
        assert_eq!(outcome.status, ScanStatus::Expected);
        assert!(outcome.was_offline);
        assert_eq!(service.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_validation_error_is_not_queued() {
        let store = Arc::new(InMemoryStore::new());
        store.set_online(false);
        let service = service_with(store, QueueConfig::default());

        let err = scan_at(&service, "X999", "B1", "2026-05-04T10:05:00Z").await.unwrap_err();
        assert_eq!(err, ScanError::Validation(ValidationError::UnknownAttendee("X999".to_string())));
        assert!(service.queue().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_booth_makes_no_commit() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone(), QueueConfig::default());

        let outcome = scan_at(&service, "A101", "B2", "2026-05-04T10:05:00Z").await.unwrap();
        assert_eq!(outcome.status, ScanStatus::WrongBooth);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_quota_surfaces_warning_but_still_classifies() {
        let store = Arc::new(InMemoryStore::new());
        store.set_online(false);
        let config = QueueConfig { capacity: 1, ..Default::default() };
        let service = service_with(store, config);

        let first = scan_at(&service, "A101", "B1", "2026-05-04T10:05:00Z").await.unwrap();
        assert!(first.persistence_warning.is_none());

        let second = scan_at(&service, "A102", "B2", "2026-05-04T10:06:00Z").await.unwrap();
        assert_eq!(second.status, ScanStatus::WalkIn);
        assert!(second.was_offline);
        assert!(second.persistence_warning.unwrap().contains("offline queue full"));
        assert_eq!(service.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_parked_for_review() {
        let store = Arc::new(InMemoryStore::new());
        store.close_session(SessionId::from("S1"));
        let service = service_with(store, QueueConfig::default());

        let outcome = scan_at(&service, "A101", "B1", "2026-05-04T10:05:00Z").await.unwrap();
        assert_eq!(outcome.status, ScanStatus::Expected);
        assert!(!outcome.was_offline);
        assert!(outcome.persistence_warning.is_some());
        assert_eq!(service.pending_count(), 0);
        assert_eq!(service.list_manual_review().len(), 1);

        let key = service.list_manual_review()[0].dedup_key.clone();
        service.release_manual_review(&key).unwrap();
        assert_eq!(service.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_rejection_reverts_local_attendance() {
        let store = Arc::new(InMemoryStore::new());
        store.close_session(SessionId::from("S1"));
        let service = service_with(store.clone(), QueueConfig::default());

        scan_at(&service, "A101", "B1", "2026-05-04T10:05:00Z").await.unwrap();
        assert_eq!(service.occupancy(&BoothId::from("B1")), 0);

        // Walk-in created locally is dropped as well
        scan_at(&service, "A103", "B2", "2026-05-04T10:05:00Z").await.unwrap();
        assert_eq!(service.occupancy(&BoothId::from("B2")), 0);
        assert_eq!(store.transitions(), 0);
    }

    #[tokio::test]
    async fn test_refresh_snapshot_replaces_registrations() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store, QueueConfig::default());

        let mut updated = snapshot();
        updated.registrations[0].attendee_id = AttendeeId::from("A103");
        service.refresh_snapshot(updated);

        let outcome = scan_at(&service, "A103", "B1", "2026-05-04T10:05:00Z").await.unwrap();
        assert_eq!(outcome.status, ScanStatus::Expected);
        let outcome = scan_at(&service, "A101", "B1", "2026-05-04T10:05:00Z").await.unwrap();
        assert_eq!(outcome.status, ScanStatus::WalkIn);
    }
}
