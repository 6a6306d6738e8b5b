//! Background replay of the offline queue
//!
//! Each cycle walks the queue in FIFO order and replays the mutation stored
//! with each record. A record that is still backing off stops the cycle so
//! later scans never overtake earlier ones; a transient failure stops it too,
//! since the rest would fail the same way. Records past `max_attempts` are
//! parked by the queue and no longer hold the line.

use crate::error::CommitError;
use crate::infra::metrics::Metrics;
use crate::io::offline_queue::{OfflineScanQueue, PendingScanRecord};
use crate::io::store::{AuthoritativeStore, CommitResponse};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Counts for one pass over the queue
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub applied: usize,
    pub already_applied: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Records that hit `max_attempts` during this cycle
    pub parked: usize,
    /// Records left untouched (backing off, or behind a failure)
    pub deferred: usize,
}

impl SyncReport {
    pub fn confirmed(&self) -> usize {
        self.applied + self.already_applied
    }
}

pub struct SyncManager {
    queue: Arc<OfflineScanQueue>,
    store: Arc<dyn AuthoritativeStore>,
    metrics: Arc<Metrics>,
    interval: Duration,
    commit_timeout: Duration,
    signal: Arc<Notify>,
}

impl SyncManager {
    pub fn new(
        queue: Arc<OfflineScanQueue>,
        store: Arc<dyn AuthoritativeStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue,
            store,
            metrics,
            interval: Duration::from_secs(10),
            commit_timeout: Duration::from_secs(3),
            signal: Arc::new(Notify::new()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Reconnect signal; a notification runs a cycle that ignores backoff
    pub fn with_signal(mut self, signal: Arc<Notify>) -> Self {
        self.signal = signal;
        self
    }

    /// Run until shutdown, draining on every tick and on every reconnect signal
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = %self.interval.as_secs(),
            pending = %self.queue.pending_count(),
            "sync_manager_started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(pending = %self.queue.pending_count(), "sync_manager_shutdown");
                        return;
                    }
                }
                _ = interval.tick() => {
                    self.run_cycle(Utc::now(), false).await;
                }
                _ = self.signal.notified() => {
                    info!("sync_reconnect_signal");
                    self.run_cycle(Utc::now(), true).await;
                }
            }
        }
    }

    /// One FIFO pass over the queue. `ignore_backoff` treats every unparked
    /// record as eligible (used on reconnect).
    pub async fn run_cycle(&self, now: DateTime<Utc>, ignore_backoff: bool) -> SyncReport {
        let records = self.queue.drain();
        let mut report = SyncReport::default();

        for (position, record) in records.iter().enumerate() {
            if !ignore_backoff && !record.is_eligible(now) {
                report.deferred = records.len() - position;
                break;
            }

            report.attempted += 1;
            let result = match tokio::time::timeout(
                self.commit_timeout,
                self.store.commit(&record.dedup_key, &record.mutation),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CommitError::Timeout),
            };

            match result {
                Ok(CommitResponse::Applied) => {
                    report.applied += 1;
                    self.metrics.record_commit_applied();
                    self.confirm(record);
                }
                Ok(CommitResponse::AlreadyApplied) => {
                    report.already_applied += 1;
                    self.metrics.record_commit_already_applied();
                    self.confirm(record);
                }
                Ok(CommitResponse::Rejected(reason)) => {
                    report.rejected += 1;
                    self.metrics.record_commit_rejected();
                    match self.queue.park(&record.dedup_key, &reason) {
                        Ok(_) => self.metrics.record_parked(),
                        Err(e) => {
                            error!(dedup_key = %record.dedup_key, error = %e, "offline_queue_write_failed")
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.record_commit_failed();
                    let updated = self.queue.record_failure(&record.dedup_key, &e.to_string(), now);
                    match updated {
                        Ok(updated) if updated.manual_review => {
                            // Parked: it no longer blocks the records behind it
                            report.parked += 1;
                            self.metrics.record_parked();
                        }
                        Ok(_) => {
                            report.deferred = records.len() - position - 1;
                            debug!(dedup_key = %record.dedup_key, error = %e, "sync_cycle_interrupted");
                            break;
                        }
                        Err(qe) => {
                            error!(dedup_key = %record.dedup_key, error = %qe, "offline_queue_write_failed");
                            report.deferred = records.len() - position - 1;
                            break;
                        }
                    }
                }
            }
        }

        let total = self.queue.len();
        let pending = self.queue.pending_count();
        let manual_review = total.saturating_sub(pending);
        self.metrics.set_queue_depth(pending as u64, manual_review as u64);
        self.metrics.record_sync_cycle(report.confirmed() as u64);

        if report.attempted > 0 {
            info!(
                attempted = %report.attempted,
                confirmed = %report.confirmed(),
                rejected = %report.rejected,
                failed = %report.failed,
                parked = %report.parked,
                pending = %pending,
                "sync_cycle_complete"
            );
        }
        if report.parked > 0 || report.rejected > 0 {
            warn!(manual_review = %manual_review, "sync_manual_review_backlog");
        }

        report
    }

    fn confirm(&self, record: &PendingScanRecord) {
        if let Err(e) = self.queue.remove(&record.dedup_key) {
            error!(dedup_key = %record.dedup_key, error = %e, "offline_queue_write_failed");
        }
        debug!(
            dedup_key = %record.dedup_key,
            attendee_id = %record.scan.attendee_id,
            attempts = %record.attempts,
            "pending_scan_confirmed"
        );
    }
}
