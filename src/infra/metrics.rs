//! Lock-free metrics collection and periodic reporting
//!
//! Scan, commit and queue counters updated from the request path and the
//! sync manager. Periodic values are swapped out by `report()`.
//!
//! NOTE: Relaxed ordering throughout. These are statistical counters only;
//! never use them for coordination (queue depth comes from the queue itself).

use crate::domain::ScanStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Classification latency bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const CLASSIFY_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];

/// Store commit latency bucket boundaries (milliseconds)
/// Buckets: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000
const COMMIT_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

const NUM_BUCKETS: usize = 11;
const NUM_STATUSES: usize = 4;

#[inline]
fn bucket_index(bounds: &[u64; 10], value: u64) -> usize {
    bounds.partition_point(|&bound| bound < value)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
/// (overflow bucket reports 2x the last bound)
fn percentile_from_buckets(
    buckets: &[u64; NUM_BUCKETS],
    bounds: &[u64; 10],
    percentile: f64,
) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return bounds.get(i).copied().unwrap_or(bounds[9] * 2);
        }
    }
    bounds[9] * 2
}

#[inline]
fn status_index(status: ScanStatus) -> usize {
    match status {
        ScanStatus::Expected => 0,
        ScanStatus::WrongBooth => 1,
        ScanStatus::WalkIn => 2,
        ScanStatus::OutOfSchedule => 3,
    }
}

/// Statuses in the order used by `MetricsSummary::scans_by_status`
pub const METRICS_STATUSES: [ScanStatus; NUM_STATUSES] = [
    ScanStatus::Expected,
    ScanStatus::WrongBooth,
    ScanStatus::WalkIn,
    ScanStatus::OutOfSchedule,
];

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total scans classified (monotonic)
    scans_total: AtomicU64,
    /// Scans since last report (reset on report)
    scans_since_report: AtomicU64,
    /// Classified scans per status (monotonic)
    scans_by_status: [AtomicU64; NUM_STATUSES],
    /// Scans answered from the cooldown cache (monotonic)
    replays_total: AtomicU64,
    validation_errors_total: AtomicU64,
    config_errors_total: AtomicU64,
    /// Classification latency (reset on report)
    classify_sum_us: AtomicU64,
    classify_max_us: AtomicU64,
    classify_buckets: [AtomicU64; NUM_BUCKETS],
    /// Commit outcomes (monotonic)
    commits_applied_total: AtomicU64,
    commits_already_applied_total: AtomicU64,
    commits_failed_total: AtomicU64,
    commits_rejected_total: AtomicU64,
    /// Commit latency in ms (reset on report)
    commit_sum_ms: AtomicU64,
    commit_max_ms: AtomicU64,
    commit_buckets: [AtomicU64; NUM_BUCKETS],
    /// Offline queue (monotonic)
    offline_enqueued_total: AtomicU64,
    quota_rejections_total: AtomicU64,
    parked_total: AtomicU64,
    /// Sync loop (monotonic)
    sync_cycles_total: AtomicU64,
    sync_replayed_total: AtomicU64,
    /// Records awaiting retry (gauge)
    queue_depth: AtomicU64,
    /// Records parked for manual review (gauge)
    manual_review_depth: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_total: AtomicU64::new(0),
            scans_since_report: AtomicU64::new(0),
            scans_by_status: std::array::from_fn(|_| AtomicU64::new(0)),
            replays_total: AtomicU64::new(0),
            validation_errors_total: AtomicU64::new(0),
            config_errors_total: AtomicU64::new(0),
            classify_sum_us: AtomicU64::new(0),
            classify_max_us: AtomicU64::new(0),
            classify_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            commits_applied_total: AtomicU64::new(0),
            commits_already_applied_total: AtomicU64::new(0),
            commits_failed_total: AtomicU64::new(0),
            commits_rejected_total: AtomicU64::new(0),
            commit_sum_ms: AtomicU64::new(0),
            commit_max_ms: AtomicU64::new(0),
            commit_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            offline_enqueued_total: AtomicU64::new(0),
            quota_rejections_total: AtomicU64::new(0),
            parked_total: AtomicU64::new(0),
            sync_cycles_total: AtomicU64::new(0),
            sync_replayed_total: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            manual_review_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a classified scan with its latency (lock-free)
    #[inline]
    pub fn record_scan(&self, status: ScanStatus, replay: bool, latency_us: u64) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
        self.scans_since_report.fetch_add(1, Ordering::Relaxed);
        self.scans_by_status[status_index(status)].fetch_add(1, Ordering::Relaxed);
        if replay {
            self.replays_total.fetch_add(1, Ordering::Relaxed);
        }

        self.classify_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(&CLASSIFY_BOUNDS, latency_us);
        self.classify_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.classify_max_us, latency_us);
    }

    #[inline]
    pub fn record_validation_error(&self) {
        self.validation_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_config_error(&self) {
        self.config_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record commit round-trip latency, whatever the result
    #[inline]
    pub fn record_commit_latency(&self, latency_ms: u64) {
        self.commit_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        let bucket = bucket_index(&COMMIT_BOUNDS, latency_ms);
        self.commit_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.commit_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_commit_applied(&self) {
        self.commits_applied_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_commit_already_applied(&self) {
        self.commits_already_applied_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_commit_failed(&self) {
        self.commits_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_commit_rejected(&self) {
        self.commits_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_offline_enqueued(&self) {
        self.offline_enqueued_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_quota_rejection(&self) {
        self.quota_rejections_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_parked(&self) {
        self.parked_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished sync cycle and how many records it confirmed
    #[inline]
    pub fn record_sync_cycle(&self, replayed: u64) {
        self.sync_cycles_total.fetch_add(1, Ordering::Relaxed);
        self.sync_replayed_total.fetch_add(replayed, Ordering::Relaxed);
    }

    /// Set queue gauges (called after every queue mutation)
    #[inline]
    pub fn set_queue_depth(&self, pending: u64, manual_review: u64) {
        self.queue_depth.store(pending, Ordering::Relaxed);
        self.manual_review_depth.store(manual_review, Ordering::Relaxed);
    }

    #[inline]
    pub fn scans_total(&self) -> u64 {
        self.scans_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn manual_review_depth(&self) -> u64 {
        self.manual_review_depth.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn offline_enqueued_total(&self) -> u64 {
        self.offline_enqueued_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn quota_rejections_total(&self) -> u64 {
        self.quota_rejections_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn commits_failed_total(&self) -> u64 {
        self.commits_failed_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let scans_count = self.scans_since_report.swap(0, Ordering::Relaxed);
        let classify_sum = self.classify_sum_us.swap(0, Ordering::Relaxed);
        let classify_max = self.classify_max_us.swap(0, Ordering::Relaxed);
        let classify_buckets = swap_buckets(&self.classify_buckets);

        let commit_sum = self.commit_sum_ms.swap(0, Ordering::Relaxed);
        let commit_max = self.commit_max_ms.swap(0, Ordering::Relaxed);
        let commit_buckets = swap_buckets(&self.commit_buckets);
        let commit_count: u64 = commit_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let scans_per_sec = if elapsed.as_secs_f64() > 0.0 {
            scans_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let mut scans_by_status = [0u64; NUM_STATUSES];
        for (i, counter) in self.scans_by_status.iter().enumerate() {
            scans_by_status[i] = counter.load(Ordering::Relaxed);
        }

        MetricsSummary {
            scans_total: self.scans_total.load(Ordering::Relaxed),
            scans_per_sec,
            scans_by_status,
            replays_total: self.replays_total.load(Ordering::Relaxed),
            validation_errors_total: self.validation_errors_total.load(Ordering::Relaxed),
            config_errors_total: self.config_errors_total.load(Ordering::Relaxed),
            classify_avg_us: if scans_count > 0 { classify_sum / scans_count } else { 0 },
            classify_max_us: classify_max,
            classify_p99_us: percentile_from_buckets(&classify_buckets, &CLASSIFY_BOUNDS, 0.99),
            classify_buckets,
            commit_avg_ms: if commit_count > 0 { commit_sum / commit_count } else { 0 },
            commit_max_ms: commit_max,
            commit_p99_ms: percentile_from_buckets(&commit_buckets, &COMMIT_BOUNDS, 0.99),
            commit_buckets,
            commits_applied_total: self.commits_applied_total.load(Ordering::Relaxed),
            commits_already_applied_total: self
                .commits_already_applied_total
                .load(Ordering::Relaxed),
            commits_failed_total: self.commits_failed_total.load(Ordering::Relaxed),
            commits_rejected_total: self.commits_rejected_total.load(Ordering::Relaxed),
            offline_enqueued_total: self.offline_enqueued_total.load(Ordering::Relaxed),
            quota_rejections_total: self.quota_rejections_total.load(Ordering::Relaxed),
            parked_total: self.parked_total.load(Ordering::Relaxed),
            sync_cycles_total: self.sync_cycles_total.load(Ordering::Relaxed),
            sync_replayed_total: self.sync_replayed_total.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            manual_review_depth: self.manual_review_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_CLASSIFY_BOUNDS: [u64; 10] = CLASSIFY_BOUNDS;
pub const METRICS_COMMIT_BOUNDS: [u64; 10] = COMMIT_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub scans_total: u64,
    pub scans_per_sec: f64,
    /// Indexed like `METRICS_STATUSES`
    pub scans_by_status: [u64; NUM_STATUSES],
    pub replays_total: u64,
    pub validation_errors_total: u64,
    pub config_errors_total: u64,
    /// Classification latency histogram (µs)
    pub classify_buckets: [u64; NUM_BUCKETS],
    pub classify_avg_us: u64,
    pub classify_max_us: u64,
    pub classify_p99_us: u64,
    /// Commit latency histogram (ms)
    pub commit_buckets: [u64; NUM_BUCKETS],
    pub commit_avg_ms: u64,
    pub commit_max_ms: u64,
    pub commit_p99_ms: u64,
    pub commits_applied_total: u64,
    pub commits_already_applied_total: u64,
    pub commits_failed_total: u64,
    pub commits_rejected_total: u64,
    pub offline_enqueued_total: u64,
    pub quota_rejections_total: u64,
    pub parked_total: u64,
    pub sync_cycles_total: u64,
    pub sync_replayed_total: u64,
    pub queue_depth: u64,
    pub manual_review_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            scans_total = %self.scans_total,
            scans_per_sec = format!("{:.1}", self.scans_per_sec),
            expected = %self.scans_by_status[0],
            wrong_booth = %self.scans_by_status[1],
            walk_in = %self.scans_by_status[2],
            out_of_schedule = %self.scans_by_status[3],
            replays = %self.replays_total,
            classify_p99_us = %self.classify_p99_us,
            commit_p99_ms = %self.commit_p99_ms,
            commits_failed = %self.commits_failed_total,
            queue_depth = %self.queue_depth,
            manual_review = %self.manual_review_depth,
            "metrics"
        );
    }
}
