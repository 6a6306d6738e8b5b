//! Durable offline scan queue
//!
//! Scans whose authoritative commit failed are kept here until the sync
//! manager gets an acknowledgement for their dedup key. State lives in an
//! append-only JSONL journal (one operation per line) and is rebuilt by
//! replaying the journal on open, so pending scans survive restarts. The
//! journal is rewritten from the live records every `compact_after` operations.

use crate::domain::scan::{MutationRequest, Scan, ScanOutcome};
use crate::error::QueueError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default number of unconfirmed scans held before new ones are refused
pub const DEFAULT_CAPACITY: usize = 500;
/// Default attempts before a record is parked for manual review
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
/// Default dedup-key time bucket (1 minute)
pub const DEFAULT_DEDUP_BUCKET: Duration = Duration::from_secs(60);

/// Exponential backoff with jitter, capped at `max`
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), max: Duration::from_secs(300) }
    }
}

impl BackoffPolicy {
    /// Delay without jitter: base * 2^(attempts - 1), capped
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let factor = 1u64.checked_shl(attempts.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay with up to 25% random jitter, still capped at `max`
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let delay = self.base_delay(attempts);
        let jitter_ms = (delay.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 { rand::thread_rng().gen_range(0..=jitter_ms) } else { 0 };
        (delay + Duration::from_millis(jitter)).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Journal file; `None` keeps the queue in memory only
    pub path: Option<PathBuf>,
    pub capacity: usize,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub dedup_bucket: Duration,
    pub compact_after: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: None,
            capacity: DEFAULT_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            dedup_bucket: DEFAULT_DEDUP_BUCKET,
            compact_after: 1000,
        }
    }
}

/// A scan waiting for authoritative confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingScanRecord {
    pub scan: Scan,
    /// Outcome shown to the device at classification time
    pub outcome: ScanOutcome,
    /// Mutation computed at classification time; replayed as-is
    pub mutation: MutationRequest,
    pub dedup_key: String,
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Parked: no further automatic retries
    #[serde(default)]
    pub manual_review: bool,
    /// Insertion order, breaks timestamp ties
    pub seq: u64,
}

impl PendingScanRecord {
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.manual_review && now >= self.next_retry_at
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Enqueue { record: PendingScanRecord },
    Update { record: PendingScanRecord },
    Remove { dedup_key: String },
}

struct QueueState {
    records: FxHashMap<String, PendingScanRecord>,
    next_seq: u64,
    journal: Option<File>,
    ops_since_compact: usize,
}

pub struct OfflineScanQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl OfflineScanQueue {
    /// Open (or create) the journal and replay it
    pub fn open(config: QueueConfig) -> Result<Self, QueueError> {
        let mut records = FxHashMap::default();
        let mut next_seq = 0;

        if let Some(path) = &config.path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }
            if path.exists() {
                replay_journal(path, &mut records)?;
                next_seq = records.values().map(|r| r.seq + 1).max().unwrap_or(0);
            }
        }

        let queue = Self {
            state: Mutex::new(QueueState {
                records,
                next_seq,
                journal: None,
                ops_since_compact: 0,
            }),
            config,
        };

        {
            let mut state = queue.state.lock();
            if let Err(e) = queue.compact(&mut state) {
                // Replayed state is intact; the journal is reopened on first write
                warn!(error = %e, "offline_queue_compaction_failed");
            }
            info!(
                path = ?queue.config.path,
                pending = %state.records.len(),
                capacity = %queue.config.capacity,
                "offline_queue_opened"
            );
        }

        Ok(queue)
    }

    pub fn in_memory(mut config: QueueConfig) -> Self {
        config.path = None;
        Self {
            config,
            state: Mutex::new(QueueState {
                records: FxHashMap::default(),
                next_seq: 0,
                journal: None,
                ops_since_compact: 0,
            }),
        }
    }

    pub fn dedup_key_for(&self, scan: &Scan) -> String {
        scan.dedup_key(self.config.dedup_bucket)
    }

    /// Add a scan; an existing record with the same dedup key is returned instead.
    pub fn enqueue(
        &self,
        scan: &Scan,
        outcome: &ScanOutcome,
        mutation: &MutationRequest,
        now: DateTime<Utc>,
    ) -> Result<PendingScanRecord, QueueError> {
        let dedup_key = self.dedup_key_for(scan);
        let mut state = self.state.lock();

        if let Some(existing) = state.records.get(&dedup_key) {
            debug!(dedup_key = %dedup_key, scan_id = %scan.id, "offline_scan_deduplicated");
            return Ok(existing.clone());
        }

        if state.records.len() >= self.config.capacity {
            warn!(
                capacity = %self.config.capacity,
                attendee_id = %scan.attendee_id,
                "offline_queue_full"
            );
            return Err(QueueError::Quota { capacity: self.config.capacity });
        }

        let record = PendingScanRecord {
            scan: scan.clone(),
            outcome: outcome.clone(),
            mutation: mutation.clone(),
            dedup_key: dedup_key.clone(),
            attempts: 0,
            next_retry_at: now,
            last_error: None,
            manual_review: false,
            seq: state.next_seq,
        };

        self.append(&mut state, &JournalEntry::Enqueue { record: record.clone() })?;
        state.next_seq += 1;
        state.records.insert(dedup_key.clone(), record.clone());
        self.compact_if_due(&mut state);

        info!(
            dedup_key = %dedup_key,
            attendee_id = %scan.attendee_id,
            scan_target = %scan.target,
            pending = %state.records.len(),
            "offline_scan_enqueued"
        );
        Ok(record)
    }

    /// Records still under automatic retry, FIFO by client timestamp
    pub fn drain(&self) -> Vec<PendingScanRecord> {
        let state = self.state.lock();
        let mut records: Vec<_> =
            state.records.values().filter(|r| !r.manual_review).cloned().collect();
        sort_fifo(&mut records);
        records
    }

    /// Forget a record once the store acknowledged it
    pub fn remove(&self, dedup_key: &str) -> Result<bool, QueueError> {
        let mut state = self.state.lock();
        if !state.records.contains_key(dedup_key) {
            return Ok(false);
        }
        self.append(&mut state, &JournalEntry::Remove { dedup_key: dedup_key.to_string() })?;
        state.records.remove(dedup_key);
        self.compact_if_due(&mut state);
        debug!(dedup_key = %dedup_key, pending = %state.records.len(), "offline_scan_removed");
        Ok(true)
    }

    /// Count a failed attempt and schedule the next one; park the record once
    /// `max_attempts` is reached.
    pub fn record_failure(
        &self,
        dedup_key: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingScanRecord, QueueError> {
        let mut state = self.state.lock();
        let mut record = state
            .records
            .get(dedup_key)
            .cloned()
            .ok_or_else(|| QueueError::UnknownKey(dedup_key.to_string()))?;

        record.attempts += 1;
        record.last_error = Some(error.to_string());
        if record.attempts >= self.config.max_attempts {
            record.manual_review = true;
            warn!(
                dedup_key = %dedup_key,
                attempts = %record.attempts,
                error = %error,
                "pending_scan_parked"
            );
        } else {
            let delay = self.config.backoff.delay_for_attempt(record.attempts);
            record.next_retry_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
            debug!(
                dedup_key = %dedup_key,
                attempts = %record.attempts,
                retry_in_ms = %delay.as_millis(),
                "pending_scan_retry_scheduled"
            );
        }

        self.append(&mut state, &JournalEntry::Update { record: record.clone() })?;
        state.records.insert(dedup_key.to_string(), record.clone());
        self.compact_if_due(&mut state);
        Ok(record)
    }

    /// Move a record straight to manual review (store rejected it outright)
    pub fn park(&self, dedup_key: &str, reason: &str) -> Result<PendingScanRecord, QueueError> {
        let mut state = self.state.lock();
        let mut record = state
            .records
            .get(dedup_key)
            .cloned()
            .ok_or_else(|| QueueError::UnknownKey(dedup_key.to_string()))?;

        record.manual_review = true;
        record.last_error = Some(reason.to_string());
        self.append(&mut state, &JournalEntry::Update { record: record.clone() })?;
        state.records.insert(dedup_key.to_string(), record.clone());
        self.compact_if_due(&mut state);
        warn!(dedup_key = %dedup_key, reason = %reason, "pending_scan_parked");
        Ok(record)
    }

    /// Operator action: put a parked record back into the retry pool
    pub fn release_manual_review(
        &self,
        dedup_key: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingScanRecord, QueueError> {
        let mut state = self.state.lock();
        let mut record = state
            .records
            .get(dedup_key)
            .cloned()
            .ok_or_else(|| QueueError::UnknownKey(dedup_key.to_string()))?;

        record.manual_review = false;
        record.attempts = 0;
        record.next_retry_at = now;
        self.append(&mut state, &JournalEntry::Update { record: record.clone() })?;
        state.records.insert(dedup_key.to_string(), record.clone());
        self.compact_if_due(&mut state);
        info!(dedup_key = %dedup_key, "pending_scan_released");
        Ok(record)
    }

    /// Records awaiting automatic retry (parked ones excluded)
    pub fn pending_count(&self) -> usize {
        self.state.lock().records.values().filter(|r| !r.manual_review).count()
    }

    pub fn list_manual_review(&self) -> Vec<PendingScanRecord> {
        let state = self.state.lock();
        let mut records: Vec<_> =
            state.records.values().filter(|r| r.manual_review).cloned().collect();
        sort_fifo(&mut records);
        records
    }

    /// All held records, parked included; this is what capacity counts
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Write one operation to the journal. `Err` means the line did not reach
    /// the file and the caller must leave memory untouched; once it returns
    /// `Ok` the caller applies the operation to `state.records`.
    fn append(&self, state: &mut QueueState, entry: &JournalEntry) -> Result<(), QueueError> {
        let Some(path) = &self.config.path else {
            return Ok(());
        };
        let line = serde_json::to_string(entry)?;

        if state.journal.is_none() {
            state.journal = Some(OpenOptions::new().create(true).append(true).open(path)?);
        }
        let Some(journal) = state.journal.as_mut() else {
            return Ok(());
        };

        let written = writeln!(journal, "{}", line).and_then(|_| journal.flush());
        if let Err(e) = written {
            // A partial line would swallow the next entry; rewrite from memory
            if let Err(ce) = self.compact(state) {
                warn!(error = %ce, "offline_queue_compaction_failed");
            }
            return Err(e.into());
        }
        if let Err(e) = journal.sync_data() {
            warn!(error = %e, "offline_queue_sync_failed");
        }

        state.ops_since_compact += 1;
        Ok(())
    }

    /// Compact once enough operations piled up. Runs after `state.records`
    /// reflects the latest operation; failure keeps the long journal.
    fn compact_if_due(&self, state: &mut QueueState) {
        if self.config.path.is_none() || state.ops_since_compact < self.config.compact_after {
            return;
        }
        if let Err(e) = self.compact(state) {
            warn!(error = %e, ops = %state.ops_since_compact, "offline_queue_compaction_failed");
        }
    }

    /// Rewrite the journal as one `enqueue` line per live record
    fn compact(&self, state: &mut QueueState) -> Result<(), QueueError> {
        let Some(path) = &self.config.path else {
            return Ok(());
        };

        let tmp_path = path.with_extension("jsonl.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            let mut records: Vec<_> = state.records.values().collect();
            records.sort_by_key(|r| r.seq);
            for record in records {
                let entry = JournalEntry::Enqueue { record: record.clone() };
                writeln!(tmp, "{}", serde_json::to_string(&entry)?)?;
            }
            tmp.flush()?;
            tmp.sync_all()?;
        }
        // The old handle points at the replaced file after the rename
        state.journal = None;
        fs::rename(&tmp_path, path)?;

        state.journal = Some(OpenOptions::new().create(true).append(true).open(path)?);
        state.ops_since_compact = 0;
        debug!(path = %path.display(), records = %state.records.len(), "offline_queue_compacted");
        Ok(())
    }
}

fn sort_fifo(records: &mut [PendingScanRecord]) {
    records.sort_by(|a, b| {
        a.scan.client_timestamp.cmp(&b.scan.client_timestamp).then_with(|| a.seq.cmp(&b.seq))
    });
}

/// Rebuild records from the journal. A line that fails to parse (torn write
/// at crash time) is skipped.
fn replay_journal(
    path: &Path,
    records: &mut FxHashMap<String, PendingScanRecord>,
) -> Result<(), QueueError> {
    let reader = BufReader::new(File::open(path)?);
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(JournalEntry::Enqueue { record }) | Ok(JournalEntry::Update { record }) => {
                records.insert(record.dedup_key.clone(), record);
            }
            Ok(JournalEntry::Remove { dedup_key }) => {
                records.remove(&dedup_key);
            }
            Err(e) => {
                let line_no = line_no + 1;
                warn!(line = %line_no, error = %e, "offline_queue_journal_line_skipped");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scan::{ScanStatus, ScanTarget};
    use crate::domain::types::{AttendeeId, BoothId, DeviceId, SessionId};
    use tempfile::tempdir;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn scan(attendee: &str, at: &str) -> Scan {
        Scan::new(
            AttendeeId::from(attendee),
            ScanTarget::Booth(BoothId::from("B1")),
            DeviceId::from("dev-1"),
            ts(at),
        )
    }

    fn outcome(at: &str) -> ScanOutcome {
        ScanOutcome::new(ScanStatus::Expected, true, "Welcome", ts(at))
    }

    fn mutation(attendee: &str) -> MutationRequest {
        MutationRequest::MarkAttended {
            attendee_id: AttendeeId::from(attendee),
            session_id: SessionId::from("S1"),
            booth_id: Some(BoothId::from("B1")),
        }
    }

    fn enqueue(queue: &OfflineScanQueue, attendee: &str, at: &str) -> PendingScanRecord {
        queue.enqueue(&scan(attendee, at), &outcome(at), &mutation(attendee), ts(at)).unwrap()
    }

    #[test]
    fn test_enqueue_dedups_same_bucket() {
        let queue = OfflineScanQueue::in_memory(QueueConfig::default());
        let first = enqueue(&queue, "A101", "2026-05-04T10:05:10Z");
        let second = enqueue(&queue, "A101", "2026-05-04T10:05:40Z");

        assert_eq!(first.dedup_key, second.dedup_key);
        assert_eq!(second.scan.id, first.scan.id);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_is_fifo_by_client_timestamp() {
        let queue = OfflineScanQueue::in_memory(QueueConfig::default());
        enqueue(&queue, "A103", "2026-05-04T10:09:00Z");
        enqueue(&queue, "A101", "2026-05-04T10:05:00Z");
        enqueue(&queue, "A102", "2026-05-04T10:07:00Z");

        let order: Vec<_> =
            queue.drain().into_iter().map(|r| r.scan.attendee_id.to_string()).collect();
        assert_eq!(order, vec!["A101", "A102", "A103"]);
    }

    #[test]
    fn test_capacity_rejects_with_quota_error() {
        let config = QueueConfig { capacity: 2, ..Default::default() };
        let queue = OfflineScanQueue::in_memory(config);
        enqueue(&queue, "A1", "2026-05-04T10:05:00Z");
        enqueue(&queue, "A2", "2026-05-04T10:05:00Z");

        let err = queue
            .enqueue(
                &scan("A3", "2026-05-04T10:05:00Z"),
                &outcome("2026-05-04T10:05:00Z"),
                &mutation("A3"),
                ts("2026-05-04T10:05:00Z"),
            )
            .unwrap_err();
        assert!(matches!(err, QueueError::Quota { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_record_failure_backs_off_then_parks() {
        let config = QueueConfig { max_attempts: 3, ..Default::default() };
        let queue = OfflineScanQueue::in_memory(config);
        let record = enqueue(&queue, "A101", "2026-05-04T10:05:00Z");
        let now = ts("2026-05-04T10:05:00Z");

        let failed = queue.record_failure(&record.dedup_key, "timeout", now).unwrap();
        assert_eq!(failed.attempts, 1);
        assert!(failed.next_retry_at > now);
        assert!(!failed.is_eligible(now));
        assert_eq!(failed.last_error.as_deref(), Some("timeout"));

        queue.record_failure(&record.dedup_key, "timeout", now).unwrap();
        let parked = queue.record_failure(&record.dedup_key, "timeout", now).unwrap();
        assert!(parked.manual_review);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.list_manual_review().len(), 1);
        assert!(queue.drain().is_empty());
        // parked records still count against capacity
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_release_manual_review() {
        let queue = OfflineScanQueue::in_memory(QueueConfig::default());
        let record = enqueue(&queue, "A101", "2026-05-04T10:05:00Z");
        queue.park(&record.dedup_key, "rejected: session closed").unwrap();
        assert_eq!(queue.pending_count(), 0);

        let now = ts("2026-05-04T12:00:00Z");
        let released = queue.release_manual_review(&record.dedup_key, now).unwrap();
        assert_eq!(released.attempts, 0);
        assert!(released.is_eligible(now));
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_unknown_key() {
        let queue = OfflineScanQueue::in_memory(QueueConfig::default());
        let err = queue.record_failure("missing", "x", Utc::now()).unwrap_err();
        assert!(matches!(err, QueueError::UnknownKey(_)));
        assert!(!queue.remove("missing").unwrap());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy { base: Duration::from_secs(1), max: Duration::from_secs(30) };
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(4), Duration::from_secs(8));
        assert_eq!(policy.base_delay(10), Duration::from_secs(30));
        assert_eq!(policy.base_delay(200), Duration::from_secs(30));

        for attempts in 1..8 {
            let delay = policy.delay_for_attempt(attempts);
            let base = policy.base_delay(attempts);
            assert!(delay >= base);
            assert!(delay <= base + base / 4);
            assert!(delay <= policy.max);
        }
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = QueueConfig {
            path: Some(dir.path().join("queue").join("pending.jsonl")),
            ..Default::default()
        };

        let kept_key;
        {
            let queue = OfflineScanQueue::open(config.clone()).unwrap();
            let kept = enqueue(&queue, "A101", "2026-05-04T10:05:00Z");
            let gone = enqueue(&queue, "A102", "2026-05-04T10:06:00Z");
            queue.record_failure(&kept.dedup_key, "network", ts("2026-05-04T10:05:00Z")).unwrap();
            queue.remove(&gone.dedup_key).unwrap();
            kept_key = kept.dedup_key;
        }

        let reopened = OfflineScanQueue::open(config).unwrap();
        assert_eq!(reopened.len(), 1);
        let records = reopened.drain();
        assert_eq!(records[0].dedup_key, kept_key);
        assert_eq!(records[0].attempts, 1);

        // new records keep a fresh sequence number
        let next = enqueue(&reopened, "A103", "2026-05-04T10:07:00Z");
        assert!(next.seq > records[0].seq);
    }

    #[test]
    fn test_torn_journal_line_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.jsonl");
        let config = QueueConfig { path: Some(path.clone()), ..Default::default() };

        {
            let queue = OfflineScanQueue::open(config.clone()).unwrap();
            enqueue(&queue, "A101", "2026-05-04T10:05:00Z");
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"op\":\"enqueue\",\"rec").unwrap();
        drop(file);

        let reopened = OfflineScanQueue::open(config).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_compaction_keeps_live_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.jsonl");
        let config = QueueConfig { path: Some(path.clone()), compact_after: 3, ..Default::default() };

        let queue = OfflineScanQueue::open(config.clone()).unwrap();
        let a = enqueue(&queue, "A1", "2026-05-04T10:05:00Z");
        enqueue(&queue, "A2", "2026-05-04T10:06:00Z");
        queue.remove(&a.dedup_key).unwrap();
        enqueue(&queue, "A3", "2026-05-04T10:07:00Z");

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.lines().count() <= 3);
        drop(queue);

        let reopened = OfflineScanQueue::open(config).unwrap();
        let order: Vec<_> =
            reopened.drain().into_iter().map(|r| r.scan.attendee_id.to_string()).collect();
        assert_eq!(order, vec!["A2", "A3"]);
    }

    #[test]
    fn test_compaction_after_every_write_reflects_latest_operation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.jsonl");
        let config = QueueConfig { path: Some(path), compact_after: 1, ..Default::default() };

        let a1 = {
            let queue = OfflineScanQueue::open(config.clone()).unwrap();
            enqueue(&queue, "A1", "2026-05-04T10:05:00Z")
        };
        let queue = OfflineScanQueue::open(config.clone()).unwrap();
        assert_eq!(queue.len(), 1);

        let a2 = enqueue(&queue, "A2", "2026-05-04T10:06:00Z");
        queue.remove(&a1.dedup_key).unwrap();
        queue.record_failure(&a2.dedup_key, "network", ts("2026-05-04T10:06:00Z")).unwrap();
        drop(queue);

        let reopened = OfflineScanQueue::open(config).unwrap();
        let records = reopened.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dedup_key, a2.dedup_key);
        assert_eq!(records[0].attempts, 1);
    }

    #[test]
    fn test_failed_compaction_keeps_written_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.jsonl");
        // The compaction temp file cannot be created over a directory
        fs::create_dir(path.with_extension("jsonl.tmp")).unwrap();
        let config = QueueConfig { path: Some(path), compact_after: 1, ..Default::default() };

        let queue = OfflineScanQueue::open(config.clone()).unwrap();
        let a1 = enqueue(&queue, "A1", "2026-05-04T10:05:00Z");
        enqueue(&queue, "A2", "2026-05-04T10:06:00Z");
        assert!(queue.remove(&a1.dedup_key).unwrap());
        assert_eq!(queue.len(), 1);
        drop(queue);

        let reopened = OfflineScanQueue::open(config).unwrap();
        let order: Vec<_> =
            reopened.drain().into_iter().map(|r| r.scan.attendee_id.to_string()).collect();
        assert_eq!(order, vec!["A2"]);
    }
}
