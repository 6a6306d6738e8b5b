//! Scan classification
//!
//! `classify_scan` is a pure decision over (scan, directory, registrations,
//! now). `ScanClassifier` wraps it with the cooldown guard: a repeat of a
//! successful (attendee, target, device) read inside the cooldown window gets
//! the earlier outcome back and requests no mutation.

use crate::domain::scan::{MutationRequest, Scan, ScanOutcome, ScanStatus, ScanTarget};
use crate::domain::snapshot::Directory;
use crate::domain::types::{AttendeeId, BoothRestriction, DeviceId};
use crate::error::{ScanError, ValidationError};
use crate::services::registration_index::RegistrationIndex;
use crate::services::session_resolver::SessionConfigResolver;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::time::Duration;
use tracing::debug;

/// Default replay window for identical reads (5 minutes)
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Classified scan plus the side effect it asks for
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub outcome: ScanOutcome,
    pub mutation: Option<MutationRequest>,
    /// Served from the cooldown cache
    pub replay: bool,
}

impl Classification {
    fn new(outcome: ScanOutcome, mutation: Option<MutationRequest>) -> Self {
        Self { outcome, mutation, replay: false }
    }
}

/// Classify one scan. No I/O; identical inputs give identical results.
pub fn classify_scan(
    scan: &Scan,
    directory: &Directory,
    index: &RegistrationIndex,
    resolver: &SessionConfigResolver,
    now: DateTime<Utc>,
) -> Result<Classification, ScanError> {
    if scan.device_id.as_str().is_empty() {
        return Err(ValidationError::EmptyDeviceId.into());
    }
    let Some(attendee_name) = directory.attendee_name(&scan.attendee_id) else {
        return Err(ValidationError::UnknownAttendee(scan.attendee_id.to_string()).into());
    };

    let Some(active) = resolver.resolve(directory, &scan.target, now)? else {
        let mut outcome = ScanOutcome::out_of_schedule(now);
        outcome.attendee_name = Some(attendee_name.to_string());
        return Ok(Classification::new(outcome, None));
    };

    let session = active.session;
    let config = &active.config;
    let registration = index.find_registration(&scan.attendee_id, &session.id);

    let base = |status: ScanStatus, success: bool, message: String| {
        let mut outcome = ScanOutcome::new(status, success, message, now);
        outcome.attendee_name = Some(attendee_name.to_string());
        outcome.session_id = Some(session.id.clone());
        outcome.session_name = Some(session.name.clone());
        outcome
    };

    let booth = match &scan.target {
        ScanTarget::Booth(booth_id) => Some(booth_id),
        ScanTarget::Session(_) => None,
    };

    let classification = match registration {
        Some(registration) => {
            let wrong_booth = match (booth, &registration.expected_booth_id) {
                (Some(at), Some(expected)) => {
                    config.booth_restriction == BoothRestriction::Assigned && at != expected
                }
                _ => false,
            };

            if wrong_booth {
                let expected = registration.expected_booth_id.clone();
                let expected_name = expected.as_ref().map(|b| directory.booth_name(b));
                let mut outcome = base(
                    ScanStatus::WrongBooth,
                    false,
                    format!(
                        "{} is expected at booth {}",
                        attendee_name,
                        expected_name.as_deref().unwrap_or("?")
                    ),
                );
                outcome.expected_booth_id = expected;
                outcome.expected_booth_name = expected_name;
                Classification::new(outcome, None)
            } else {
                let mut outcome = base(
                    ScanStatus::Expected,
                    true,
                    format!("Welcome {}", attendee_name),
                );
                outcome.expected_booth_id = registration.expected_booth_id.clone();
                outcome.expected_booth_name =
                    registration.expected_booth_id.as_ref().map(|b| directory.booth_name(b));
                let mutation = MutationRequest::MarkAttended {
                    attendee_id: scan.attendee_id.clone(),
                    session_id: session.id.clone(),
                    booth_id: booth.cloned(),
                };
                Classification::new(outcome, Some(mutation))
            }
        }
        None if config.allows_walk_ins => {
            let outcome = base(
                ScanStatus::WalkIn,
                true,
                format!("Walk-in accepted for {}", attendee_name),
            );
            let mutation = MutationRequest::RecordWalkIn {
                attendee_id: scan.attendee_id.clone(),
                session_id: session.id.clone(),
                booth_id: booth.cloned(),
            };
            Classification::new(outcome, Some(mutation))
        }
        None => {
            let outcome = base(
                ScanStatus::OutOfSchedule,
                false,
                format!("{} is not expected in {} and walk-ins are disabled", attendee_name, session.name),
            );
            Classification::new(outcome, None)
        }
    };

    debug!(
        attendee_id = %scan.attendee_id,
        scan_target = %scan.target,
        session_id = %session.id,
        status = %classification.outcome.status.as_str(),
        "scan_classified"
    );

    Ok(classification)
}

type CooldownKey = (AttendeeId, ScanTarget, DeviceId);

/// |delta| < window; replays may carry an earlier timestamp than the cached read
fn within(delta: chrono::Duration, window: chrono::Duration) -> bool {
    delta < window && -delta < window
}

#[derive(Debug, Clone)]
struct RecentScan {
    at: DateTime<Utc>,
    outcome: ScanOutcome,
}

/// Classifier with the duplicate-read guard
pub struct ScanClassifier {
    resolver: SessionConfigResolver,
    cooldown: chrono::Duration,
    recent: FxHashMap<CooldownKey, RecentScan>,
}

impl ScanClassifier {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            resolver: SessionConfigResolver::new(),
            cooldown: chrono::Duration::milliseconds(cooldown.as_millis() as i64),
            recent: FxHashMap::default(),
        }
    }

    /// Classify at the scan's own timestamp, consulting the cooldown cache first
    pub fn classify(
        &mut self,
        scan: &Scan,
        directory: &Directory,
        index: &RegistrationIndex,
    ) -> Result<Classification, ScanError> {
        let now = scan.client_timestamp;
        self.prune(now);

        let key = Self::key(scan);
        if let Some(recent) = self.recent.get(&key) {
            if within(now - recent.at, self.cooldown) {
                debug!(
                    attendee_id = %scan.attendee_id,
                    scan_target = %scan.target,
                    device_id = %scan.device_id,
                    "scan_cooldown_replay"
                );
                return Ok(Classification {
                    outcome: recent.outcome.clone(),
                    mutation: None,
                    replay: true,
                });
            }
        }

        let classification = classify_scan(scan, directory, index, &self.resolver, now)?;
        if classification.outcome.success {
            self.recent.insert(key, RecentScan { at: now, outcome: classification.outcome.clone() });
        }
        Ok(classification)
    }

    /// Replace the cached outcome once persistence has settled (e.g. `was_offline`)
    pub fn remember(&mut self, scan: &Scan, outcome: &ScanOutcome) {
        if let Some(recent) = self.recent.get_mut(&Self::key(scan)) {
            recent.outcome = outcome.clone();
        }
    }

    pub fn cached_len(&self) -> usize {
        self.recent.len()
    }

    fn key(scan: &Scan) -> CooldownKey {
        (scan.attendee_id.clone(), scan.target.clone(), scan.device_id.clone())
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = self.cooldown * 2;
        self.recent.retain(|_, recent| within(now - recent.at, horizon));
    }
}

impl Default for ScanClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
