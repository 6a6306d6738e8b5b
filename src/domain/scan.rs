//! Scan events, their classified outcome, and the mutation they request

use crate::domain::types::{AttendeeId, BoothId, DeviceId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// Where a badge was read
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanTarget {
    #[serde(rename = "boothId")]
    Booth(BoothId),
    #[serde(rename = "sessionId")]
    Session(SessionId),
}

impl std::fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanTarget::Booth(id) => write!(f, "booth:{}", id),
            ScanTarget::Session(id) => write!(f, "session:{}", id),
        }
    }
}

impl std::str::FromStr for ScanTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("booth", id)) if !id.is_empty() => Ok(ScanTarget::Booth(BoothId::new(id))),
            Some(("session", id)) if !id.is_empty() => Ok(ScanTarget::Session(SessionId::new(id))),
            _ => Err(format!("invalid scan target '{}', expected booth:<id> or session:<id>", s)),
        }
    }
}

/// One physical badge read. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: String,
    pub attendee_id: AttendeeId,
    pub target: ScanTarget,
    pub device_id: DeviceId,
    pub client_timestamp: DateTime<Utc>,
}

impl Scan {
    pub fn new(
        attendee_id: AttendeeId,
        target: ScanTarget,
        device_id: DeviceId,
        client_timestamp: DateTime<Utc>,
    ) -> Self {
        Self { id: Uuid::now_v7().to_string(), attendee_id, target, device_id, client_timestamp }
    }

    /// Idempotency key: sha256 over attendee, target, device and the
    /// timestamp floored to `bucket`. Reads of the same badge at the same
    /// place within one bucket collapse to one key.
    pub fn dedup_key(&self, bucket: Duration) -> String {
        let bucket_ms = bucket.as_millis().max(1) as i64;
        let slot = self.client_timestamp.timestamp_millis().div_euclid(bucket_ms);

        let mut hasher = Sha256::new();
        hasher.update(self.attendee_id.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.target.to_string().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.device_id.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(slot.to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Expected,
    WrongBooth,
    WalkIn,
    OutOfSchedule,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Expected => "EXPECTED",
            ScanStatus::WrongBooth => "WRONG_BOOTH",
            ScanStatus::WalkIn => "WALK_IN",
            ScanStatus::OutOfSchedule => "OUT_OF_SCHEDULE",
        }
    }
}

/// Result shown on the scanning device. Derived, never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub status: ScanStatus,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_booth_id: Option<BoothId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_booth_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    pub was_offline: bool,
    pub timestamp: DateTime<Utc>,
    /// Set when the scan could not be persisted locally (queue at capacity)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_warning: Option<String>,
}

impl ScanOutcome {
    pub fn new(status: ScanStatus, success: bool, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            success,
            message: message.into(),
            attendee_name: None,
            expected_booth_id: None,
            expected_booth_name: None,
            session_id: None,
            session_name: None,
            was_offline: false,
            timestamp,
            persistence_warning: None,
        }
    }

    pub fn out_of_schedule(timestamp: DateTime<Utc>) -> Self {
        Self::new(ScanStatus::OutOfSchedule, false, "No active session for this scan", timestamp)
    }
}

/// Side effect a successful classification asks the authoritative store to apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationRequest {
    /// `Registered -> Attended` for an existing registration
    MarkAttended {
        attendee_id: AttendeeId,
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        booth_id: Option<BoothId>,
    },
    /// Ad-hoc attended registration for an attendee accepted without one
    RecordWalkIn {
        attendee_id: AttendeeId,
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        booth_id: Option<BoothId>,
    },
}

impl MutationRequest {
    pub fn attendee_id(&self) -> &AttendeeId {
        match self {
            MutationRequest::MarkAttended { attendee_id, .. }
            | MutationRequest::RecordWalkIn { attendee_id, .. } => attendee_id,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            MutationRequest::MarkAttended { session_id, .. }
            | MutationRequest::RecordWalkIn { session_id, .. } => session_id,
        }
    }

    pub fn booth_id(&self) -> Option<&BoothId> {
        match self {
            MutationRequest::MarkAttended { booth_id, .. }
            | MutationRequest::RecordWalkIn { booth_id, .. } => booth_id.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MutationRequest::MarkAttended { .. } => "mark_attended",
            MutationRequest::RecordWalkIn { .. } => "record_walk_in",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn scan_at(at: &str) -> Scan {
        Scan::new(
            AttendeeId::from("A101"),
            ScanTarget::Booth(BoothId::from("B1")),
            DeviceId::from("dev-1"),
            ts(at),
        )
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(
            "booth:B1".parse::<ScanTarget>().unwrap(),
            ScanTarget::Booth(BoothId::from("B1"))
        );
        assert_eq!(
            "session:S1".parse::<ScanTarget>().unwrap(),
            ScanTarget::Session(SessionId::from("S1"))
        );
        assert!("B1".parse::<ScanTarget>().is_err());
        assert!("booth:".parse::<ScanTarget>().is_err());
    }

    #[test]
    fn test_target_json_shape() {
        let json = serde_json::to_value(ScanTarget::Booth(BoothId::from("B1"))).unwrap();
        assert_eq!(json, serde_json::json!({"boothId": "B1"}));
    }

    #[test]
    fn test_dedup_key_same_minute() {
        let a = scan_at("2026-05-04T10:05:01Z");
        let b = scan_at("2026-05-04T10:05:59Z");
        assert_ne!(a.id, b.id);
        assert_eq!(a.dedup_key(Duration::from_secs(60)), b.dedup_key(Duration::from_secs(60)));
    }

    #[test]
    fn test_dedup_key_next_minute_differs() {
        let a = scan_at("2026-05-04T10:05:59Z");
        let b = scan_at("2026-05-04T10:06:00Z");
        assert_ne!(a.dedup_key(Duration::from_secs(60)), b.dedup_key(Duration::from_secs(60)));
    }

    #[test]
    fn test_dedup_key_device_matters() {
        let a = scan_at("2026-05-04T10:05:00Z");
        let mut b = a.clone();
        b.device_id = DeviceId::from("dev-2");
        assert_ne!(a.dedup_key(Duration::from_secs(60)), b.dedup_key(Duration::from_secs(60)));
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let mut outcome =
            ScanOutcome::new(ScanStatus::WrongBooth, false, "Wrong booth", ts("2026-05-04T10:06:00Z"));
        outcome.expected_booth_name = Some("B1".to_string());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "WRONG_BOOTH");
        assert_eq!(json["expectedBoothName"], "B1");
        assert_eq!(json["wasOffline"], false);
        assert!(json.get("attendeeName").is_none());
    }

    #[test]
    fn test_mutation_tagged() {
        let m = MutationRequest::RecordWalkIn {
            attendee_id: AttendeeId::from("A1"),
            session_id: SessionId::from("S1"),
            booth_id: Some(BoothId::from("B1")),
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "record_walk_in");
        assert_eq!(json["booth_id"], "B1");
        let back: MutationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
