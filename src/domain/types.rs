//! Shared entity types for the scanning engine
//!
//! Everything here is read-only to the engine except `SessionRegistration::status`,
//! which only ever moves `Registered -> Attended`.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Badge identifier as decoded by the scanner
    AttendeeId
);
string_id!(BoothId);
string_id!(SessionId);
string_id!(
    /// Identifier of a physical scanning device
    DeviceId
);
string_id!(RegistrationId);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub id: AttendeeId,
    pub name: String,
    #[serde(default)]
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booth {
    pub id: BoothId,
    /// Label printed on the physical booth (e.g. "B1")
    pub physical_id: String,
    pub company_name: String,
    #[serde(default)]
    pub capacity: Option<u32>,
}

impl Booth {
    /// Name shown on scanner screens
    pub fn display_name(&self) -> &str {
        &self.physical_id
    }
}

/// What a session's scans mean to the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanningContext {
    BoothMeeting,
    Presentation,
    LeadCapture,
    OpenAttendance,
    Networking,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoothRestriction {
    /// Attendees must scan at their pre-assigned booth
    Assigned,
    /// Any booth listed in `booth_ids`
    Any,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadFormField {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadForm {
    pub fields: Vec<LeadFormField>,
}

/// Scan policy attached to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub scanning_context: ScanningContext,
    pub requires_pre_assignment: bool,
    pub allows_walk_ins: bool,
    pub booth_restriction: BoothRestriction,
    #[serde(default)]
    pub booth_ids: BTreeSet<BoothId>,
    #[serde(default)]
    pub has_capacity: bool,
    #[serde(default)]
    pub max_capacity: Option<u32>,
    #[serde(default)]
    pub lead_form: Option<LeadForm>,
}

impl SessionConfig {
    /// Open attendance policy, also the fallback for unknown legacy types
    pub fn open_attendance() -> Self {
        Self {
            scanning_context: ScanningContext::OpenAttendance,
            requires_pre_assignment: false,
            allows_walk_ins: true,
            booth_restriction: BoothRestriction::None,
            booth_ids: BTreeSet::new(),
            has_capacity: false,
            max_capacity: None,
            lead_form: None,
        }
    }

    /// Check the invariants a config must satisfy when saved.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.booth_restriction != BoothRestriction::None && self.booth_ids.is_empty() {
            return Err(ConfigError::MissingBoothIds);
        }
        if self.has_capacity && !matches!(self.max_capacity, Some(n) if n > 0) {
            return Err(ConfigError::InvalidCapacity);
        }
        if self.scanning_context == ScanningContext::LeadCapture && self.lead_form.is_none() {
            return Err(ConfigError::MissingLeadForm);
        }
        Ok(())
    }

    /// Whether a scan at `booth` falls under this session's scope.
    /// An empty booth list only occurs on configs derived from a legacy
    /// session type and covers every booth.
    pub fn covers_booth(&self, booth: &BoothId) -> bool {
        match self.booth_restriction {
            BoothRestriction::None => true,
            BoothRestriction::Assigned | BoothRestriction::Any => {
                self.booth_ids.is_empty() || self.booth_ids.contains(booth)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub config: Option<SessionConfig>,
    /// Pre-config session type ("meeting", "presentation", ...)
    #[serde(default)]
    pub session_type: Option<String>,
}

impl Session {
    /// Inclusive on both ends
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now <= self.end_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Registered,
    Attended,
    #[serde(rename = "No-Show")]
    NoShow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRegistration {
    pub id: RegistrationId,
    pub session_id: SessionId,
    pub attendee_id: AttendeeId,
    #[serde(default)]
    pub expected_booth_id: Option<BoothId>,
    pub status: RegistrationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assigned(booths: &[&str]) -> SessionConfig {
        SessionConfig {
            scanning_context: ScanningContext::BoothMeeting,
            requires_pre_assignment: true,
            allows_walk_ins: false,
            booth_restriction: BoothRestriction::Assigned,
            booth_ids: booths.iter().map(|b| BoothId::from(*b)).collect(),
            has_capacity: false,
            max_capacity: None,
            lead_form: None,
        }
    }

    #[test]
    fn test_validate_requires_booth_ids() {
        assert_eq!(assigned(&[]).validate(), Err(ConfigError::MissingBoothIds));
        assert!(assigned(&["B1"]).validate().is_ok());
    }

    #[test]
    fn test_validate_capacity() {
        let mut config = SessionConfig::open_attendance();
        config.has_capacity = true;
        config.max_capacity = Some(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidCapacity));
        config.max_capacity = Some(40);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_lead_capture_needs_form() {
        let mut config = SessionConfig::open_attendance();
        config.scanning_context = ScanningContext::LeadCapture;
        assert_eq!(config.validate(), Err(ConfigError::MissingLeadForm));

        config.lead_form = Some(LeadForm {
            fields: vec![LeadFormField {
                id: "interest".to_string(),
                label: "Product interest".to_string(),
                required: true,
            }],
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_covers_booth() {
        let config = assigned(&["B1", "B2"]);
        assert!(config.covers_booth(&BoothId::from("B2")));
        assert!(!config.covers_booth(&BoothId::from("B3")));
        assert!(assigned(&[]).covers_booth(&BoothId::from("B3")));
        assert!(SessionConfig::open_attendance().covers_booth(&BoothId::from("B3")));
    }

    #[test]
    fn test_session_window_inclusive() {
        let start = "2026-05-04T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let end = "2026-05-04T10:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let session = Session {
            id: SessionId::from("S1"),
            name: "Morning meetings".to_string(),
            start_time: start,
            end_time: end,
            config: None,
            session_type: None,
        };
        assert!(session.is_active_at(start));
        assert!(session.is_active_at(end));
        assert!(!session.is_active_at(end + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_registration_status_serde() {
        let json = serde_json::to_string(&RegistrationStatus::NoShow).unwrap();
        assert_eq!(json, "\"No-Show\"");
    }
}
