//! Error taxonomy for the scanning engine
//!
//! Classification problems (`ScanError`) are surfaced to the scanning device
//! immediately and never queued. Persistence problems (`CommitError`,
//! `QueueError`) stay behind the optimistic outcome.

use thiserror::Error;

/// Unknown or malformed identifiers in a scan request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown attendee: {0}")]
    UnknownAttendee(String),

    #[error("Unknown booth: {0}")]
    UnknownBooth(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Device id must not be empty")]
    EmptyDeviceId,
}

/// A session config that violates its save-time invariants
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("booth restriction requires at least one booth id")]
    MissingBoothIds,

    #[error("capacity-limited session needs max_capacity > 0")]
    InvalidCapacity,

    #[error("lead_capture session is missing its lead form")]
    MissingLeadForm,
}

/// Failure to classify a scan at all
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error for session {session_id}: {source}")]
    Config {
        session_id: String,
        #[source]
        source: ConfigError,
    },
}

impl ScanError {
    /// Short machine-readable kind for device replies
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Validation(_) => "validation",
            ScanError::Config { .. } => "config",
        }
    }
}

/// Transient failure talking to the authoritative store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("commit timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("server error: HTTP {0}")]
    Server(u16),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("offline queue is full ({capacity} pending scans)")]
    Quota { capacity: usize },

    #[error("unknown dedup key: {0}")]
    UnknownKey(String),

    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue journal error: {0}")]
    Serde(#[from] serde_json::Error),
}
