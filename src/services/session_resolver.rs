//! Resolves which session governs a scan, and the config it scans under
//!
//! A stored config wins; otherwise a default is derived from the legacy
//! session type. When several sessions overlap the scan time for the same
//! booth, the earliest start wins, then the smallest session id.

use crate::domain::snapshot::Directory;
use crate::domain::types::{BoothRestriction, ScanningContext, Session, SessionConfig};
use crate::domain::ScanTarget;
use crate::error::{ScanError, ValidationError};
use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use tracing::debug;

/// The session a scan is classified against
#[derive(Debug, Clone)]
pub struct ActiveSession<'a> {
    pub session: &'a Session,
    pub config: SessionConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfigResolver;

impl SessionConfigResolver {
    pub fn new() -> Self {
        Self
    }

    /// Stored config verbatim, or the legacy-type default
    pub fn effective_config(session: &Session) -> SessionConfig {
        match &session.config {
            Some(config) => config.clone(),
            None => Self::config_from_legacy_type(session.session_type.as_deref()),
        }
    }

    pub fn config_from_legacy_type(session_type: Option<&str>) -> SessionConfig {
        match session_type {
            Some("meeting") => SessionConfig {
                scanning_context: ScanningContext::BoothMeeting,
                requires_pre_assignment: true,
                allows_walk_ins: false,
                booth_restriction: BoothRestriction::Assigned,
                booth_ids: BTreeSet::new(),
                has_capacity: false,
                max_capacity: None,
                lead_form: None,
            },
            Some(kind @ ("presentation" | "networking")) => SessionConfig {
                scanning_context: if kind == "presentation" {
                    ScanningContext::Presentation
                } else {
                    ScanningContext::Networking
                },
                requires_pre_assignment: false,
                allows_walk_ins: true,
                booth_restriction: BoothRestriction::None,
                booth_ids: BTreeSet::new(),
                has_capacity: false,
                max_capacity: None,
                lead_form: None,
            },
            _ => SessionConfig::open_attendance(),
        }
    }

    /// Pick the active session for `target` at `now`.
    ///
    /// `Ok(None)` is a schedule gap, not an error. Unknown booth/session ids are
    /// validation errors; a stored config that breaks its invariants blocks
    /// scanning for that session.
    pub fn resolve<'a>(
        &self,
        directory: &'a Directory,
        target: &ScanTarget,
        now: DateTime<Utc>,
    ) -> Result<Option<ActiveSession<'a>>, ScanError> {
        let mut candidates: SmallVec<[(&'a Session, SessionConfig); 4]> = SmallVec::new();

        match target {
            ScanTarget::Booth(booth_id) => {
                if directory.booth(booth_id).is_none() {
                    return Err(ValidationError::UnknownBooth(booth_id.to_string()).into());
                }
                for session in directory.sessions_overlapping(now) {
                    let config = Self::effective_config(session);
                    if config.covers_booth(booth_id) {
                        candidates.push((session, config));
                    }
                }
            }
            ScanTarget::Session(session_id) => {
                let Some(session) = directory.session(session_id) else {
                    return Err(ValidationError::UnknownSession(session_id.to_string()).into());
                };
                if session.is_active_at(now) {
                    candidates.push((session, Self::effective_config(session)));
                }
            }
        }

        let Some((session, config)) = candidates
            .into_iter()
            .min_by(|(a, _), (b, _)| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)))
        else {
            debug!(scan_target = %target, now = %now, "session_none_active");
            return Ok(None);
        };

        if session.config.is_some() {
            config.validate().map_err(|source| ScanError::Config {
                session_id: session.id.to_string(),
                source,
            })?;
        }

        Ok(Some(ActiveSession { session, config }))
    }
}
