//! In-memory index of who is expected where
//!
//! Maps attendee -> session -> registration, plus booth -> occupancy.
//! The index is a cache of the authoritative store: classification reads it
//! optimistically, the store re-validates on commit.

use crate::domain::scan::MutationRequest;
use crate::domain::types::{
    AttendeeId, BoothId, RegistrationId, RegistrationStatus, SessionId, SessionRegistration,
};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Result of the only mutation the engine performs on registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    /// `Registered -> Attended` happened now
    Marked,
    /// Already attended; nothing changed
    AlreadyAttended,
    /// No registration to mark
    NotRegistered,
}

#[derive(Debug, Default)]
pub struct RegistrationIndex {
    by_attendee: FxHashMap<AttendeeId, FxHashMap<SessionId, SessionRegistration>>,
    occupancy: FxHashMap<BoothId, u64>,
}

impl RegistrationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_registrations(registrations: impl IntoIterator<Item = SessionRegistration>) -> Self {
        let mut index = Self::new();
        index.refresh(registrations);
        index
    }

    /// Replace the whole snapshot
    pub fn refresh(&mut self, registrations: impl IntoIterator<Item = SessionRegistration>) {
        self.by_attendee.clear();
        self.occupancy.clear();

        for registration in registrations {
            if registration.status == RegistrationStatus::Attended {
                if let Some(booth) = &registration.expected_booth_id {
                    *self.occupancy.entry(booth.clone()).or_insert(0) += 1;
                }
            }
            self.by_attendee
                .entry(registration.attendee_id.clone())
                .or_default()
                .insert(registration.session_id.clone(), registration);
        }

        debug!(
            attendees = %self.by_attendee.len(),
            registrations = %self.len(),
            "registration_index_refreshed"
        );
    }

    pub fn find_registration(
        &self,
        attendee_id: &AttendeeId,
        session_id: &SessionId,
    ) -> Option<&SessionRegistration> {
        self.by_attendee.get(attendee_id)?.get(session_id)
    }

    /// Idempotent `Registered -> Attended`. `booth` is where the attendee was
    /// seen; it defaults to the expected booth for occupancy counting.
    pub fn mark_attended(
        &mut self,
        attendee_id: &AttendeeId,
        session_id: &SessionId,
        booth: Option<&BoothId>,
    ) -> MarkResult {
        let Some(registration) =
            self.by_attendee.get_mut(attendee_id).and_then(|m| m.get_mut(session_id))
        else {
            return MarkResult::NotRegistered;
        };

        if registration.status == RegistrationStatus::Attended {
            return MarkResult::AlreadyAttended;
        }

        registration.status = RegistrationStatus::Attended;
        if let Some(booth) = booth.or(registration.expected_booth_id.as_ref()) {
            *self.occupancy.entry(booth.clone()).or_insert(0) += 1;
        }
        MarkResult::Marked
    }

    /// Create an attended ad-hoc registration, or mark the existing one.
    /// Replays never add a second record.
    pub fn record_walk_in(
        &mut self,
        attendee_id: &AttendeeId,
        session_id: &SessionId,
        booth: Option<&BoothId>,
    ) -> MarkResult {
        if self.find_registration(attendee_id, session_id).is_some() {
            return self.mark_attended(attendee_id, session_id, booth);
        }

        let registration = SessionRegistration {
            id: RegistrationId::new(format!("walkin:{}:{}", session_id, attendee_id)),
            session_id: session_id.clone(),
            attendee_id: attendee_id.clone(),
            expected_booth_id: booth.cloned(),
            status: RegistrationStatus::Attended,
        };
        self.by_attendee
            .entry(attendee_id.clone())
            .or_default()
            .insert(session_id.clone(), registration);
        if let Some(booth) = booth {
            *self.occupancy.entry(booth.clone()).or_insert(0) += 1;
        }
        MarkResult::Marked
    }

    pub fn apply(&mut self, mutation: &MutationRequest) -> MarkResult {
        match mutation {
            MutationRequest::MarkAttended { attendee_id, session_id, booth_id } => {
                self.mark_attended(attendee_id, session_id, booth_id.as_ref())
            }
            MutationRequest::RecordWalkIn { attendee_id, session_id, booth_id } => {
                self.record_walk_in(attendee_id, session_id, booth_id.as_ref())
            }
        }
    }

    /// Undo a local `Marked` the store refused. `previous` is the status the
    /// registration had before; `None` means `apply` created it as a walk-in.
    pub fn revert(&mut self, mutation: &MutationRequest, previous: Option<RegistrationStatus>) {
        let (attendee_id, session_id, booth) = match mutation {
            MutationRequest::MarkAttended { attendee_id, session_id, booth_id }
            | MutationRequest::RecordWalkIn { attendee_id, session_id, booth_id } => {
                (attendee_id, session_id, booth_id.as_ref())
            }
        };
        let Some(sessions) = self.by_attendee.get_mut(attendee_id) else {
            return;
        };
        let Some(registration) = sessions.get_mut(session_id) else {
            return;
        };
        if registration.status != RegistrationStatus::Attended {
            return;
        }

        let counted_at = booth.or(registration.expected_booth_id.as_ref()).cloned();
        match previous {
            Some(status) => registration.status = status,
            None => {
                sessions.remove(session_id);
                if sessions.is_empty() {
                    self.by_attendee.remove(attendee_id);
                }
            }
        }
        if let Some(booth) = counted_at {
            if let Some(count) = self.occupancy.get_mut(&booth) {
                *count = count.saturating_sub(1);
            }
        }
        debug!(attendee_id = %attendee_id, session_id = %session_id, "registration_mark_reverted");
    }

    pub fn occupancy(&self, booth: &BoothId) -> u64 {
        self.occupancy.get(booth).copied().unwrap_or(0)
    }

    pub fn attended_count(&self, session_id: &SessionId) -> usize {
        self.by_attendee
            .values()
            .filter_map(|m| m.get(session_id))
            .filter(|r| r.status == RegistrationStatus::Attended)
            .count()
    }

    /// Total registrations held
    pub fn len(&self) -> usize {
        self.by_attendee.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_attendee.is_empty()
    }
}
