//! Read-only event data handed to the engine by the surrounding application
//!
//! The snapshot is a JSON document:
//! `{ "attendees": [..], "booths": [..], "sessions": [..], "registrations": [..] }`

use crate::domain::types::{
    Attendee, AttendeeId, Booth, BoothId, Session, SessionId, SessionRegistration,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSnapshot {
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub booths: Vec<Booth>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub registrations: Vec<SessionRegistration>,
}

impl EventSnapshot {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot file {}", path.display()))
    }
}

/// Booth, session and attendee lookups
#[derive(Debug, Default)]
pub struct Directory {
    attendees: FxHashMap<AttendeeId, Attendee>,
    booths: FxHashMap<BoothId, Booth>,
    sessions: Vec<Session>,
}

impl Directory {
    pub fn new(attendees: Vec<Attendee>, booths: Vec<Booth>, sessions: Vec<Session>) -> Self {
        Self {
            attendees: attendees.into_iter().map(|a| (a.id.clone(), a)).collect(),
            booths: booths.into_iter().map(|b| (b.id.clone(), b)).collect(),
            sessions,
        }
    }

    pub fn from_snapshot(snapshot: &EventSnapshot) -> Self {
        Self::new(
            snapshot.attendees.clone(),
            snapshot.booths.clone(),
            snapshot.sessions.clone(),
        )
    }

    pub fn booth(&self, id: &BoothId) -> Option<&Booth> {
        self.booths.get(id)
    }

    pub fn booth_name(&self, id: &BoothId) -> String {
        self.booths
            .get(id)
            .map(|b| b.display_name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub fn sessions_overlapping(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(move |s| s.is_active_at(now))
    }

    pub fn attendee_exists(&self, id: &AttendeeId) -> bool {
        self.attendees.contains_key(id)
    }

    pub fn attendee_name(&self, id: &AttendeeId) -> Option<&str> {
        self.attendees.get(id).map(|a| a.name.as_str())
    }

    pub fn attendee_count(&self) -> usize {
        self.attendees.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
