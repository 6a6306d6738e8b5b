//! Domain models - event entities, scans and their outcomes
//!
//! - `types` - attendees, booths, sessions, session configs, registrations
//! - `scan` - `Scan`, `ScanTarget`, `ScanOutcome`, `MutationRequest`
//! - `snapshot` - read-only event data and the `Directory` lookups built from it

pub mod scan;
pub mod snapshot;
pub mod types;

pub use scan::{MutationRequest, Scan, ScanOutcome, ScanStatus, ScanTarget};
pub use snapshot::{Directory, EventSnapshot};
