//! Services - scan policy and persistence orchestration
//!
//! - `session_resolver` - effective session config per session
//! - `registration_index` - local registration state and attendance transitions
//! - `classifier` - pure scan classification with cooldown replay
//! - `ingest` - request path: classify, commit, fall back to the queue
//! - `sync_manager` - background drain of the offline queue

pub mod classifier;
pub mod ingest;
pub mod registration_index;
pub mod session_resolver;
pub mod sync_manager;

// Re-export commonly used types
pub use classifier::ScanClassifier;
pub use ingest::ScanIngestService;
pub use registration_index::RegistrationIndex;
pub use session_resolver::SessionConfigResolver;
pub use sync_manager::{SyncManager, SyncReport};
