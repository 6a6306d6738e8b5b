//! IO modules - external system interfaces
//!
//! - `store` - authoritative store adapters (HTTP and in-memory)
//! - `offline_queue` - durable queue of scans awaiting confirmation
//! - `scan_listener` - TCP line protocol for scanning devices
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod offline_queue;
pub mod prometheus;
pub mod scan_listener;
pub mod store;

// Re-export commonly used types
pub use offline_queue::{OfflineScanQueue, PendingScanRecord, QueueConfig};
pub use scan_listener::{start_scan_listener, ListenerConfig};
pub use store::{AuthoritativeStore, CommitResponse, HttpStore, InMemoryStore};
