//! Persistence Adapters - In-Memory Store, Snapshots and Audit Logs
//!
//! Implements the store ports with one lock-guarded in-memory state,
//! persisted as atomic JSON snapshots, plus append-only JSONL files
//! for the audit log. No database dependency.

pub mod audit_log;
pub mod memory;
pub mod snapshot;

pub use audit_log::{JsonlAuditLog, MemoryAuditLog};
pub use memory::{InMemoryStore, Pockets, StoreState};
pub use snapshot::SnapshotStore;
