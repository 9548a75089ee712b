//! Audit Repository Port - Append-only Transaction Log
//!
//! Entries are appended once and never mutated or deleted. Reads back
//! the log for the velocity scan, user history and operator reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::audit::AuditEntry;

#[async_trait]
pub trait AuditRepository: Send + Sync + 'static {
  /// Append one entry.
  async fn append(&self, entry: &AuditEntry) -> anyhow::Result<()>;

  /// Number of entries for `user` created at or after `since`.
  async fn count_since(&self, user: &str, since: DateTime<Utc>) -> anyhow::Result<usize>;

  /// Newest-first entries for `user`, at most `limit`.
  async fn history(&self, user: &str, limit: usize) -> anyhow::Result<Vec<AuditEntry>>;

  /// Every entry created at or after `since`, oldest first.
  async fn entries_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<AuditEntry>>;

  /// Check if the log is writable.
  async fn is_healthy(&self) -> bool;
}
