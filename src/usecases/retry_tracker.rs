//! Retry Tracker - Per-entity Backoff and Quarantine for Batches
//!
//! Process-local; a restart forgets every record and each entity gets a
//! fresh attempt on the next scheduled run.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::error::LedgerError;
use crate::domain::money::EntityId;
use crate::domain::retry::{FailureRecord, RetryDecision, RetryPolicy, register_failure};

/// Whether a batch should attempt an entity this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
  Ready,
  /// Backing off until the given time.
  Deferred(DateTime<Utc>),
  Quarantined,
}

#[derive(Debug, Default)]
pub struct RetryTracker {
  policy: RetryPolicy,
  records: DashMap<EntityId, FailureRecord>,
}

impl RetryTracker {
  pub fn new(policy: RetryPolicy) -> Self {
    Self {
      policy,
      records: DashMap::new(),
    }
  }

  pub fn eligibility(&self, entity: &str, now: DateTime<Utc>) -> Eligibility {
    match self.records.get(entity) {
      None => Eligibility::Ready,
      Some(record) if record.quarantined => Eligibility::Quarantined,
      Some(record) => match record.next_attempt_at {
        Some(at) if now < at => Eligibility::Deferred(at),
        _ => Eligibility::Ready,
      },
    }
  }

  /// Register a failed attempt and decide what happens next.
  pub fn record_failure(
    &self,
    entity: &str,
    err: &LedgerError,
    now: DateTime<Utc>,
  ) -> (RetryDecision, u32) {
    let previous = self.records.get(entity).map(|r| r.clone());
    let (record, decision) = register_failure(
      &self.policy,
      previous.as_ref(),
      &err.to_string(),
      err.is_retryable(),
      now,
    );
    let attempts = record.attempts;
    self.records.insert(entity.to_string(), record);
    (decision, attempts)
  }

  pub fn record_success(&self, entity: &str) {
    self.records.remove(entity);
  }

  /// Administrative release of a quarantined or backing-off entity.
  pub fn release(&self, entity: &str) -> bool {
    self.records.remove(entity).is_some()
  }

  pub fn record(&self, entity: &str) -> Option<FailureRecord> {
    self.records.get(entity).map(|r| r.clone())
  }

  /// Quarantined entity ids, sorted.
  pub fn quarantined(&self) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = self
      .records
      .iter()
      .filter(|r| r.quarantined)
      .map(|r| r.key().clone())
      .collect();
    ids.sort();
    ids
  }
}
