//! Retry/backoff policy for per-entity batch failures.
//!
//! Retryable failures back off exponentially in wall-clock time; permanent
//! failures, or too many retryable ones, quarantine the entity until an
//! operator releases it.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts before an entity is quarantined.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::minutes(10),
            max_backoff: Duration::days(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` failures (>= 1).
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let factor = 1_i32 << exponent;
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Failure bookkeeping for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub attempts: u32,
    pub last_error: String,
    pub last_failure_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub quarantined: bool,
}

/// What the tracker decided after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    Quarantine,
}

impl FailureRecord {
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.quarantined && self.next_attempt_at.is_none_or(|at| now >= at)
    }
}

/// Apply one failure to an optional existing record.
pub fn register_failure(
    policy: &RetryPolicy,
    previous: Option<&FailureRecord>,
    error: &str,
    retryable: bool,
    now: DateTime<Utc>,
) -> (FailureRecord, RetryDecision) {
    let attempts = previous.map_or(0, |r| r.attempts) + 1;
    let quarantine = !retryable || attempts >= policy.max_attempts;

    let decision = if quarantine {
        RetryDecision::Quarantine
    } else {
        RetryDecision::RetryAt(now + policy.backoff(attempts))
    };

    let record = FailureRecord {
        attempts,
        last_error: error.to_string(),
        last_failure_at: now,
        next_attempt_at: match decision {
            RetryDecision::RetryAt(at) => Some(at),
            RetryDecision::Quarantine => None,
        },
        quarantined: quarantine,
    };
    (record, decision)
}
