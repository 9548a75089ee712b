//! Ledger error taxonomy.
//!
//! Every failure a ledger or batch operation can report maps onto one of
//! these variants. Callers of the facade match on them to render a message;
//! batches use [`LedgerError::is_retryable`] to feed the retry tracker.

use thiserror::Error;

use super::money::{Amount, UserId};

/// Structured failure returned by ledger primitives and batch steps.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Bad amount, method or entity state.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The debited pocket cannot cover the requested amount.
    #[error("insufficient funds for {user}: needed {needed}, available {available}")]
    InsufficientFunds {
        user: UserId,
        needed: Amount,
        available: Amount,
    },

    /// Another ledger operation for this user is already in flight.
    #[error("a ledger operation for {0} is already in flight")]
    ConcurrencyBusy(UserId),

    /// The atomic store call failed.
    #[error("store error: {0}")]
    Store(String),

    /// The wallet provider was unreachable or rejected the call.
    #[error("wallet provider error: {0}")]
    ExternalProvider(String),

    /// The referenced user or entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// Whether a later attempt could plausibly succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::ExternalProvider(_))
    }

    /// Short label used for metrics and log fields.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::ConcurrencyBusy(_) => "concurrency_busy",
            Self::Store(_) => "store",
            Self::ExternalProvider(_) => "external_provider",
            Self::NotFound(_) => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LedgerError::Store("timeout".into()).is_retryable());
        assert!(LedgerError::ExternalProvider("502".into()).is_retryable());
        assert!(!LedgerError::NotFound("user".into()).is_retryable());
        assert!(!LedgerError::Validation("negative".into()).is_retryable());
        assert!(!LedgerError::ConcurrencyBusy("u1".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::ConcurrencyBusy("u1".to_string());
        assert_eq!(err.to_string(), "a ledger operation for u1 is already in flight");
        assert_eq!(err.kind(), "concurrency_busy");
    }
}
