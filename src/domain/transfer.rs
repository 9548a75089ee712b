//! Deferred (value-dated) transfers.
//!
//! A transfer is created `Pending` by the command layer with the sender
//! already debited. The hourly settlement credits the receiver once the
//! release timestamp has passed and flips the status to `Completed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::money::{Amount, EntityId, Pocket, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
}

/// How the money travels, which decides the receiving pocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Cash-to-cash parcel delivery ("giro").
    Cash,
    /// Bank app transfer between debit accounts.
    Bank,
    /// Prepaid-card-to-prepaid-card transfer, lands in the bank pocket.
    DebitToDebit,
}

impl TransferKind {
    pub const fn destination_pocket(self) -> Pocket {
        match self {
            Self::Cash => Pocket::Cash,
            Self::Bank | Self::DebitToDebit => Pocket::Bank,
        }
    }
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cash => write!(f, "cash"),
            Self::Bank => write!(f, "bank"),
            Self::DebitToDebit => write!(f, "debit_to_debit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredTransfer {
    pub id: EntityId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub amount: Amount,
    pub kind: TransferKind,
    pub reason: String,
    pub release_at: DateTime<Utc>,
    pub status: TransferStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeferredTransfer {
    /// Selection predicate of the settlement batch.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TransferStatus::Pending && self.release_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn transfer(release_at: DateTime<Utc>, status: TransferStatus) -> DeferredTransfer {
        DeferredTransfer {
            id: "tr_1".to_string(),
            sender_id: "alice".to_string(),
            receiver_id: "bob".to_string(),
            amount: dec!(150),
            kind: TransferKind::Cash,
            reason: "rent".to_string(),
            release_at,
            status,
            completed_at: None,
        }
    }

    #[test]
    fn test_due_only_when_pending_and_released() {
        let now = Utc::now();
        assert!(transfer(now - Duration::hours(1), TransferStatus::Pending).is_due(now));
        assert!(transfer(now, TransferStatus::Pending).is_due(now));
        assert!(!transfer(now + Duration::hours(1), TransferStatus::Pending).is_due(now));
        assert!(!transfer(now - Duration::hours(1), TransferStatus::Completed).is_due(now));
    }

    #[test]
    fn test_destination_pocket() {
        assert_eq!(TransferKind::Cash.destination_pocket(), Pocket::Cash);
        assert_eq!(TransferKind::DebitToDebit.destination_pocket(), Pocket::Bank);
    }
}
