//! Savings accounts: money a holder parks away from the cash pocket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::money::{Amount, EntityId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SavingsStatus {
    Active,
    Closed,
}

/// An account opened elsewhere; this core only moves money in and out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsAccount {
    pub id: EntityId,
    pub holder_id: UserId,
    pub balance: Amount,
    pub status: SavingsStatus,
    pub opened_at: DateTime<Utc>,
}

impl SavingsAccount {
    pub fn accepts_movements(&self) -> bool {
        self.status == SavingsStatus::Active
    }
}
