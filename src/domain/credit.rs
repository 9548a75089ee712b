//! Credit line state machine and weekly settlement planner.
//!
//! States: `Active` and `Frozen`. A weekly settlement either keeps the
//! line `Active` (minimum covered) or moves it to `Frozen` (minimum missed,
//! penalty interest applied). `Frozen -> Active` only happens through the
//! explicit administrative unfreeze.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::money::{Amount, EntityId, UserId};

/// Lifecycle status of a credit line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditStatus {
    Active,
    Frozen,
}

impl std::fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Frozen => write!(f, "FROZEN"),
        }
    }
}

/// A revolving credit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLine {
    pub id: EntityId,
    pub holder_id: UserId,
    pub credit_limit: Amount,
    /// Outstanding debt. Penalty interest may push it past the limit.
    pub current_balance: Amount,
    /// Weekly interest rate as a fraction (0.05 = 5%).
    pub interest_rate: Decimal,
    pub status: CreditStatus,
    pub next_payment_at: DateTime<Utc>,
    pub missed_payments: u32,
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl CreditLine {
    /// Interest rate to apply, falling back when the stored one is unset.
    pub fn effective_rate(&self, default_rate: Decimal) -> Decimal {
        if self.interest_rate > Decimal::ZERO {
            self.interest_rate
        } else {
            default_rate
        }
    }

    /// Whether the weekly settlement should consider this line at all.
    pub fn is_billable(&self) -> bool {
        self.status == CreditStatus::Active && self.current_balance > Decimal::ZERO
    }

    /// Administrative `Frozen -> Active` transition.
    pub fn unfreeze(&mut self) -> Result<(), LedgerError> {
        if self.status != CreditStatus::Frozen {
            return Err(LedgerError::Validation(format!(
                "credit line {} is {}, not FROZEN",
                self.id, self.status
            )));
        }
        self.status = CreditStatus::Active;
        Ok(())
    }
}

/// Which branch of the settlement state machine applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    /// Minimum covered; line stays active.
    Paid,
    /// Minimum missed; available funds taken, penalty applied, line frozen.
    Frozen,
}

/// Result of planning a weekly settlement for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPlan {
    pub min_payment: Amount,
    /// Amount to debit from the holder (may be zero on the freeze branch).
    pub charge: Amount,
    /// Penalty interest added after the charge (zero on the paying branch).
    pub penalty: Amount,
    pub outcome: SettlementOutcome,
    pub balance_before: Amount,
    pub balance_after: Amount,
}

impl SettlementPlan {
    /// Net change the store must apply to the line balance.
    pub fn balance_delta(&self) -> Amount {
        self.penalty - self.charge
    }
}

/// Plan a weekly settlement.
///
/// * `balance` - current outstanding balance (> 0)
/// * `rate` - weekly penalty rate as a fraction
/// * `available` - holder's spendable total, clamped at zero by the caller
/// * `min_fraction` - share of the balance due each week (0.25)
pub fn plan_settlement(
    balance: Amount,
    rate: Decimal,
    available: Amount,
    min_fraction: Decimal,
) -> SettlementPlan {
    let available = available.max(Decimal::ZERO);
    let min_payment = balance * min_fraction;

    if available >= min_payment {
        let charge = available.min(balance);
        return SettlementPlan {
            min_payment,
            charge,
            penalty: Decimal::ZERO,
            outcome: SettlementOutcome::Paid,
            balance_before: balance,
            balance_after: balance - charge,
        };
    }

    let charge = available;
    let remaining = balance - charge;
    let penalty = remaining * rate;
    SettlementPlan {
        min_payment,
        charge,
        penalty,
        outcome: SettlementOutcome::Frozen,
        balance_before: balance,
        balance_after: remaining + penalty,
    }
}

/// Kind of row written to the payment log for every settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    Success,
    PartialPayment,
}

impl From<SettlementOutcome> for PaymentKind {
    fn from(outcome: SettlementOutcome) -> Self {
        match outcome {
            SettlementOutcome::Paid => Self::Success,
            SettlementOutcome::Frozen => Self::PartialPayment,
        }
    }
}

/// One row of the credit payment log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: EntityId,
    pub line_id: EntityId,
    pub holder_id: UserId,
    pub amount: Amount,
    pub kind: PaymentKind,
    pub penalty: Amount,
    pub balance_after: Amount,
    pub recorded_at: DateTime<Utc>,
}
