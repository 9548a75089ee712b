//! Money primitives shared by every layer.
//!
//! All amounts are `rust_decimal::Decimal` so that settlement arithmetic
//! (25% minimums, weekly interest) is exact. Identifiers are plain strings
//! at the ports boundary, matching what the wallet provider hands out.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Money amount in the community currency.
pub type Amount = Decimal;

/// Wallet user identifier (the platform's user id).
pub type UserId = String;

/// Identifier of a credit line, prepaid instrument or deferred transfer.
pub type EntityId = String;

/// Spendable pocket held by the wallet provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pocket {
    Cash,
    Bank,
}

impl std::fmt::Display for Pocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cash => write!(f, "cash"),
            Self::Bank => write!(f, "bank"),
        }
    }
}

/// Cash and bank balances of one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub cash: Amount,
    pub bank: Amount,
}

impl Balance {
    pub const fn new(cash: Amount, bank: Amount) -> Self {
        Self { cash, bank }
    }

    /// Total spendable money, never below zero.
    pub fn available(&self) -> Amount {
        (self.cash + self.bank).max(Decimal::ZERO)
    }

    /// Split a charge across pockets: positive cash first, then bank.
    ///
    /// Returns `(from_cash, from_bank)`. The caller guarantees
    /// `charge <= self.available()`.
    pub fn split_charge(&self, charge: Amount) -> (Amount, Amount) {
        let from_cash = charge.min(self.cash.max(Decimal::ZERO));
        (from_cash, charge - from_cash)
    }
}

/// Reject negative amounts.
pub fn ensure_non_negative(field: &str, amount: Amount) -> Result<(), LedgerError> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "{field} must be >= 0, got {amount}"
        )));
    }
    Ok(())
}

/// Reject zero and negative amounts.
pub fn ensure_positive(field: &str, amount: Amount) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "{field} must be > 0, got {amount}"
        )));
    }
    Ok(())
}
