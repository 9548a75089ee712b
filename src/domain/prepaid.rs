//! Prepaid (stored-value) instruments used as an overdraft backstop.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::{Amount, EntityId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepaidInstrument {
    pub id: EntityId,
    pub holder_id: UserId,
    pub balance: Amount,
    pub status: InstrumentStatus,
}

impl PrepaidInstrument {
    /// Whether the sweep may draw from this instrument.
    pub fn can_cover(&self) -> bool {
        self.status == InstrumentStatus::Active && self.balance > Decimal::ZERO
    }
}

/// Amount an instrument should move into a negative cash pocket.
///
/// Returns `None` when cash is not negative or nothing can be covered.
/// Coverage never exceeds the instrument balance; the remainder stays
/// negative until a later sweep.
pub fn plan_coverage(cash: Amount, instrument_balance: Amount) -> Option<Amount> {
    if cash >= Decimal::ZERO || instrument_balance <= Decimal::ZERO {
        return None;
    }
    Some(cash.abs().min(instrument_balance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_partial_coverage() {
        assert_eq!(plan_coverage(dec!(-500), dec!(300)), Some(dec!(300)));
    }

    #[test]
    fn test_full_coverage() {
        assert_eq!(plan_coverage(dec!(-100), dec!(300)), Some(dec!(100)));
    }

    #[test]
    fn test_no_coverage_needed() {
        assert_eq!(plan_coverage(dec!(0), dec!(300)), None);
        assert_eq!(plan_coverage(dec!(20), dec!(300)), None);
        assert_eq!(plan_coverage(dec!(-20), dec!(0)), None);
    }
}
