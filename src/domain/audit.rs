//! Audit entries: the append-only record of every executed money movement.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::{Amount, UserId};

/// What kind of operation produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Casino,
    ChipsExchange,
    TransferOut,
    BankDeposit,
    BankWithdraw,
    SavingsDeposit,
    SavingsWithdraw,
    PvpDuel,
    CreditPayment,
    CreditSettlement,
    CreditUnfreeze,
    DeferredTransferRelease,
    OverdraftCoverage,
}

impl TransactionType {
    /// Game-type entries feed the win-ratio check.
    pub const fn is_game(self) -> bool {
        matches!(self, Self::Casino | Self::PvpDuel)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Casino => "casino",
            Self::ChipsExchange => "chips_exchange",
            Self::TransferOut => "transfer_out",
            Self::BankDeposit => "bank_deposit",
            Self::BankWithdraw => "bank_withdraw",
            Self::SavingsDeposit => "savings_deposit",
            Self::SavingsWithdraw => "savings_withdraw",
            Self::PvpDuel => "pvp_duel",
            Self::CreditPayment => "credit_payment",
            Self::CreditSettlement => "credit_settlement",
            Self::CreditUnfreeze => "credit_unfreeze",
            Self::DeferredTransferRelease => "deferred_transfer_release",
            Self::OverdraftCoverage => "overdraft_coverage",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry before the log assigns identity and time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub user_id: UserId,
    pub kind: TransactionType,
    pub amount: Amount,
    /// Casino payout, checked against the large-transaction threshold too.
    pub payout: Option<Amount>,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub metadata: serde_json::Value,
}

impl NewAuditEntry {
    pub fn new(
        user_id: impl Into<UserId>,
        kind: TransactionType,
        amount: Amount,
        balance_before: Amount,
        balance_after: Amount,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            amount,
            payout: None,
            balance_before,
            balance_after,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_payout(mut self, payout: Amount) -> Self {
        self.payout = Some(payout);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn into_entry(self, created_at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            kind: self.kind,
            amount: self.amount,
            payout: self.payout,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            metadata: self.metadata,
            created_at,
        }
    }
}

/// Immutable, persisted audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: TransactionType,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout: Option<Amount>,
    pub balance_before: Amount,
    pub balance_after: Amount,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Largest single figure on the entry (amount or payout).
    pub fn headline_amount(&self) -> Amount {
        self.payout.map_or(self.amount, |p| p.max(self.amount))
    }
}

/// Lifetime game statistics kept by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStats {
    pub total_won: Amount,
    pub total_lost: Amount,
    pub games_played: u64,
}

impl GameStats {
    /// `total_won / (total_won + total_lost)`, zero with no history.
    pub fn win_ratio(&self) -> Decimal {
        let total = self.total_won + self.total_lost;
        if total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.total_won / total
    }

    /// Fold one game into the statistics.
    pub fn record(&mut self, bet: Amount, payout: Amount) {
        self.games_played += 1;
        if payout > bet {
            self.total_won += payout - bet;
        } else {
            self.total_lost += bet - payout;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_win_ratio() {
        let stats = GameStats {
            total_won: dec!(900),
            total_lost: dec!(100),
            games_played: 30,
        };
        assert_eq!(stats.win_ratio(), dec!(0.9));
        assert_eq!(GameStats::default().win_ratio(), dec!(0));
    }

    #[test]
    fn test_record_game() {
        let mut stats = GameStats::default();
        stats.record(dec!(100), dec!(250));
        stats.record(dec!(100), dec!(0));
        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.total_won, dec!(150));
        assert_eq!(stats.total_lost, dec!(100));
    }

    #[test]
    fn test_headline_amount_uses_payout() {
        let entry = NewAuditEntry::new("u1", TransactionType::Casino, dec!(10), dec!(100), dec!(590))
            .with_payout(dec!(500))
            .into_entry(Utc::now());
        assert_eq!(entry.headline_amount(), dec!(500));
        assert!(entry.kind.is_game());
    }

    #[test]
    fn test_entry_serializes_without_empty_payout() {
        let entry = NewAuditEntry::new("u1", TransactionType::BankDeposit, dec!(10), dec!(0), dec!(10))
            .into_entry(Utc::now());
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("payout"));
        assert!(json.contains("\"bank_deposit\""));
    }
}
