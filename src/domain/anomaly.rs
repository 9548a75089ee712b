//! Anomaly rules evaluated after every audit append.
//!
//! The rules are pure: the audit service gathers the inputs (the entry,
//! a recent-entry count, lifetime game stats) and hands them in here.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use super::audit::{AuditEntry, GameStats, TransactionType};
use super::money::{Amount, UserId};

/// Thresholds for the three independent scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyThresholds {
    /// Strictly-greater-than limit for a single amount or payout.
    pub large_transaction: Amount,
    /// Entries allowed per user inside the velocity window.
    pub velocity_max_entries: usize,
    pub velocity_window_secs: i64,
    /// Strictly-greater-than win ratio that raises an alert.
    pub suspicious_win_ratio: Decimal,
    /// Games a user must have played before the ratio is meaningful.
    pub min_games_for_ratio: u64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            large_transaction: Decimal::from(5_000_000),
            velocity_max_entries: 10,
            velocity_window_secs: 60,
            suspicious_win_ratio: Decimal::new(85, 2),
            min_games_for_ratio: 20,
        }
    }
}

/// A detected anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    LargeTransaction {
        user_id: UserId,
        amount: Amount,
        transaction: TransactionType,
    },
    Velocity {
        user_id: UserId,
        count: usize,
        window_secs: i64,
    },
    SuspiciousWinRatio {
        user_id: UserId,
        win_ratio: Decimal,
        games_played: u64,
    },
}

impl Anomaly {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LargeTransaction { .. } => "large_transaction",
            Self::Velocity { .. } => "velocity",
            Self::SuspiciousWinRatio { .. } => "suspicious_win_ratio",
        }
    }

    pub const fn title(&self) -> &'static str {
        match self {
            Self::LargeTransaction { .. } => "Large Transaction Detected",
            Self::Velocity { .. } => "Rapid Transactions Detected",
            Self::SuspiciousWinRatio { .. } => "Suspicious Win Rate",
        }
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::LargeTransaction {
                user_id,
                amount,
                transaction,
            } => json!({ "user_id": user_id, "amount": amount.to_string(), "type": transaction }),
            Self::Velocity {
                user_id,
                count,
                window_secs,
            } => json!({ "user_id": user_id, "count": count, "window_secs": window_secs }),
            Self::SuspiciousWinRatio {
                user_id,
                win_ratio,
                games_played,
            } => json!({
                "user_id": user_id,
                "win_ratio": format!("{:.1}%", win_ratio * Decimal::ONE_HUNDRED),
                "games_played": games_played,
            }),
        }
    }
}

pub fn check_large_transaction(
    entry: &AuditEntry,
    thresholds: &AnomalyThresholds,
) -> Option<Anomaly> {
    let amount = entry.headline_amount();
    (amount > thresholds.large_transaction).then(|| Anomaly::LargeTransaction {
        user_id: entry.user_id.clone(),
        amount,
        transaction: entry.kind,
    })
}

/// `recent_count` includes the entry that was just appended.
pub fn check_velocity(
    user_id: &str,
    recent_count: usize,
    thresholds: &AnomalyThresholds,
) -> Option<Anomaly> {
    (recent_count > thresholds.velocity_max_entries).then(|| Anomaly::Velocity {
        user_id: user_id.to_string(),
        count: recent_count,
        window_secs: thresholds.velocity_window_secs,
    })
}

pub fn check_win_ratio(
    user_id: &str,
    stats: &GameStats,
    thresholds: &AnomalyThresholds,
) -> Option<Anomaly> {
    let ratio = stats.win_ratio();
    (ratio > thresholds.suspicious_win_ratio && stats.games_played > thresholds.min_games_for_ratio)
        .then(|| Anomaly::SuspiciousWinRatio {
            user_id: user_id.to_string(),
            win_ratio: ratio,
            games_played: stats.games_played,
        })
}
