//! Persistent Store Port - Atomic Procedures and Billing CRUD
//!
//! Two traits live here:
//! - `LedgerStore`: one atomic procedure per ledger primitive. Each call
//!   checks and updates balances store-side in a single round trip and
//!   returns the post-operation balances. Callers never compute a new
//!   balance themselves.
//! - `BillingRepository`: CRUD over credit lines, payment rows, prepaid
//!   instruments, savings accounts and deferred transfers, plus the few
//!   mutations the batches need, expressed as deltas applied atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::audit::GameStats;
use crate::domain::credit::{CreditLine, PaymentRecord, SettlementPlan};
use crate::domain::error::LedgerError;
use crate::domain::money::{Amount, EntityId, Pocket, UserId};
use crate::domain::prepaid::PrepaidInstrument;
use crate::domain::savings::SavingsAccount;
use crate::domain::transfer::DeferredTransfer;

/// Failures an atomic procedure can report.
#[derive(Debug, Error)]
pub enum ProcedureError {
  /// The debited balance cannot cover the amount. Nothing was changed.
  #[error("insufficient funds for {user}: needed {needed}, available {available}")]
  InsufficientFunds {
    user: UserId,
    needed: Amount,
    available: Amount,
  },
  /// The referenced account or entity does not exist.
  #[error("{0} not found")]
  NotFound(String),
  /// The entity is not in a state that allows the operation.
  #[error("conflict: {0}")]
  Conflict(String),
  /// Anything else the backend reports.
  #[error("store backend failure: {0:#}")]
  Backend(#[from] anyhow::Error),
}

impl From<ProcedureError> for LedgerError {
  fn from(err: ProcedureError) -> Self {
    match err {
      ProcedureError::InsufficientFunds {
        user,
        needed,
        available,
      } => Self::InsufficientFunds {
        user,
        needed,
        available,
      },
      ProcedureError::NotFound(what) => Self::NotFound(what),
      ProcedureError::Conflict(why) => Self::Validation(why),
      ProcedureError::Backend(e) => Self::Store(format!("{e:#}")),
    }
  }
}

// ---- Procedure parameters and outcomes ----

#[derive(Debug, Clone, PartialEq)]
pub struct CasinoParams {
  pub user: UserId,
  pub bet: Amount,
  pub payout: Amount,
  pub game: String,
  pub metadata: serde_json::Value,
}

/// Chip balances around a casino round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasinoOutcome {
  pub balance_before: Amount,
  pub new_balance: Amount,
}

/// Direction of a chips/cash exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipsOp {
  /// Pay cash, receive chips.
  Buy,
  /// Return chips, receive cash.
  Sell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipsExchangeParams {
  pub user: UserId,
  pub op: ChipsOp,
  pub chips: Amount,
  pub cash: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipsExchangeOutcome {
  pub chips_before: Amount,
  pub chips_after: Amount,
  pub cash_before: Amount,
  pub cash_after: Amount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferParams {
  pub from: UserId,
  pub to: UserId,
  pub amount: Amount,
  pub pocket: Pocket,
  pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
  pub sender_before: Amount,
  pub sender_after: Amount,
  pub receiver_before: Amount,
  pub receiver_after: Amount,
}

/// Direction of a cash/bank move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BankOp {
  /// Cash into the bank pocket.
  Deposit,
  /// Bank pocket out to cash.
  Withdraw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankParams {
  pub user: UserId,
  pub amount: Amount,
  pub op: BankOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankOutcome {
  pub cash_before: Amount,
  pub bank_before: Amount,
  pub cash_after: Amount,
  pub bank_after: Amount,
}

/// Direction of a savings movement, seen from the cash pocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SavingsOp {
  /// Cash into the savings account.
  Deposit,
  /// Savings account out to cash.
  Withdraw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavingsParams {
  pub holder: UserId,
  pub account_id: EntityId,
  pub amount: Amount,
  pub op: SavingsOp,
  pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavingsOutcome {
  pub cash_before: Amount,
  pub cash_after: Amount,
  pub savings_before: Amount,
  pub savings_after: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuelParams {
  pub winner: UserId,
  pub loser: UserId,
  pub bet: Amount,
  pub tax: Amount,
  pub treasury: UserId,
  pub game: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuelOutcome {
  pub winner_before: Amount,
  pub winner_after: Amount,
  pub loser_before: Amount,
  pub loser_after: Amount,
  pub win_amount: Amount,
  pub tax: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditPaymentParams {
  pub holder: UserId,
  pub line_id: EntityId,
  pub amount: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPaymentOutcome {
  /// Amount actually applied (capped at the outstanding balance).
  pub applied: Amount,
  pub cash_before: Amount,
  pub cash_after: Amount,
  pub line_balance_before: Amount,
  pub line_balance_after: Amount,
}

/// Atomic stored procedures, one per ledger primitive.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
  /// Debit `bet` and credit `payout` on the user's chips in one step.
  async fn casino_transaction(&self, params: &CasinoParams) -> Result<CasinoOutcome, ProcedureError>;

  /// Convert between chips and cash.
  async fn chips_exchange(
    &self,
    params: &ChipsExchangeParams,
  ) -> Result<ChipsExchangeOutcome, ProcedureError>;

  /// Debit `from` and credit `to` together. Never two calls.
  async fn money_transfer(&self, params: &TransferParams) -> Result<TransferOutcome, ProcedureError>;

  /// Move money between a user's cash and bank pockets.
  async fn bank_operation(&self, params: &BankParams) -> Result<BankOutcome, ProcedureError>;

  /// Move money between a holder's cash and one of their savings accounts.
  /// Withdrawals cannot take the account below zero.
  async fn savings_transaction(&self, params: &SavingsParams) -> Result<SavingsOutcome, ProcedureError>;

  /// Settle a two-player duel: loser pays, winner and treasury receive.
  async fn pvp_duel(&self, params: &DuelParams) -> Result<DuelOutcome, ProcedureError>;

  /// Pay down a credit line from the holder's cash.
  async fn credit_payment(
    &self,
    params: &CreditPaymentParams,
  ) -> Result<CreditPaymentOutcome, ProcedureError>;

  /// Check if the store is reachable and writable.
  async fn is_healthy(&self) -> bool;
}

/// Lifetime game statistics, read by the win-ratio scan.
#[async_trait]
pub trait GameStatsSource: Send + Sync + 'static {
  async fn game_stats(&self, user: &str) -> anyhow::Result<GameStats>;
}

/// CRUD and batch mutations over billing entities.
#[async_trait]
pub trait BillingRepository: Send + Sync + 'static {
  // ---- credit lines ----

  /// Insert or replace a credit line (issuance happens outside this core).
  async fn upsert_credit_line(&self, line: &CreditLine) -> anyhow::Result<()>;

  async fn credit_line(&self, id: &str) -> anyhow::Result<Option<CreditLine>>;

  /// Every `Active` line with a positive balance.
  async fn billable_credit_lines(&self) -> anyhow::Result<Vec<CreditLine>>;

  /// Apply a settlement plan as a delta and advance the billing cycle.
  ///
  /// Paying branch: missed-payment counter reset, last payment stamped.
  /// Freeze branch: status `Frozen`, counter incremented.
  async fn apply_settlement(
    &self,
    line_id: &str,
    plan: &SettlementPlan,
    next_payment_at: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Result<CreditLine, ProcedureError>;

  /// Administrative `Frozen -> Active` transition.
  async fn unfreeze_credit_line(&self, line_id: &str) -> Result<CreditLine, ProcedureError>;

  async fn record_payment(&self, record: &PaymentRecord) -> anyhow::Result<()>;

  async fn payments_for_line(&self, line_id: &str) -> anyhow::Result<Vec<PaymentRecord>>;

  // ---- savings accounts ----

  /// Insert or replace a savings account (opening happens outside this core).
  async fn upsert_savings_account(&self, account: &SavingsAccount) -> anyhow::Result<()>;

  async fn savings_account(&self, id: &str) -> anyhow::Result<Option<SavingsAccount>>;

  // ---- prepaid instruments ----

  async fn upsert_instrument(&self, instrument: &PrepaidInstrument) -> anyhow::Result<()>;

  async fn instrument(&self, id: &str) -> anyhow::Result<Option<PrepaidInstrument>>;

  /// Every `Active` instrument with a positive balance.
  async fn coverable_instruments(&self) -> anyhow::Result<Vec<PrepaidInstrument>>;

  /// Atomically lower an instrument balance. Returns the new balance.
  async fn debit_instrument(&self, id: &str, amount: Amount) -> Result<Amount, ProcedureError>;

  /// Atomically raise an instrument balance. Returns the new balance.
  async fn credit_instrument(&self, id: &str, amount: Amount) -> Result<Amount, ProcedureError>;

  // ---- deferred transfers ----

  async fn insert_transfer(&self, transfer: &DeferredTransfer) -> anyhow::Result<()>;

  async fn transfer(&self, id: &str) -> anyhow::Result<Option<DeferredTransfer>>;

  /// Every `Pending` transfer with `release_at <= now`.
  async fn due_transfers(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<DeferredTransfer>>;

  /// `Pending -> Completed` compare-and-set. `Ok(false)` if already completed.
  async fn complete_transfer(&self, id: &str, now: DateTime<Utc>) -> Result<bool, ProcedureError>;
}
