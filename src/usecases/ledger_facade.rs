//! Ledger Facade Use Case - Guarded Atomic Money Movement
//!
//! The only sanctioned way to move money. Each primitive:
//! 1. Validates its amounts
//! 2. Marks every touched user busy (fails fast with `ConcurrencyBusy`)
//! 3. Delegates the balance arithmetic to one atomic store procedure
//! 4. Releases the guard, then appends exactly one audit entry
//!
//! The facade never computes a balance itself and never retries; retry
//! policy belongs to the caller. Audit append failures are logged, the
//! money movement stands.

use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::audit_service::AuditService;
use super::guard::InFlightGuard;
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::audit::{AuditEntry, NewAuditEntry, TransactionType};
use crate::domain::error::LedgerError;
use crate::domain::money::{Amount, Pocket, UserId, ensure_non_negative, ensure_positive};
use crate::ports::store::{
  BankOp, BankOutcome, BankParams, CasinoParams, ChipsExchangeOutcome, ChipsExchangeParams, ChipsOp,
  CreditPaymentOutcome, CreditPaymentParams, DuelOutcome, DuelParams, LedgerStore, ProcedureError,
  SavingsOp, SavingsOutcome, SavingsParams, TransferOutcome, TransferParams,
};

/// Settings the facade needs from billing configuration.
#[derive(Debug, Clone)]
pub struct FacadeSettings {
  /// Share of a duel bet credited to the treasury.
  pub pvp_tax_rate: Decimal,
  pub treasury_account: UserId,
}

/// Outcome of a casino round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CasinoReceipt {
  pub new_balance: Amount,
  pub balance_before: Amount,
  pub won: bool,
}

pub struct LedgerFacade<S: LedgerStore> {
  store: Arc<S>,
  audit: AuditService,
  guard: InFlightGuard,
  settings: FacadeSettings,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<S: LedgerStore> LedgerFacade<S> {
  pub fn new(store: Arc<S>, audit: AuditService, settings: FacadeSettings) -> Self {
    Self {
      store,
      audit,
      guard: InFlightGuard::new(),
      settings,
      metrics: None,
    }
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  pub const fn guard(&self) -> &InFlightGuard {
    &self.guard
  }

  /// Bet `bet` chips and receive `payout` chips in one atomic step.
  #[instrument(skip(self, metadata), fields(user_id = %user))]
  pub async fn execute_casino_transaction(
    &self,
    user: &str,
    bet: Amount,
    payout: Amount,
    game: &str,
    metadata: serde_json::Value,
  ) -> Result<CasinoReceipt, LedgerError> {
    self.validate_transaction(user, bet, TransactionType::Casino)?;
    ensure_non_negative("payout", payout)?;

    let params = CasinoParams {
      user: user.to_string(),
      bet,
      payout,
      game: game.to_string(),
      metadata: metadata.clone(),
    };
    let outcome = self
      .guarded("casino", &[user], || self.store.casino_transaction(&params))
      .await?;

    let receipt = CasinoReceipt {
      new_balance: outcome.new_balance,
      balance_before: outcome.balance_before,
      won: payout > bet,
    };

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          user,
          TransactionType::Casino,
          bet,
          outcome.balance_before,
          outcome.new_balance,
        )
        .with_payout(payout)
        .with_metadata(json!({ "game": game, "won": receipt.won, "extra": metadata })),
      )
      .await;

    Ok(receipt)
  }

  /// Convert between chips and cash.
  #[instrument(skip(self), fields(user_id = %user))]
  pub async fn execute_chips_exchange(
    &self,
    user: &str,
    chips: Amount,
    cash: Amount,
    op: ChipsOp,
  ) -> Result<ChipsExchangeOutcome, LedgerError> {
    self.validate_transaction(user, cash, TransactionType::ChipsExchange)?;
    ensure_positive("chips", chips)?;
    ensure_positive("cash", cash)?;

    let params = ChipsExchangeParams {
      user: user.to_string(),
      op,
      chips,
      cash,
    };
    let outcome = self
      .guarded("chips_exchange", &[user], || self.store.chips_exchange(&params))
      .await?;

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          user,
          TransactionType::ChipsExchange,
          cash,
          outcome.cash_before,
          outcome.cash_after,
        )
        .with_metadata(json!({
          "op": op,
          "chips": chips.to_string(),
          "chips_before": outcome.chips_before.to_string(),
          "chips_after": outcome.chips_after.to_string(),
        })),
      )
      .await;

    Ok(outcome)
  }

  /// Debit `from` and credit `to` in one store call.
  #[instrument(skip(self, metadata), fields(from = %from, to = %to))]
  pub async fn execute_money_transfer(
    &self,
    from: &str,
    to: &str,
    amount: Amount,
    pocket: Pocket,
    metadata: serde_json::Value,
  ) -> Result<TransferOutcome, LedgerError> {
    self.validate_transaction(from, amount, TransactionType::TransferOut)?;
    ensure_positive("amount", amount)?;
    if from == to {
      return Err(LedgerError::Validation(
        "sender and receiver must differ".to_string(),
      ));
    }

    let params = TransferParams {
      from: from.to_string(),
      to: to.to_string(),
      amount,
      pocket,
      metadata: metadata.clone(),
    };
    let outcome = self
      .guarded("transfer", &[from, to], || self.store.money_transfer(&params))
      .await?;

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          from,
          TransactionType::TransferOut,
          amount,
          outcome.sender_before,
          outcome.sender_after,
        )
        .with_metadata(json!({
          "to": to,
          "pocket": pocket,
          "receiver_before": outcome.receiver_before.to_string(),
          "receiver_after": outcome.receiver_after.to_string(),
          "extra": metadata,
        })),
      )
      .await;

    Ok(outcome)
  }

  /// Move money between a user's cash and bank pockets.
  #[instrument(skip(self), fields(user_id = %user))]
  pub async fn execute_bank_operation(
    &self,
    user: &str,
    amount: Amount,
    op: BankOp,
  ) -> Result<BankOutcome, LedgerError> {
    let kind = match op {
      BankOp::Deposit => TransactionType::BankDeposit,
      BankOp::Withdraw => TransactionType::BankWithdraw,
    };
    self.validate_transaction(user, amount, kind)?;
    ensure_positive("amount", amount)?;

    let params = BankParams {
      user: user.to_string(),
      amount,
      op,
    };
    let outcome = self
      .guarded("bank", &[user], || self.store.bank_operation(&params))
      .await?;

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(user, kind, amount, outcome.bank_before, outcome.bank_after)
          .with_metadata(json!({
            "cash_before": outcome.cash_before.to_string(),
            "cash_after": outcome.cash_after.to_string(),
          })),
      )
      .await;

    Ok(outcome)
  }

  /// Move money between a holder's cash and their savings account.
  #[instrument(skip(self, notes), fields(user_id = %holder, account_id = %account_id))]
  pub async fn execute_savings_transaction(
    &self,
    holder: &str,
    account_id: &str,
    amount: Amount,
    op: SavingsOp,
    notes: Option<&str>,
  ) -> Result<SavingsOutcome, LedgerError> {
    let kind = match op {
      SavingsOp::Deposit => TransactionType::SavingsDeposit,
      SavingsOp::Withdraw => TransactionType::SavingsWithdraw,
    };
    self.validate_transaction(holder, amount, kind)?;
    ensure_positive("amount", amount)?;

    let params = SavingsParams {
      holder: holder.to_string(),
      account_id: account_id.to_string(),
      amount,
      op,
      notes: notes.map(str::to_string),
    };
    let outcome = self
      .guarded("savings", &[holder], || self.store.savings_transaction(&params))
      .await?;

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(holder, kind, amount, outcome.savings_before, outcome.savings_after)
          .with_metadata(json!({
            "account_id": account_id,
            "cash_before": outcome.cash_before.to_string(),
            "cash_after": outcome.cash_after.to_string(),
            "notes": notes,
          })),
      )
      .await;

    Ok(outcome)
  }

  /// Settle a two-player duel. The treasury keeps `bet * pvp_tax_rate`.
  #[instrument(skip(self), fields(winner = %winner, loser = %loser))]
  pub async fn execute_pvp_duel(
    &self,
    winner: &str,
    loser: &str,
    bet: Amount,
    game: &str,
  ) -> Result<DuelOutcome, LedgerError> {
    self.validate_transaction(winner, bet, TransactionType::PvpDuel)?;
    ensure_positive("bet", bet)?;
    if winner == loser {
      return Err(LedgerError::Validation(
        "a duel needs two different players".to_string(),
      ));
    }

    let tax = (bet * self.settings.pvp_tax_rate).round_dp(2);
    let params = DuelParams {
      winner: winner.to_string(),
      loser: loser.to_string(),
      bet,
      tax,
      treasury: self.settings.treasury_account.clone(),
      game: game.to_string(),
    };
    let outcome = self
      .guarded("pvp_duel", &[winner, loser], || self.store.pvp_duel(&params))
      .await?;

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          winner,
          TransactionType::PvpDuel,
          bet,
          outcome.winner_before,
          outcome.winner_after,
        )
        .with_payout(outcome.win_amount)
        .with_metadata(json!({
          "game": game,
          "loser": loser,
          "loser_before": outcome.loser_before.to_string(),
          "loser_after": outcome.loser_after.to_string(),
          "tax": outcome.tax.to_string(),
          "treasury": self.settings.treasury_account,
        })),
      )
      .await;

    Ok(outcome)
  }

  /// Holder-initiated payment against a credit line, from cash.
  #[instrument(skip(self), fields(holder = %holder, line_id = %line_id))]
  pub async fn pay_credit_line(
    &self,
    holder: &str,
    line_id: &str,
    amount: Amount,
  ) -> Result<CreditPaymentOutcome, LedgerError> {
    self.validate_transaction(holder, amount, TransactionType::CreditPayment)?;
    ensure_positive("amount", amount)?;

    let params = CreditPaymentParams {
      holder: holder.to_string(),
      line_id: line_id.to_string(),
      amount,
    };
    let outcome = self
      .guarded("credit_payment", &[holder], || self.store.credit_payment(&params))
      .await?;

    info!(
      applied = %outcome.applied,
      line_balance = %outcome.line_balance_after,
      "Credit line payment applied"
    );

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          holder,
          TransactionType::CreditPayment,
          outcome.applied,
          outcome.cash_before,
          outcome.cash_after,
        )
        .with_metadata(json!({
          "line_id": line_id,
          "requested": amount.to_string(),
          "line_balance_before": outcome.line_balance_before.to_string(),
          "line_balance_after": outcome.line_balance_after.to_string(),
        })),
      )
      .await;

    Ok(outcome)
  }

  /// Newest-first audit entries for a user.
  pub async fn transaction_history(
    &self,
    user: &str,
    limit: usize,
  ) -> Result<Vec<AuditEntry>, LedgerError> {
    self
      .audit
      .history(user, limit)
      .await
      .map_err(|e| LedgerError::Store(format!("{e:#}")))
  }

  /// Pre-flight checks shared by every primitive.
  ///
  /// Amounts above the large-transaction threshold are logged, not rejected.
  pub fn validate_transaction(
    &self,
    user: &str,
    amount: Amount,
    kind: TransactionType,
  ) -> Result<(), LedgerError> {
    if user.trim().is_empty() {
      return Err(LedgerError::Validation("user id must not be empty".to_string()));
    }
    ensure_non_negative("amount", amount)?;
    if amount > self.audit.thresholds().large_transaction {
      info!(user_id = %user, amount = %amount, kind = %kind, "Large transaction requested");
    }
    Ok(())
  }

  /// Hold the guard for `users` across one store call.
  async fn guarded<'a, T, F, Fut>(
    &'a self,
    op: &'static str,
    users: &[&str],
    call: F,
  ) -> Result<T, LedgerError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ProcedureError>> + 'a,
  {
    let result = match self.guard.acquire(users) {
      Ok(_token) => call().await.map_err(LedgerError::from),
      Err(busy) => {
        debug!(op, "Guard held, rejecting call");
        Err(busy)
      }
    };

    if let Err(e) = &result {
      if e.is_retryable() {
        warn!(op, error = %e, "Ledger store call failed");
      }
    }
    if let Some(metrics) = &self.metrics {
      let outcome = result.as_ref().map_or_else(LedgerError::kind, |_| "ok");
      metrics.record_ledger_op(op, outcome);
    }
    result
  }
}
