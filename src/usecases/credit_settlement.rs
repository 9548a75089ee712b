//! Credit Settlement Use Case - Weekly Billing of Credit Lines
//!
//! For every `Active` line with a positive balance:
//! 1. Read the holder's spendable total from the wallet provider
//! 2. Plan the settlement (paying branch or freeze branch)
//! 3. Debit the holder, cash first then bank
//! 4. Apply the plan to the line as one atomic delta
//! 5. Record the payment row, the audit entry, and notify the holder
//!
//! A wallet debit that cannot be matched by a store update is refunded,
//! so a failed line is left as it was and retried on a later cycle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::audit_service::AuditService;
use super::retry_tracker::RetryTracker;
use super::scheduler::{Batch, BatchReport, EntityResult, fail_entity, gate, notify_user};
use crate::domain::audit::{NewAuditEntry, TransactionType};
use crate::domain::credit::{
  CreditLine, PaymentKind, PaymentRecord, SettlementOutcome, SettlementPlan, plan_settlement,
};
use crate::domain::error::LedgerError;
use crate::domain::money::{Amount, Balance, Pocket};
use crate::ports::notifier::{Notification, NotificationSink, Severity};
use crate::ports::store::BillingRepository;
use crate::ports::wallet::WalletProvider;

pub const BATCH_NAME: &str = "credit_settlement";

/// Billing constants for the weekly cycle.
#[derive(Debug, Clone)]
pub struct CreditSettlementSettings {
  pub community_id: String,
  pub min_payment_fraction: Decimal,
  pub default_interest_rate: Decimal,
  /// Plan and log only.
  pub dry_run: bool,
}

/// Weekly credit line settlement batch.
pub struct CreditSettlement<W: WalletProvider + ?Sized, R: BillingRepository> {
  wallet: Arc<W>,
  repo: Arc<R>,
  audit: AuditService,
  notifier: Arc<dyn NotificationSink>,
  retry: RetryTracker,
  settings: CreditSettlementSettings,
}

impl<W: WalletProvider + ?Sized, R: BillingRepository> CreditSettlement<W, R> {
  pub fn new(
    wallet: Arc<W>,
    repo: Arc<R>,
    audit: AuditService,
    notifier: Arc<dyn NotificationSink>,
    retry: RetryTracker,
    settings: CreditSettlementSettings,
  ) -> Self {
    Self {
      wallet,
      repo,
      audit,
      notifier,
      retry,
      settings,
    }
  }

  pub const fn retry_tracker(&self) -> &RetryTracker {
    &self.retry
  }

  /// Settle one line. `Ok` carries the per-entity result.
  #[instrument(skip(self, line, now), fields(line_id = %line.id, holder = %line.holder_id))]
  async fn settle_line(&self, line: &CreditLine, now: DateTime<Utc>) -> Result<EntityResult, LedgerError> {
    let community = self.settings.community_id.as_str();
    let balance = self.wallet.get_balance(community, &line.holder_id).await?;

    let rate = line.effective_rate(self.settings.default_interest_rate);
    let plan = plan_settlement(
      line.current_balance,
      rate,
      balance.available(),
      self.settings.min_payment_fraction,
    );

    info!(
      min_payment = %plan.min_payment,
      available = %balance.available(),
      charge = %plan.charge,
      penalty = %plan.penalty,
      outcome = ?plan.outcome,
      "Settlement planned"
    );

    if self.settings.dry_run {
      return Ok(EntityResult::skipped(&line.id));
    }

    let reason = format!("Automatic credit line payment ({})", line.id);
    let (from_cash, from_bank) = self.charge_holder(&line.holder_id, &balance, plan.charge, &reason).await?;

    let next_payment_at = now + Duration::weeks(1);
    let updated = match self
      .repo
      .apply_settlement(&line.id, &plan, next_payment_at, now)
      .await
    {
      Ok(updated) => updated,
      Err(e) => {
        error!(error = %e, "Failed to apply settlement, refunding holder");
        self.refund(&line.holder_id, from_cash, from_bank, &line.id).await;
        return Err(e.into());
      }
    };

    let record = PaymentRecord {
      id: Uuid::new_v4().to_string(),
      line_id: line.id.clone(),
      holder_id: line.holder_id.clone(),
      amount: plan.charge,
      kind: PaymentKind::from(plan.outcome),
      penalty: plan.penalty,
      balance_after: updated.current_balance,
      recorded_at: now,
    };
    if let Err(e) = self.repo.record_payment(&record).await {
      error!(error = %e, "Failed to write payment row");
    }

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          line.holder_id.clone(),
          TransactionType::CreditSettlement,
          plan.charge,
          plan.balance_before,
          updated.current_balance,
        )
        .with_metadata(json!({
          "line_id": line.id,
          "outcome": plan.outcome,
          "min_payment": plan.min_payment.to_string(),
          "penalty": plan.penalty.to_string(),
          "from_cash": from_cash.to_string(),
          "from_bank": from_bank.to_string(),
          "status": updated.status,
        })),
      )
      .await;

    notify_user(self.notifier.as_ref(), &line.holder_id, settlement_notice(&plan)).await;

    Ok(EntityResult::settled(&line.id))
  }

  /// Debit `charge` across pockets. Compensates the cash leg if the bank leg fails.
  async fn charge_holder(
    &self,
    holder: &str,
    balance: &Balance,
    charge: Amount,
    reason: &str,
  ) -> Result<(Amount, Amount), LedgerError> {
    let community = self.settings.community_id.as_str();
    let (from_cash, from_bank) = balance.split_charge(charge);

    if from_cash > Decimal::ZERO {
      self
        .wallet
        .debit(community, holder, from_cash, reason, Pocket::Cash)
        .await?;
    }
    if from_bank > Decimal::ZERO {
      if let Err(e) = self
        .wallet
        .debit(community, holder, from_bank, reason, Pocket::Bank)
        .await
      {
        self.refund(holder, from_cash, Decimal::ZERO, reason).await;
        return Err(e.into());
      }
    }
    Ok((from_cash, from_bank))
  }

  async fn refund(&self, holder: &str, cash: Amount, bank: Amount, context: &str) {
    let community = self.settings.community_id.as_str();
    let reason = format!("Refund: {context}");
    for (pocket, amount) in [(Pocket::Cash, cash), (Pocket::Bank, bank)] {
      if amount <= Decimal::ZERO {
        continue;
      }
      if let Err(e) = self
        .wallet
        .credit(community, holder, amount, &reason, pocket)
        .await
      {
        error!(
          holder = %holder,
          pocket = %pocket,
          amount = %amount,
          error = %e,
          "Refund failed, manual correction required"
        );
        self
          .audit
          .alert_operations(Notification::new(
            "Credit settlement refund failed",
            format!("{holder}: {amount} on {pocket} ({context}): {e}"),
            Severity::Alert,
          ))
          .await;
      }
    }
  }

  /// Administrative `Frozen -> Active` transition.
  ///
  /// Balance and missed-payment counter are left as they are.
  #[instrument(skip(self))]
  pub async fn unfreeze(&self, line_id: &str, operator: &str) -> Result<CreditLine, LedgerError> {
    let updated = self.repo.unfreeze_credit_line(line_id).await?;
    self.retry.release(line_id);

    info!(holder = %updated.holder_id, "Credit line unfrozen");

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          updated.holder_id.clone(),
          TransactionType::CreditUnfreeze,
          Decimal::ZERO,
          updated.current_balance,
          updated.current_balance,
        )
        .with_metadata(json!({ "line_id": line_id, "operator": operator })),
      )
      .await;

    notify_user(
      self.notifier.as_ref(),
      &updated.holder_id,
      Notification::new(
        "Credit line reactivated",
        format!(
          "Your credit line is active again. Outstanding balance: {}.",
          updated.current_balance
        ),
        Severity::Good,
      ),
    )
    .await;

    Ok(updated)
  }
}

fn settlement_notice(plan: &SettlementPlan) -> Notification {
  match plan.outcome {
    SettlementOutcome::Paid => Notification::new(
      "Automatic payment successful",
      format!(
        "{} was charged to your account. Remaining balance: {}. Your credit line stays ACTIVE.",
        plan.charge, plan.balance_after
      ),
      Severity::Good,
    ),
    SettlementOutcome::Frozen => Notification::new(
      "Credit line frozen",
      format!(
        "The minimum payment of {} was not covered. Your available funds ({}) were taken \
         and a penalty of {} was added. Your credit line is FROZEN.",
        plan.min_payment, plan.charge, plan.penalty
      ),
      Severity::Alert,
    ),
  }
}

#[async_trait]
impl<W: WalletProvider + ?Sized, R: BillingRepository> Batch for CreditSettlement<W, R> {
  fn name(&self) -> &'static str {
    BATCH_NAME
  }

  async fn run(&self, now: DateTime<Utc>) -> BatchReport {
    let mut report = BatchReport::new(BATCH_NAME, now);

    let lines = match self.repo.billable_credit_lines().await {
      Ok(lines) => lines,
      Err(e) => {
        error!(error = %e, "Failed to list billable credit lines");
        return report;
      }
    };

    info!(line_count = lines.len(), "Starting credit settlement");

    for line in &lines {
      if let Some(skip) = gate(&self.retry, &line.id, now) {
        report.push(skip);
        continue;
      }
      match self.settle_line(line, now).await {
        Ok(result) => {
          self.retry.record_success(&line.id);
          report.push(result);
        }
        Err(e) => {
          warn!(line_id = %line.id, error = %e, "Credit line settlement failed");
          report.push(fail_entity(BATCH_NAME, &self.retry, &self.audit, &line.id, &e, now).await);
        }
      }
    }

    report
  }
}
