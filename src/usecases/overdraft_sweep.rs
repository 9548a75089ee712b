//! Overdraft Sweep Use Case - Automatic Coverage of Negative Cash
//!
//! For every active prepaid instrument with a positive balance, moves
//! `min(|cash|, instrument balance)` into the holder's negative cash
//! pocket. Partial coverage is normal: the remaining deficit is picked
//! up by later sweeps as the instrument is topped up.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use super::audit_service::AuditService;
use super::retry_tracker::RetryTracker;
use super::scheduler::{Batch, BatchReport, EntityResult, fail_entity, gate, notify_user};
use crate::domain::audit::{NewAuditEntry, TransactionType};
use crate::domain::error::LedgerError;
use crate::domain::money::Pocket;
use crate::domain::prepaid::{PrepaidInstrument, plan_coverage};
use crate::ports::notifier::{Notification, NotificationSink, Severity};
use crate::ports::store::BillingRepository;
use crate::ports::wallet::WalletProvider;

pub const BATCH_NAME: &str = "overdraft_sweep";

pub struct OverdraftSweep<W: WalletProvider + ?Sized, R: BillingRepository> {
  wallet: Arc<W>,
  repo: Arc<R>,
  audit: AuditService,
  notifier: Arc<dyn NotificationSink>,
  retry: RetryTracker,
  community_id: String,
  dry_run: bool,
}

impl<W: WalletProvider + ?Sized, R: BillingRepository> OverdraftSweep<W, R> {
  pub fn new(
    wallet: Arc<W>,
    repo: Arc<R>,
    audit: AuditService,
    notifier: Arc<dyn NotificationSink>,
    retry: RetryTracker,
    community_id: impl Into<String>,
    dry_run: bool,
  ) -> Self {
    Self {
      wallet,
      repo,
      audit,
      notifier,
      retry,
      community_id: community_id.into(),
      dry_run,
    }
  }

  pub const fn retry_tracker(&self) -> &RetryTracker {
    &self.retry
  }

  #[instrument(skip(self, instrument), fields(instrument_id = %instrument.id, holder = %instrument.holder_id))]
  async fn cover(&self, instrument: &PrepaidInstrument) -> Result<EntityResult, LedgerError> {
    let community = self.community_id.as_str();
    let holder = instrument.holder_id.as_str();
    let balance = self.wallet.get_balance(community, holder).await?;

    let Some(coverage) = plan_coverage(balance.cash, instrument.balance) else {
      debug!(cash = %balance.cash, "No overdraft to cover");
      return Ok(EntityResult::skipped(&instrument.id));
    };

    if self.dry_run {
      info!(cash = %balance.cash, coverage = %coverage, "Dry run: overdraft would be covered");
      return Ok(EntityResult::skipped(&instrument.id));
    }

    let instrument_after = self.repo.debit_instrument(&instrument.id, coverage).await?;

    let reason = format!("Automatic overdraft coverage ({})", instrument.id);
    let after = match self
      .wallet
      .credit(community, holder, coverage, &reason, Pocket::Cash)
      .await
    {
      Ok(after) => after,
      Err(e) => {
        error!(error = %e, "Wallet credit failed, restoring instrument balance");
        if let Err(restore) = self.repo.credit_instrument(&instrument.id, coverage).await {
          error!(error = %restore, "Instrument restore failed, manual correction required");
          self
            .audit
            .alert_operations(Notification::new(
              "Overdraft restore failed",
              format!("{}: {coverage} could not be returned: {restore}", instrument.id),
              Severity::Alert,
            ))
            .await;
        }
        return Err(e.into());
      }
    };

    let remaining = after.cash.min(Decimal::ZERO).abs();
    info!(coverage = %coverage, remaining_deficit = %remaining, "Overdraft covered");

    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          holder,
          TransactionType::OverdraftCoverage,
          coverage,
          balance.cash,
          after.cash,
        )
        .with_metadata(json!({
          "instrument_id": instrument.id,
          "instrument_before": instrument.balance.to_string(),
          "instrument_after": instrument_after.to_string(),
          "remaining_deficit": remaining.to_string(),
        })),
      )
      .await;

    let body = if remaining.is_zero() {
      format!("{coverage} was moved from your prepaid card to cover your negative cash balance.")
    } else {
      format!(
        "{coverage} was moved from your prepaid card. Your cash is still {remaining} short; \
         top up the card to cover the rest."
      )
    };
    notify_user(
      self.notifier.as_ref(),
      holder,
      Notification::new("Overdraft covered", body, Severity::Warning),
    )
    .await;

    Ok(EntityResult::settled(&instrument.id))
  }
}

#[async_trait]
impl<W: WalletProvider + ?Sized, R: BillingRepository> Batch for OverdraftSweep<W, R> {
  fn name(&self) -> &'static str {
    BATCH_NAME
  }

  async fn run(&self, now: DateTime<Utc>) -> BatchReport {
    let mut report = BatchReport::new(BATCH_NAME, now);

    let instruments = match self.repo.coverable_instruments().await {
      Ok(instruments) => instruments,
      Err(e) => {
        error!(error = %e, "Failed to list prepaid instruments");
        return report;
      }
    };

    for instrument in &instruments {
      if let Some(skip) = gate(&self.retry, &instrument.id, now) {
        report.push(skip);
        continue;
      }
      match self.cover(instrument).await {
        Ok(result) => {
          self.retry.record_success(&instrument.id);
          report.push(result);
        }
        Err(e) => {
          report.push(fail_entity(BATCH_NAME, &self.retry, &self.audit, &instrument.id, &e, now).await);
        }
      }
    }

    report
  }
}
