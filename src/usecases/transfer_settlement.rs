//! Transfer Settlement Use Case - Hourly Release of Deferred Transfers
//!
//! Selects every `Pending` transfer whose release time has passed,
//! credits the receiver on the pocket the transfer kind dictates, then
//! flips the row to `Completed` with a compare-and-set. A second run
//! finds nothing to do because completed rows are no longer selected.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use super::audit_service::AuditService;
use super::retry_tracker::RetryTracker;
use super::scheduler::{Batch, BatchReport, EntityResult, fail_entity, gate, notify_user};
use crate::domain::audit::{NewAuditEntry, TransactionType};
use crate::domain::error::LedgerError;
use crate::domain::money::{Amount, Balance, Pocket};
use crate::domain::transfer::DeferredTransfer;
use crate::ports::notifier::{Notification, NotificationSink, Severity};
use crate::ports::store::BillingRepository;
use crate::ports::wallet::WalletProvider;

pub const BATCH_NAME: &str = "transfer_settlement";

pub struct TransferSettlement<W: WalletProvider + ?Sized, R: BillingRepository> {
  wallet: Arc<W>,
  repo: Arc<R>,
  audit: AuditService,
  notifier: Arc<dyn NotificationSink>,
  retry: RetryTracker,
  community_id: String,
  dry_run: bool,
}

impl<W: WalletProvider + ?Sized, R: BillingRepository> TransferSettlement<W, R> {
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

  #[instrument(skip(self, transfer, now), fields(transfer_id = %transfer.id, receiver = %transfer.receiver_id))]
  async fn release(&self, transfer: &DeferredTransfer, now: DateTime<Utc>) -> Result<EntityResult, LedgerError> {
    if transfer.receiver_id.trim().is_empty() {
      return Err(LedgerError::Validation(format!(
        "transfer {} has no receiver",
        transfer.id
      )));
    }

    let pocket = transfer.kind.destination_pocket();
    if self.dry_run {
      info!(amount = %transfer.amount, pocket = %pocket, "Dry run: transfer would be released");
      return Ok(EntityResult::skipped(&transfer.id));
    }

    let community = self.community_id.as_str();
    let reason = format!("Transfer from {}: {}", transfer.sender_id, transfer.reason);
    let after = self
      .wallet
      .credit(community, &transfer.receiver_id, transfer.amount, &reason, pocket)
      .await?;

    match self.repo.complete_transfer(&transfer.id, now).await {
      Ok(true) => {}
      Ok(false) => {
        warn!("Transfer was completed elsewhere, reversing credit");
        self.reverse_credit(transfer, pocket).await;
        return Ok(EntityResult::skipped(&transfer.id));
      }
      Err(e) => {
        error!(error = %e, "Failed to mark transfer completed, reversing credit");
        self.reverse_credit(transfer, pocket).await;
        return Err(e.into());
      }
    }

    let pocket_after = pocket_value(&after, pocket);
    self
      .audit
      .record_or_log(
        NewAuditEntry::new(
          transfer.receiver_id.clone(),
          TransactionType::DeferredTransferRelease,
          transfer.amount,
          pocket_after - transfer.amount,
          pocket_after,
        )
        .with_metadata(json!({
          "transfer_id": transfer.id,
          "sender_id": transfer.sender_id,
          "kind": transfer.kind,
          "pocket": pocket,
          "reason": transfer.reason,
        })),
      )
      .await;

    notify_user(
      self.notifier.as_ref(),
      &transfer.receiver_id,
      Notification::new(
        "Transfer received",
        format!(
          "{} from <@{}> arrived in your {pocket} balance. Reason: {}",
          transfer.amount, transfer.sender_id, transfer.reason
        ),
        Severity::Good,
      ),
    )
    .await;

    Ok(EntityResult::settled(&transfer.id))
  }

  async fn reverse_credit(&self, transfer: &DeferredTransfer, pocket: Pocket) {
    let reason = format!("Reversal of duplicate transfer release {}", transfer.id);
    if let Err(e) = self
      .wallet
      .debit(&self.community_id, &transfer.receiver_id, transfer.amount, &reason, pocket)
      .await
    {
      error!(transfer_id = %transfer.id, error = %e, "Reversal failed, manual correction required");
      self
        .audit
        .alert_operations(Notification::new(
          "Transfer reversal failed",
          format!("{}: {} to {}: {e}", transfer.id, transfer.amount, transfer.receiver_id),
          Severity::Alert,
        ))
        .await;
    }
  }
}

const fn pocket_value(balance: &Balance, pocket: Pocket) -> Amount {
  match pocket {
    Pocket::Cash => balance.cash,
    Pocket::Bank => balance.bank,
  }
}

#[async_trait]
impl<W: WalletProvider + ?Sized, R: BillingRepository> Batch for TransferSettlement<W, R> {
  fn name(&self) -> &'static str {
    BATCH_NAME
  }

  async fn run(&self, now: DateTime<Utc>) -> BatchReport {
    let mut report = BatchReport::new(BATCH_NAME, now);

    let due = match self.repo.due_transfers(now).await {
      Ok(due) => due,
      Err(e) => {
        error!(error = %e, "Failed to list due transfers");
        return report;
      }
    };

    if !due.is_empty() {
      info!(due_count = due.len(), "Releasing deferred transfers");
    }

    for transfer in &due {
      if let Some(skip) = gate(&self.retry, &transfer.id, now) {
        report.push(skip);
        continue;
      }
      match self.release(transfer, now).await {
        Ok(result) => {
          self.retry.record_success(&transfer.id);
          report.push(result);
        }
        Err(e) => {
          report.push(fail_entity(BATCH_NAME, &self.retry, &self.audit, &transfer.id, &e, now).await);
        }
      }
    }

    report
  }
}
