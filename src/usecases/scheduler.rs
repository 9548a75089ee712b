//! Batch Scheduler - Periodic Triggers and Batch Reports
//!
//! Each batch runs on its own trigger in its own task. A run walks its
//! entities one at a time and returns a [`BatchReport`]; one failing
//! entity never aborts the rest of the run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use super::audit_service::AuditService;
use super::retry_tracker::{Eligibility, RetryTracker};
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::error::LedgerError;
use crate::domain::retry::RetryDecision;
use crate::domain::schedule::Trigger;
use crate::ports::notifier::{Notification, NotificationSink, NotifyTarget, Severity};

/// Per-entity result of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityOutcome {
  Settled,
  Failed,
  /// Not attempted this cycle (backing off, or nothing to do).
  Skipped,
  Quarantined,
}

impl EntityOutcome {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Settled => "settled",
      Self::Failed => "failed",
      Self::Skipped => "skipped",
      Self::Quarantined => "quarantined",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityResult {
  pub entity_id: String,
  pub outcome: EntityOutcome,
  /// Error text when the entity failed or was quarantined.
  pub error: Option<String>,
}

impl EntityResult {
  pub fn settled(entity_id: impl Into<String>) -> Self {
    Self {
      entity_id: entity_id.into(),
      outcome: EntityOutcome::Settled,
      error: None,
    }
  }

  pub fn skipped(entity_id: impl Into<String>) -> Self {
    Self {
      entity_id: entity_id.into(),
      outcome: EntityOutcome::Skipped,
      error: None,
    }
  }
}

/// Aggregated report from one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
  pub batch: &'static str,
  pub started_at: DateTime<Utc>,
  pub processed: usize,
  pub settled: usize,
  pub failed: usize,
  pub skipped: usize,
  pub quarantined: usize,
  pub results: Vec<EntityResult>,
}

impl BatchReport {
  pub const fn new(batch: &'static str, started_at: DateTime<Utc>) -> Self {
    Self {
      batch,
      started_at,
      processed: 0,
      settled: 0,
      failed: 0,
      skipped: 0,
      quarantined: 0,
      results: Vec::new(),
    }
  }

  pub fn push(&mut self, result: EntityResult) {
    self.processed += 1;
    match result.outcome {
      EntityOutcome::Settled => self.settled += 1,
      EntityOutcome::Failed => self.failed += 1,
      EntityOutcome::Skipped => self.skipped += 1,
      EntityOutcome::Quarantined => self.quarantined += 1,
    }
    self.results.push(result);
  }

  pub fn result(&self, entity_id: &str) -> Option<&EntityResult> {
    self.results.iter().find(|r| r.entity_id == entity_id)
  }
}

/// A periodic batch.
#[async_trait]
pub trait Batch: Send + Sync + 'static {
  fn name(&self) -> &'static str;

  /// Process every selected entity as of `now`.
  async fn run(&self, now: DateTime<Utc>) -> BatchReport;
}

/// Skip result for an entity the tracker says not to touch this cycle.
pub(crate) fn gate(tracker: &RetryTracker, entity: &str, now: DateTime<Utc>) -> Option<EntityResult> {
  match tracker.eligibility(entity, now) {
    Eligibility::Ready => None,
    Eligibility::Deferred(_) => Some(EntityResult::skipped(entity)),
    Eligibility::Quarantined => Some(EntityResult {
      entity_id: entity.to_string(),
      outcome: EntityOutcome::Quarantined,
      error: tracker.record(entity).map(|r| r.last_error),
    }),
  }
}

/// Register a per-entity failure, alert operations once on quarantine.
pub(crate) async fn fail_entity(
  batch: &'static str,
  tracker: &RetryTracker,
  audit: &AuditService,
  entity: &str,
  err: &LedgerError,
  now: DateTime<Utc>,
) -> EntityResult {
  let (decision, attempts) = tracker.record_failure(entity, err, now);
  match decision {
    RetryDecision::RetryAt(at) => {
      warn!(
        batch,
        entity_id = %entity,
        attempt = attempts,
        error = %err,
        retry_at = %at,
        "Entity failed, will retry"
      );
    }
    RetryDecision::Quarantine => {
      error!(
        batch,
        entity_id = %entity,
        attempt = attempts,
        error = %err,
        "Entity quarantined"
      );
      audit
        .alert_operations(Notification::new(
          format!("{batch}: entity quarantined"),
          format!("{entity} failed {attempts} time(s): {err}"),
          Severity::Warning,
        ))
        .await;
    }
  }
  EntityResult {
    entity_id: entity.to_string(),
    outcome: EntityOutcome::Failed,
    error: Some(err.to_string()),
  }
}

/// Best-effort user notice.
pub(crate) async fn notify_user(sink: &dyn NotificationSink, user: &str, notification: Notification) {
  if let Err(e) = sink
    .send(&NotifyTarget::User(user.to_string()), &notification)
    .await
  {
    warn!(user_id = %user, title = %notification.title, error = %e, "Failed to notify user");
  }
}

/// Drives one batch from its trigger until shutdown.
pub struct BatchScheduler<B: Batch> {
  batch: Arc<B>,
  trigger: Trigger,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<B: Batch> BatchScheduler<B> {
  pub fn new(batch: Arc<B>, trigger: Trigger) -> Self {
    Self {
      batch,
      trigger,
      metrics: None,
    }
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Run the batch once and record the report.
  pub async fn run_once(&self, now: DateTime<Utc>) -> BatchReport {
    let report = self.batch.run(now).await;

    info!(
      batch = report.batch,
      processed = report.processed,
      settled = report.settled,
      failed = report.failed,
      skipped = report.skipped,
      quarantined = report.quarantined,
      "Batch run complete"
    );

    if let Some(metrics) = &self.metrics {
      metrics.batch_runs.with_label_values(&[report.batch]).inc();
      for result in &report.results {
        metrics
          .batch_entities
          .with_label_values(&[report.batch, result.outcome.as_str()])
          .inc();
      }
      #[allow(clippy::cast_precision_loss)]
      let finished_at = Utc::now().timestamp() as f64;
      metrics
        .batch_last_run
        .with_label_values(&[report.batch])
        .set(finished_at);
    }

    report
  }

  /// Sleep until each fire time, run, repeat. Exits on shutdown.
  #[instrument(skip_all, fields(batch = self.batch.name()))]
  pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
    info!(trigger = ?self.trigger, "Batch scheduler started");
    loop {
      let now = Utc::now();
      let next = self.trigger.next_after(now);
      let wait = (next - now).to_std().unwrap_or_default();

      tokio::select! {
        () = tokio::time::sleep(wait) => {
          self.run_once(Utc::now()).await;
        }
        _ = shutdown_rx.recv() => {
          info!("Batch scheduler shutting down");
          break;
        }
      }
    }
  }
}
