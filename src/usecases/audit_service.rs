//! Audit Service - Append-only Log plus Anomaly Detector
//!
//! Every executed ledger or batch operation appends exactly one entry
//! through [`AuditService::record`]. After the append, three scans run
//! in a background task:
//! - Large transaction: amount or payout above the threshold
//! - Velocity: too many entries for one user inside the window
//! - Win ratio: lifetime ratio too high over a meaningful sample
//!
//! Alert delivery is best-effort. A failed scan or alert is logged and
//! never reaches the operation that produced the entry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::anomaly::{
  Anomaly, AnomalyThresholds, check_large_transaction, check_velocity, check_win_ratio,
};
use crate::domain::audit::{AuditEntry, NewAuditEntry};
use crate::domain::money::{Amount, UserId};
use crate::ports::audit::AuditRepository;
use crate::ports::notifier::{Notification, NotificationSink, NotifyTarget, Severity};
use crate::ports::store::GameStatsSource;

/// Maximum rows returned by [`AuditService::suspicious_users`].
const SUSPICIOUS_USERS_LIMIT: usize = 10;

/// One row of the suspicious-users report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousUser {
  pub user_id: UserId,
  /// Entries above the large-transaction threshold inside the window.
  pub large_transactions: usize,
  /// Sum of the headline amounts of those entries.
  pub total_amount: Amount,
}

/// Audit log writer and anomaly detector.
#[derive(Clone)]
pub struct AuditService {
  repo: Arc<dyn AuditRepository>,
  stats: Arc<dyn GameStatsSource>,
  alerts: Arc<dyn NotificationSink>,
  thresholds: AnomalyThresholds,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl AuditService {
  pub fn new(
    repo: Arc<dyn AuditRepository>,
    stats: Arc<dyn GameStatsSource>,
    alerts: Arc<dyn NotificationSink>,
    thresholds: AnomalyThresholds,
  ) -> Self {
    Self {
      repo,
      stats,
      alerts,
      thresholds,
      metrics: None,
    }
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  pub const fn thresholds(&self) -> &AnomalyThresholds {
    &self.thresholds
  }

  /// Append an entry and start the anomaly scans without waiting on them.
  pub async fn record(&self, new: NewAuditEntry) -> anyhow::Result<AuditEntry> {
    let (entry, _scan) = self.record_with_scan(new).await?;
    Ok(entry)
  }

  /// Append an entry; the returned handle resolves to the anomalies found.
  #[instrument(skip(self, new), fields(user_id = %new.user_id, kind = %new.kind))]
  pub async fn record_with_scan(
    &self,
    new: NewAuditEntry,
  ) -> anyhow::Result<(AuditEntry, JoinHandle<Vec<Anomaly>>)> {
    let entry = new.into_entry(Utc::now());
    self.repo.append(&entry).await?;
    debug!(entry_id = %entry.id, amount = %entry.amount, "Audit entry appended");

    let this = self.clone();
    let scanned = entry.clone();
    let handle = tokio::spawn(async move { this.scan_and_alert(&scanned).await });
    Ok((entry, handle))
  }

  /// Run every scan for an appended entry and alert on each hit.
  pub async fn scan_and_alert(&self, entry: &AuditEntry) -> Vec<Anomaly> {
    let anomalies = self.scan(entry).await;
    for anomaly in &anomalies {
      warn!(
        user_id = %entry.user_id,
        kind = anomaly.kind(),
        details = %anomaly.details(),
        "Anomaly detected"
      );
      if let Some(metrics) = &self.metrics {
        metrics.record_anomaly(anomaly.kind());
      }
      let body = serde_json::to_string_pretty(&anomaly.details())
        .unwrap_or_else(|_| anomaly.details().to_string());
      self
        .alert_operations(Notification::new(anomaly.title(), body, Severity::Alert))
        .await;
    }
    anomalies
  }

  /// Evaluate the three scans. Read failures drop that scan only.
  pub async fn scan(&self, entry: &AuditEntry) -> Vec<Anomaly> {
    let mut found = Vec::new();

    if let Some(hit) = check_large_transaction(entry, &self.thresholds) {
      found.push(hit);
    }

    let since = entry.created_at - Duration::seconds(self.thresholds.velocity_window_secs);
    match self.repo.count_since(&entry.user_id, since).await {
      Ok(count) => found.extend(check_velocity(&entry.user_id, count, &self.thresholds)),
      Err(e) => warn!(user_id = %entry.user_id, error = %e, "Velocity scan failed"),
    }

    if entry.kind.is_game() {
      match self.stats.game_stats(&entry.user_id).await {
        Ok(stats) => found.extend(check_win_ratio(&entry.user_id, &stats, &self.thresholds)),
        Err(e) => warn!(user_id = %entry.user_id, error = %e, "Win ratio scan failed"),
      }
    }

    found
  }

  /// Send to the operations channel; failures are logged and counted.
  pub async fn alert_operations(&self, notification: Notification) {
    if let Err(e) = self
      .alerts
      .send(&NotifyTarget::Operations, &notification)
      .await
    {
      warn!(title = %notification.title, error = %e, "Failed to deliver operational alert");
      if let Some(metrics) = &self.metrics {
        metrics.alert_failures.inc();
      }
    }
  }

  /// Newest-first entries for a user.
  pub async fn history(&self, user: &str, limit: usize) -> anyhow::Result<Vec<AuditEntry>> {
    self.repo.history(user, limit).await
  }

  /// Users with the most large-transaction entries in the trailing window.
  #[instrument(skip(self))]
  pub async fn suspicious_users(
    &self,
    window: Duration,
    now: DateTime<Utc>,
  ) -> anyhow::Result<Vec<SuspiciousUser>> {
    let entries = self.repo.entries_since(now - window).await?;

    let mut by_user: HashMap<UserId, SuspiciousUser> = HashMap::new();
    for entry in entries {
      let amount = entry.headline_amount();
      if amount <= self.thresholds.large_transaction {
        continue;
      }
      let row = by_user
        .entry(entry.user_id.clone())
        .or_insert_with(|| SuspiciousUser {
          user_id: entry.user_id.clone(),
          large_transactions: 0,
          total_amount: Amount::ZERO,
        });
      row.large_transactions += 1;
      row.total_amount += amount;
    }

    let mut rows: Vec<SuspiciousUser> = by_user.into_values().collect();
    rows.sort_by(|a, b| {
      b.large_transactions
        .cmp(&a.large_transactions)
        .then_with(|| b.total_amount.cmp(&a.total_amount))
        .then_with(|| a.user_id.cmp(&b.user_id))
    });
    rows.truncate(SUSPICIOUS_USERS_LIMIT);
    Ok(rows)
  }

  /// Append and log on failure. Used where the money already moved.
  pub async fn record_or_log(&self, new: NewAuditEntry) {
    let user = new.user_id.clone();
    let kind = new.kind;
    if let Err(e) = self.record(new).await {
      error!(user_id = %user, kind = %kind, error = %e, "Failed to append audit entry");
    }
  }
}
