//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. Batch triggers,
//! billing constants and anomaly thresholds are configured here at
//! process start; nothing in this core adjusts them at runtime.

pub mod loader;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::anomaly::AnomalyThresholds;
use crate::domain::retry::RetryPolicy;
use crate::domain::schedule::{Trigger, TriggerParseError};

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and runtime mode.
  pub service: ServiceConfig,
  /// Wallet provider connection.
  pub wallet: WalletConfig,
  /// Batch trigger expressions.
  #[serde(default)]
  pub schedule: ScheduleConfig,
  /// Billing constants.
  #[serde(default)]
  pub billing: BillingConfig,
  /// Anomaly detector thresholds.
  #[serde(default)]
  pub anomaly: AnomalyConfig,
  /// Per-entity retry policy for batches.
  #[serde(default)]
  pub retry: RetryConfig,
  /// Notification delivery.
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// Persistence configuration.
  #[serde(default)]
  pub persistence: PersistenceConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Wallet community (guild) this instance bills.
  pub community_id: String,
  /// Compute batch plans without moving money.
  #[serde(default)]
  pub dry_run: bool,
}

/// Which wallet adapter to wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletMode {
  /// Remote wallet provider over HTTP.
  Http,
  /// In-process store acts as the wallet (development, tests).
  Local,
}

/// Wallet provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
  #[serde(default = "default_wallet_mode")]
  pub mode: WalletMode,
  /// Provider REST base URL.
  #[serde(default)]
  pub base_url: String,
  /// Environment variable holding the API token.
  #[serde(default = "default_token_env")]
  pub token_env: String,
  /// Request timeout in milliseconds.
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// Maximum in-flight requests.
  #[serde(default = "default_max_concurrent")]
  pub max_concurrent: usize,
  /// Retries on transient errors.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  #[serde(default = "default_retry_base_delay_ms")]
  pub retry_base_delay_ms: u64,
  /// Sustained request rate towards the provider.
  #[serde(default = "default_requests_per_second")]
  pub requests_per_second: u32,
}

/// Batch trigger expressions (see `domain::schedule`).
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
  #[serde(default = "default_credit_trigger")]
  pub credit_settlement: String,
  #[serde(default = "default_transfer_trigger")]
  pub transfer_settlement: String,
  #[serde(default = "default_overdraft_trigger")]
  pub overdraft_sweep: String,
}

/// Parsed batch triggers.
#[derive(Debug, Clone, Copy)]
pub struct Triggers {
  pub credit_settlement: Trigger,
  pub transfer_settlement: Trigger,
  pub overdraft_sweep: Trigger,
}

impl ScheduleConfig {
  pub fn parse(&self) -> Result<Triggers, TriggerParseError> {
    Ok(Triggers {
      credit_settlement: self.credit_settlement.parse()?,
      transfer_settlement: self.transfer_settlement.parse()?,
      overdraft_sweep: self.overdraft_sweep.parse()?,
    })
  }
}

/// Billing constants.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
  /// Share of the outstanding balance due each week.
  #[serde(default = "default_min_payment_fraction")]
  pub min_payment_fraction: Decimal,
  /// Weekly penalty rate for lines without a stored rate.
  #[serde(default = "default_interest_rate")]
  pub default_interest_rate: Decimal,
  /// Share of a duel bet kept by the treasury.
  #[serde(default = "default_pvp_tax_rate")]
  pub pvp_tax_rate: Decimal,
  /// Account that receives duel tax.
  #[serde(default = "default_treasury_account")]
  pub treasury_account: String,
}

/// Anomaly detector thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyConfig {
  #[serde(default = "default_large_transaction")]
  pub large_transaction: Decimal,
  #[serde(default = "default_velocity_max_entries")]
  pub velocity_max_entries: usize,
  #[serde(default = "default_velocity_window_secs")]
  pub velocity_window_secs: i64,
  #[serde(default = "default_suspicious_win_ratio")]
  pub suspicious_win_ratio: Decimal,
  #[serde(default = "default_min_games")]
  pub min_games_for_ratio: u64,
}

impl AnomalyConfig {
  pub fn thresholds(&self) -> AnomalyThresholds {
    AnomalyThresholds {
      large_transaction: self.large_transaction,
      velocity_max_entries: self.velocity_max_entries,
      velocity_window_secs: self.velocity_window_secs,
      suspicious_win_ratio: self.suspicious_win_ratio,
      min_games_for_ratio: self.min_games_for_ratio,
    }
  }
}

/// Per-entity retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_base_backoff")]
  pub base_backoff_secs: i64,
  #[serde(default = "default_max_backoff")]
  pub max_backoff_secs: i64,
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.max_attempts,
      base_backoff: Duration::seconds(self.base_backoff_secs),
      max_backoff: Duration::seconds(self.max_backoff_secs),
    }
  }
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  /// Webhook for user notices and alerts. Absent = log only.
  pub webhook_url: Option<String>,
  /// Label of the operations channel in logs and payloads.
  #[serde(default = "default_ops_channel")]
  pub ops_channel: String,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for state snapshots and audit JSONL files.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
  /// State snapshot interval (seconds).
  #[serde(default = "default_snapshot_interval")]
  pub snapshot_interval_seconds: u64,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      credit_settlement: default_credit_trigger(),
      transfer_settlement: default_transfer_trigger(),
      overdraft_sweep: default_overdraft_trigger(),
    }
  }
}

impl Default for BillingConfig {
  fn default() -> Self {
    Self {
      min_payment_fraction: default_min_payment_fraction(),
      default_interest_rate: default_interest_rate(),
      pvp_tax_rate: default_pvp_tax_rate(),
      treasury_account: default_treasury_account(),
    }
  }
}

impl Default for AnomalyConfig {
  fn default() -> Self {
    Self {
      large_transaction: default_large_transaction(),
      velocity_max_entries: default_velocity_max_entries(),
      velocity_window_secs: default_velocity_window_secs(),
      suspicious_win_ratio: default_suspicious_win_ratio(),
      min_games_for_ratio: default_min_games(),
    }
  }
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      base_backoff_secs: default_base_backoff(),
      max_backoff_secs: default_max_backoff(),
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      webhook_url: None,
      ops_channel: default_ops_channel(),
    }
  }
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
      snapshot_interval_seconds: default_snapshot_interval(),
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_wallet_mode() -> WalletMode {
  WalletMode::Http
}

fn default_token_env() -> String {
  "WALLET_API_TOKEN".to_string()
}

fn default_timeout_ms() -> u64 {
  10_000
}

fn default_max_concurrent() -> usize {
  4
}

fn default_max_retries() -> u32 {
  3
}

fn default_retry_base_delay_ms() -> u64 {
  250
}

fn default_requests_per_second() -> u32 {
  5
}

fn default_credit_trigger() -> String {
  "weekly:sun@00:00".to_string()
}

fn default_transfer_trigger() -> String {
  "every:1h".to_string()
}

fn default_overdraft_trigger() -> String {
  "every:10m".to_string()
}

fn default_min_payment_fraction() -> Decimal {
  Decimal::new(25, 2)
}

fn default_interest_rate() -> Decimal {
  Decimal::new(5, 2)
}

fn default_pvp_tax_rate() -> Decimal {
  Decimal::new(5, 2)
}

fn default_treasury_account() -> String {
  "treasury".to_string()
}

fn default_large_transaction() -> Decimal {
  Decimal::from(5_000_000)
}

fn default_velocity_max_entries() -> usize {
  10
}

fn default_velocity_window_secs() -> i64 {
  60
}

fn default_suspicious_win_ratio() -> Decimal {
  Decimal::new(85, 2)
}

fn default_min_games() -> u64 {
  20
}

fn default_max_attempts() -> u32 {
  5
}

fn default_base_backoff() -> i64 {
  600
}

fn default_max_backoff() -> i64 {
  86_400
}

fn default_ops_channel() -> String {
  "ops".to_string()
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_snapshot_interval() -> u64 {
  60
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
