//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::info;

use super::{AppConfig, WalletMode};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    community = %config.service.community_id,
    wallet_mode = ?config.wallet.mode,
    dry_run = config.service.dry_run,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content)
    .with_context(|| "Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Parseable batch triggers
/// - Fractions inside their ranges
/// - Positive thresholds and retry bounds
/// - A usable wallet endpoint in HTTP mode
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    !config.service.community_id.is_empty(),
    "service.community_id must not be empty"
  );

  // Wallet validation
  if config.wallet.mode == WalletMode::Http {
    anyhow::ensure!(
      !config.wallet.base_url.is_empty(),
      "wallet.base_url must not be empty in http mode"
    );
  }
  anyhow::ensure!(
    config.wallet.max_concurrent > 0,
    "wallet.max_concurrent must be positive"
  );
  anyhow::ensure!(
    config.wallet.requests_per_second > 0,
    "wallet.requests_per_second must be positive"
  );
  anyhow::ensure!(
    config.wallet.timeout_ms > 0,
    "wallet.timeout_ms must be positive"
  );

  // Schedule validation
  config
    .schedule
    .parse()
    .with_context(|| "Invalid batch trigger in [schedule]")?;

  // Billing validation
  anyhow::ensure!(
    config.billing.min_payment_fraction > Decimal::ZERO
      && config.billing.min_payment_fraction <= Decimal::ONE,
    "billing.min_payment_fraction must be in (0, 1], got {}",
    config.billing.min_payment_fraction
  );
  anyhow::ensure!(
    config.billing.default_interest_rate >= Decimal::ZERO,
    "billing.default_interest_rate must be >= 0, got {}",
    config.billing.default_interest_rate
  );
  anyhow::ensure!(
    config.billing.pvp_tax_rate >= Decimal::ZERO && config.billing.pvp_tax_rate < Decimal::ONE,
    "billing.pvp_tax_rate must be in [0, 1), got {}",
    config.billing.pvp_tax_rate
  );
  anyhow::ensure!(
    !config.billing.treasury_account.is_empty(),
    "billing.treasury_account must not be empty"
  );

  // Anomaly validation
  anyhow::ensure!(
    config.anomaly.large_transaction > Decimal::ZERO,
    "anomaly.large_transaction must be positive"
  );
  anyhow::ensure!(
    (1..=86_400).contains(&config.anomaly.velocity_window_secs),
    "anomaly.velocity_window_secs must be within 1..=86400"
  );
  anyhow::ensure!(
    config.anomaly.suspicious_win_ratio > Decimal::ZERO
      && config.anomaly.suspicious_win_ratio <= Decimal::ONE,
    "anomaly.suspicious_win_ratio must be in (0, 1], got {}",
    config.anomaly.suspicious_win_ratio
  );

  // Retry validation
  anyhow::ensure!(
    config.retry.max_attempts > 0,
    "retry.max_attempts must be positive"
  );
  anyhow::ensure!(
    config.retry.base_backoff_secs > 0
      && config.retry.base_backoff_secs <= config.retry.max_backoff_secs,
    "retry backoff must satisfy 0 < base_backoff_secs <= max_backoff_secs"
  );

  // Persistence validation
  anyhow::ensure!(
    !config.persistence.data_dir.is_empty(),
    "persistence.data_dir must not be empty"
  );
  anyhow::ensure!(
    config.persistence.snapshot_interval_seconds > 0,
    "persistence.snapshot_interval_seconds must be positive"
  );

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  const MINIMAL: &str = r#"
    [service]
    name = "economy-ledger"
    community_id = "guild_1"

    [wallet]
    base_url = "https://wallet.example.com/v1"
  "#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = parse_config(MINIMAL).unwrap();
    assert_eq!(config.wallet.mode, WalletMode::Http);
    assert_eq!(config.billing.min_payment_fraction, dec!(0.25));
    assert_eq!(config.anomaly.velocity_max_entries, 10);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.schedule.overdraft_sweep, "every:10m");
    assert!(!config.service.dry_run);
    assert!(config.notifications.webhook_url.is_none());
  }

  #[test]
  fn test_rejects_bad_trigger() {
    let content = format!("{MINIMAL}\n[schedule]\noverdraft_sweep = \"hourly\"\n");
    assert!(parse_config(&content).is_err());
  }

  #[test]
  fn test_rejects_out_of_range_fraction() {
    let content = format!("{MINIMAL}\n[billing]\nmin_payment_fraction = 1.5\n");
    assert!(parse_config(&content).is_err());
  }

  #[test]
  fn test_rejects_unbounded_values() {
    for section in [
      "[schedule]\ncredit_settlement = \"every:5é\"\n",
      "[schedule]\ntransfer_settlement = \"every:9999999999999h\"\n",
      "[anomaly]\nvelocity_window_secs = 9223372036854775807\n",
    ] {
      let content = format!("{MINIMAL}\n{section}");
      assert!(parse_config(&content).is_err(), "accepted {section}");
    }
  }

  #[test]
  fn test_local_mode_needs_no_url() {
    let content = r#"
      [service]
      name = "economy-ledger"
      community_id = "guild_1"

      [wallet]
      mode = "local"
    "#;
    let config = parse_config(content).unwrap();
    assert_eq!(config.wallet.mode, WalletMode::Local);
  }
}
