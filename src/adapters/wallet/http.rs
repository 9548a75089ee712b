//! Wallet HTTP Client - Rate-limited REST Wallet Provider
//!
//! Wraps reqwest with a concurrency cap, a request-rate limiter and
//! retries with exponential backoff.
//!
//! Endpoints:
//! - `GET   {base}/guilds/{community}/users/{user}` returns `{cash, bank}`
//! - `PATCH {base}/guilds/{community}/users/{user}` with `{cash|bank: ±x, reason}`
//!
//! A PATCH carries a delta, so it is resent only when the provider
//! cannot have applied it: a 429 or a failed connection. A timeout or a
//! 5xx on a PATCH ends the call with `Unreachable` straight away.

use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::config::WalletConfig;
use crate::domain::money::{Amount, Balance, Pocket};
use crate::ports::wallet::{WalletError, WalletProvider};

/// Configuration for the wallet HTTP client.
#[derive(Debug, Clone)]
pub struct HttpWalletConfig {
  pub base_url: String,
  pub token: String,
  pub timeout: Duration,
  pub max_concurrent: usize,
  /// Maximum retries on transient errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
  pub requests_per_second: NonZeroU32,
}

impl HttpWalletConfig {
  /// Build from the `[wallet]` section, reading the token from the environment.
  pub fn from_config(cfg: &WalletConfig) -> Result<Self> {
    let token = std::env::var(&cfg.token_env)
      .with_context(|| format!("Wallet token env var {} is not set", cfg.token_env))?;
    let requests_per_second =
      NonZeroU32::new(cfg.requests_per_second).context("wallet.requests_per_second must be > 0")?;

    Ok(Self {
      base_url: cfg.base_url.trim_end_matches('/').to_string(),
      token,
      timeout: Duration::from_millis(cfg.timeout_ms),
      max_concurrent: cfg.max_concurrent,
      max_retries: cfg.max_retries,
      retry_base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
      requests_per_second,
    })
  }
}

/// Wire shape of a wallet user.
#[derive(Debug, Deserialize)]
struct WalletUser {
  cash: Amount,
  bank: Amount,
}

impl From<WalletUser> for Balance {
  fn from(user: WalletUser) -> Self {
    Self::new(user.cash, user.bank)
  }
}

/// Whether a request may be resent after an ambiguous failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
  /// Reads: resend on any transient failure.
  Always,
  /// Balance changes: resend only when the provider did not apply it.
  OnlyUnapplied,
}

/// Convert a delta to the wire number, refusing any rounding.
fn wire_amount(delta: Amount) -> Result<f64, WalletError> {
  let value = delta.to_f64().ok_or(WalletError::InvalidAmount(delta))?;
  match Decimal::from_str(&value.to_string()) {
    Ok(back) if back == delta => Ok(value),
    _ => Err(WalletError::InvalidAmount(delta)),
  }
}

/// Rate-limited HTTP client for the wallet provider.
pub struct HttpWalletClient {
  http: Client,
  config: HttpWalletConfig,
  /// Concurrency limiter.
  semaphore: Arc<Semaphore>,
  /// Sustained request rate limiter.
  limiter: DefaultDirectRateLimiter,
}

impl HttpWalletClient {
  pub fn new(config: HttpWalletConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(config.max_concurrent)
      .build()
      .context("Failed to build HTTP client")?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
    let limiter = RateLimiter::direct(Quota::per_second(config.requests_per_second));

    Ok(Self {
      http,
      config,
      semaphore,
      limiter,
    })
  }

  fn user_url(&self, community: &str, user: &str) -> String {
    format!("{}/guilds/{community}/users/{user}", self.config.base_url)
  }

  async fn patch(
    &self,
    community: &str,
    user: &str,
    delta: Amount,
    reason: &str,
    pocket: Pocket,
  ) -> Result<Balance, WalletError> {
    let delta = wire_amount(delta)?;
    let mut body = serde_json::Map::new();
    body.insert(pocket.to_string(), serde_json::json!(delta));
    body.insert("reason".to_string(), serde_json::json!(reason));

    let request = self
      .http
      .patch(self.user_url(community, user))
      .json(&serde_json::Value::Object(body));
    self.execute_with_retry(request, user, Replay::OnlyUnapplied).await
  }

  /// Execute request with auth, rate limiting, and retries.
  async fn execute_with_retry(
    &self,
    request: RequestBuilder,
    user: &str,
    replay: Replay,
  ) -> Result<Balance, WalletError> {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .context("Semaphore closed")?;

    let mut last_error = None;

    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis(), "Retrying wallet request");
        sleep(delay).await;
      }

      self.limiter.until_ready().await;

      let req = request
        .try_clone()
        .context("Failed to clone request")?
        .header("Authorization", &self.config.token);

      match req.send().await {
        Ok(response) => match response.status() {
          status if status.is_success() => {
            let user: WalletUser = response
              .json()
              .await
              .context("Failed to decode wallet response")?;
            return Ok(user.into());
          }
          StatusCode::NOT_FOUND => return Err(WalletError::UnknownUser(user.to_string())),
          StatusCode::TOO_MANY_REQUESTS => {
            warn!("Rate limited by wallet provider, backing off");
            last_error = Some(anyhow::anyhow!("Rate limited"));
          }
          status if status.is_server_error() => {
            if replay == Replay::OnlyUnapplied {
              warn!(status = %status, "Wallet provider failed a balance change, outcome unknown");
              return Err(WalletError::Unreachable(anyhow::anyhow!(
                "server error {status} on a balance change, not resent"
              )));
            }
            warn!(status = %status, attempt, "Wallet provider server error, retrying");
            last_error = Some(anyhow::anyhow!("Server error: {status}"));
          }
          status => {
            let message = response.text().await.unwrap_or_default();
            return Err(WalletError::Rejected {
              status: status.as_u16(),
              message,
            });
          }
        },
        Err(e) if replay == Replay::OnlyUnapplied && !e.is_connect() => {
          warn!(error = %e, "Balance change request failed after it was sent, outcome unknown");
          return Err(WalletError::Unreachable(
            anyhow::Error::new(e).context("balance change not resent"),
          ));
        }
        Err(e) => {
          warn!(error = %e, attempt, "Wallet request failed");
          last_error = Some(e.into());
        }
      }
    }

    Err(WalletError::Unreachable(
      last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")),
    ))
  }
}

#[async_trait]
impl WalletProvider for HttpWalletClient {
  #[instrument(skip(self))]
  async fn get_balance(&self, community: &str, user: &str) -> Result<Balance, WalletError> {
    let request = self.http.get(self.user_url(community, user));
    self.execute_with_retry(request, user, Replay::Always).await
  }

  #[instrument(skip(self, reason))]
  async fn credit(
    &self,
    community: &str,
    user: &str,
    amount: Amount,
    reason: &str,
    pocket: Pocket,
  ) -> Result<Balance, WalletError> {
    self.patch(community, user, amount, reason, pocket).await
  }

  #[instrument(skip(self, reason))]
  async fn debit(
    &self,
    community: &str,
    user: &str,
    amount: Amount,
    reason: &str,
    pocket: Pocket,
  ) -> Result<Balance, WalletError> {
    self.patch(community, user, -amount, reason, pocket).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use axum::Router;
  use axum::extract::State;
  use axum::http::StatusCode as AxumStatus;
  use axum::routing::get;
  use rust_decimal_macros::dec;

  use super::*;

  fn config(base_url: &str) -> HttpWalletConfig {
    HttpWalletConfig {
      base_url: base_url.into(),
      token: "t".into(),
      timeout: Duration::from_millis(200),
      max_concurrent: 1,
      max_retries: 1,
      retry_base_delay: Duration::from_millis(1),
      requests_per_second: NonZeroU32::MIN,
    }
  }

  /// Fake provider: counts PATCHes it applied and misbehaves on the first call.
  #[derive(Clone, Copy)]
  enum FirstReply {
    Slow,
    ServerError,
    RateLimited,
  }

  #[derive(Clone)]
  struct Fake {
    first: FirstReply,
    calls: Arc<AtomicUsize>,
    applied: Arc<AtomicUsize>,
  }

  async fn answer(fake: &Fake, applies: bool) -> (AxumStatus, String) {
    let n = fake.calls.fetch_add(1, Ordering::SeqCst);
    if n == 0 {
      match fake.first {
        FirstReply::Slow => {
          if applies {
            fake.applied.fetch_add(1, Ordering::SeqCst);
          }
          sleep(Duration::from_millis(500)).await;
        }
        FirstReply::ServerError => {
          if applies {
            fake.applied.fetch_add(1, Ordering::SeqCst);
          }
          return (AxumStatus::INTERNAL_SERVER_ERROR, String::new());
        }
        FirstReply::RateLimited => return (AxumStatus::TOO_MANY_REQUESTS, String::new()),
      }
    } else if applies {
      fake.applied.fetch_add(1, Ordering::SeqCst);
    }
    (AxumStatus::OK, r#"{"cash": 750, "bank": 0}"#.to_string())
  }

  async fn fake_get(State(fake): State<Fake>) -> (AxumStatus, String) {
    answer(&fake, false).await
  }

  async fn fake_patch(State(fake): State<Fake>) -> (AxumStatus, String) {
    answer(&fake, true).await
  }

  async fn serve(first: FirstReply) -> (String, Fake) {
    let fake = Fake {
      first,
      calls: Arc::new(AtomicUsize::new(0)),
      applied: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
      .route("/guilds/:community/users/:user", get(fake_get).patch(fake_patch))
      .with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), fake)
  }

  fn client(base_url: &str) -> HttpWalletClient {
    let mut cfg = config(base_url);
    cfg.timeout = Duration::from_millis(100);
    cfg.max_retries = 3;
    cfg.requests_per_second = NonZeroU32::new(100).unwrap();
    HttpWalletClient::new(cfg).unwrap()
  }

  #[test]
  fn test_user_url() {
    let client = HttpWalletClient::new(config("http://127.0.0.1:9")).unwrap();
    assert_eq!(client.user_url("g1", "u1"), "http://127.0.0.1:9/guilds/g1/users/u1");
  }

  #[test]
  fn test_wire_user_accepts_numbers() {
    let user: WalletUser = serde_json::from_str(r#"{"cash": -12.5, "bank": 300, "total": 287.5}"#).unwrap();
    let balance = Balance::from(user);
    assert_eq!(balance.cash.to_string(), "-12.5");
    assert_eq!(balance.bank.to_string(), "300");
  }

  #[test]
  fn test_wire_amount_refuses_rounding() {
    assert_eq!(wire_amount(dec!(250.50)).unwrap(), 250.5);
    assert_eq!(wire_amount(dec!(-99.99)).unwrap(), -99.99);
    assert!(matches!(
      wire_amount(dec!(0.12345678901234567891)),
      Err(WalletError::InvalidAmount(_))
    ));
  }

  #[tokio::test]
  async fn test_unreachable_after_retries() {
    let client = HttpWalletClient::new(config("http://127.0.0.1:9")).unwrap();
    let err = client.get_balance("g1", "u1").await.unwrap_err();
    assert!(matches!(err, WalletError::Unreachable(_)));
  }

  #[tokio::test]
  async fn test_slow_debit_is_not_resent() {
    let (base, fake) = serve(FirstReply::Slow).await;
    let err = client(&base)
      .debit("g", "alice", dec!(250), "test", Pocket::Cash)
      .await
      .unwrap_err();

    assert!(matches!(err, WalletError::Unreachable(_)));
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fake.applied.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_failed_credit_is_not_resent() {
    let (base, fake) = serve(FirstReply::ServerError).await;
    let err = client(&base)
      .credit("g", "alice", dec!(10), "test", Pocket::Bank)
      .await
      .unwrap_err();

    assert!(matches!(err, WalletError::Unreachable(_)));
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_rate_limited_debit_is_resent_once_applied() {
    let (base, fake) = serve(FirstReply::RateLimited).await;
    let balance = client(&base)
      .debit("g", "alice", dec!(250), "test", Pocket::Cash)
      .await
      .unwrap();

    assert_eq!(balance.cash, dec!(750));
    assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
    assert_eq!(fake.applied.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_slow_read_is_retried() {
    let (base, fake) = serve(FirstReply::Slow).await;
    let balance = client(&base).get_balance("g", "alice").await.unwrap();

    assert_eq!(balance.cash, dec!(750));
    assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
  }
}
