//! Wallet Provider Port - External Balance Source of Truth
//!
//! The wallet provider owns every user's spendable cash and bank pockets.
//! This core never stores those balances; batches read and move them
//! only through this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::error::LedgerError;
use crate::domain::money::{Amount, Balance, Pocket, UserId};

/// Wallet provider failures.
#[derive(Debug, Error)]
pub enum WalletError {
  /// The provider does not know this user.
  #[error("unknown wallet user {0}")]
  UnknownUser(UserId),
  /// The provider refused the request.
  #[error("wallet provider rejected request ({status}): {message}")]
  Rejected { status: u16, message: String },
  /// The amount cannot be sent without losing precision. Nothing was sent.
  #[error("amount {0} cannot be represented on the wallet wire")]
  InvalidAmount(Amount),
  /// Network failure, timeout or exhausted retries. For a balance change
  /// the provider may or may not have applied it.
  #[error("wallet provider unreachable: {0:#}")]
  Unreachable(#[from] anyhow::Error),
}

impl From<WalletError> for LedgerError {
  fn from(err: WalletError) -> Self {
    match err {
      WalletError::UnknownUser(user) => Self::NotFound(format!("wallet user {user}")),
      WalletError::InvalidAmount(amount) => {
        Self::Validation(format!("amount {amount} is not representable by the wallet provider"))
      }
      other => Self::ExternalProvider(other.to_string()),
    }
  }
}

/// Trait for wallet providers.
///
/// `community` scopes every call to one guild/server of the platform.
/// `reason` is shown to the user in the provider's own history.
#[async_trait]
pub trait WalletProvider: Send + Sync + 'static {
  /// Current cash and bank balances of a user.
  async fn get_balance(&self, community: &str, user: &str) -> Result<Balance, WalletError>;

  /// Add `amount` to one pocket. Returns the balance after the call.
  async fn credit(
    &self,
    community: &str,
    user: &str,
    amount: Amount,
    reason: &str,
    pocket: Pocket,
  ) -> Result<Balance, WalletError>;

  /// Remove `amount` from one pocket. Returns the balance after the call.
  async fn debit(
    &self,
    community: &str,
    user: &str,
    amount: Amount,
    reason: &str,
    pocket: Pocket,
  ) -> Result<Balance, WalletError>;
}
