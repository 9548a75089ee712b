//! In-flight Guard - Per-user Mutual Exclusion for Ledger Calls
//!
//! A process-local map from user id to a busy marker. Acquisition never
//! waits: a user that is already busy fails the call fast. Release is
//! tied to the lifetime of the returned [`GuardToken`], so every exit
//! path (success, error, panic unwinding) clears the marker.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::error::LedgerError;
use crate::domain::money::UserId;

/// Shared busy-marker map.
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
  busy: Arc<DashMap<UserId, ()>>,
}

impl InFlightGuard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark every user in `users` busy, or none of them.
  ///
  /// Duplicates are collapsed. On the first user already held, markers
  /// set by this call are rolled back and `ConcurrencyBusy` is returned.
  pub fn acquire(&self, users: &[&str]) -> Result<GuardToken, LedgerError> {
    let mut wanted: Vec<&str> = users.to_vec();
    wanted.sort_unstable();
    wanted.dedup();

    let mut token = GuardToken {
      busy: Arc::clone(&self.busy),
      held: Vec::with_capacity(wanted.len()),
    };

    for user in wanted {
      match self.busy.entry(user.to_string()) {
        Entry::Occupied(_) => {
          // Dropping the partial token releases what was taken so far.
          return Err(LedgerError::ConcurrencyBusy(user.to_string()));
        }
        Entry::Vacant(slot) => {
          slot.insert(());
          token.held.push(user.to_string());
        }
      }
    }

    Ok(token)
  }

  pub fn is_busy(&self, user: &str) -> bool {
    self.busy.contains_key(user)
  }

  pub fn in_flight(&self) -> usize {
    self.busy.len()
  }
}

/// Scoped ownership of one or more busy markers.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct GuardToken {
  busy: Arc<DashMap<UserId, ()>>,
  held: Vec<UserId>,
}

impl GuardToken {
  pub fn users(&self) -> &[UserId] {
    &self.held
  }
}

impl Drop for GuardToken {
  fn drop(&mut self) {
    for user in self.held.drain(..) {
      self.busy.remove(&user);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_second_acquire_is_busy() {
    let guard = InFlightGuard::new();
    let token = guard.acquire(&["alice"]).unwrap();
    assert_eq!(token.users(), ["alice".to_string()]);

    let err = guard.acquire(&["alice"]).unwrap_err();
    assert_eq!(err, LedgerError::ConcurrencyBusy("alice".to_string()));

    drop(token);
    assert!(!guard.is_busy("alice"));
    assert!(guard.acquire(&["alice"]).is_ok());
  }

  #[test]
  fn test_multi_user_acquire_is_all_or_none() {
    let guard = InFlightGuard::new();
    let bob = guard.acquire(&["bob"]).unwrap();

    assert!(guard.acquire(&["alice", "bob"]).is_err());
    assert!(!guard.is_busy("alice"));
    assert_eq!(guard.in_flight(), 1);

    drop(bob);
    let both = guard.acquire(&["bob", "alice"]).unwrap();
    assert_eq!(guard.in_flight(), 2);
    drop(both);
    assert_eq!(guard.in_flight(), 0);
  }

  #[test]
  fn test_duplicate_users_collapse() {
    let guard = InFlightGuard::new();
    let token = guard.acquire(&["carol", "carol"]).unwrap();
    assert_eq!(token.users().len(), 1);
  }

  #[test]
  fn test_release_on_panic() {
    let guard = InFlightGuard::new();
    let cloned = guard.clone();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
      let _token = cloned.acquire(&["dave"]).unwrap();
      panic!("boom");
    }));
    assert!(result.is_err());
    assert!(!guard.is_busy("dave"));
  }
}
