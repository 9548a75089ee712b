//! Notification Sink Port - Fire-and-forget Messages
//!
//! Delivers user notices (payment taken, card frozen, transfer received)
//! and operational alerts. No delivery guarantee: callers log a failed
//! send and move on.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::money::UserId;

/// Who receives a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NotifyTarget {
  /// Direct message to a user.
  User(UserId),
  /// The fixed operations/alerts channel.
  Operations,
}

/// Tone of a notification, used by sinks for coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Good,
  Warning,
  Alert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub severity: Severity,
}

impl Notification {
  pub fn new(title: impl Into<String>, body: impl Into<String>, severity: Severity) -> Self {
    Self {
      title: title.into(),
      body: body.into(),
      severity,
    }
  }
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
  async fn send(&self, target: &NotifyTarget, notification: &Notification) -> anyhow::Result<()>;
}
