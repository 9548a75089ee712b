//! Log Notifier - Notifications Written to the Structured Log

use async_trait::async_trait;
use tracing::{info, warn};

use crate::ports::notifier::{Notification, NotificationSink, NotifyTarget, Severity};

/// Sink used when no webhook is configured.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    ops_channel: String,
}

impl LogNotifier {
    pub fn new(ops_channel: impl Into<String>) -> Self {
        Self {
            ops_channel: ops_channel.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, target: &NotifyTarget, notification: &Notification) -> anyhow::Result<()> {
        let recipient = match target {
            NotifyTarget::User(user) => user.as_str(),
            NotifyTarget::Operations => self.ops_channel.as_str(),
        };
        match notification.severity {
            Severity::Good => info!(
                recipient,
                title = %notification.title,
                body = %notification.body,
                "Notification"
            ),
            Severity::Warning | Severity::Alert => warn!(
                recipient,
                severity = ?notification.severity,
                title = %notification.title,
                body = %notification.body,
                "Notification"
            ),
        }
        Ok(())
    }
}
