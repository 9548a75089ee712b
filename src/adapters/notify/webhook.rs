//! Webhook Notifier - Embed Messages over HTTP
//!
//! Posts `{content, embeds: [{title, description, color}]}` to the
//! configured webhook. User notices mention the user in `content`.
//! Delivery is best-effort: one attempt, errors returned to the caller.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::ports::notifier::{Notification, NotificationSink, NotifyTarget, Severity};

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: String,
    embeds: [Embed<'a>; 1],
}

const fn color(severity: Severity) -> u32 {
    match severity {
        Severity::Good => 0x2E_CC71,
        Severity::Warning => 0xF1_C40F,
        Severity::Alert => 0xE7_4C3C,
    }
}

fn payload<'a>(ops_channel: &str, target: &NotifyTarget, notification: &'a Notification) -> WebhookPayload<'a> {
    let content = match target {
        NotifyTarget::User(user) => format!("<@{user}>"),
        NotifyTarget::Operations => format!("[{ops_channel}]"),
    };
    WebhookPayload {
        content,
        embeds: [Embed {
            title: &notification.title,
            description: &notification.body,
            color: color(notification.severity),
        }],
    }
}

pub struct WebhookNotifier {
    http: Client,
    url: String,
    ops_channel: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, ops_channel: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
            ops_channel: ops_channel.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn send(&self, target: &NotifyTarget, notification: &Notification) -> Result<()> {
        let body = payload(&self.ops_channel, target, notification);
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("Webhook request failed")?;

        let status = response.status();
        anyhow::ensure!(status.is_success(), "Webhook returned {status}");
        debug!(title = %notification.title, "Webhook notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_payload_mentions_user() {
        let n = Notification::new("Card frozen", "Pay up", Severity::Alert);
        let json = serde_json::to_value(payload("ops", &NotifyTarget::User("42".into()), &n)).unwrap();
        assert_eq!(json["content"], "<@42>");
        assert_eq!(json["embeds"][0]["title"], "Card frozen");
        assert_eq!(json["embeds"][0]["color"], 0x00E7_4C3C);
    }

    #[test]
    fn test_ops_payload_names_channel() {
        let n = Notification::new("Anomaly", "details", Severity::Warning);
        let json = serde_json::to_value(payload("alerts", &NotifyTarget::Operations, &n)).unwrap();
        assert_eq!(json["content"], "[alerts]");
    }
}
