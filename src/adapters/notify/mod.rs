//! Notification Adapters
//!
//! - `WebhookNotifier`: embed messages posted to a webhook
//! - `LogNotifier`: notifications written to the log

pub mod log;
pub mod webhook;

pub use log::LogNotifier;
pub use webhook::WebhookNotifier;
