//! Wallet Provider Adapters
//!
//! The HTTP client talks to the external wallet provider. Local mode
//! uses `persistence::InMemoryStore` directly.

pub mod http;

pub use http::{HttpWalletClient, HttpWalletConfig};
