//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, file I/O, in-process state).
//! Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `metrics`: Prometheus metrics export and health checks
//! - `notify`: Webhook and log notification sinks
//! - `persistence`: In-memory store, state snapshots and audit logs
//! - `wallet`: Wallet provider REST client

pub mod metrics;
pub mod notify;
pub mod persistence;
pub mod wallet;
