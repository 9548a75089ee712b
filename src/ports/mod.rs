//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the domain/usecases layer
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `WalletProvider`: External cash/bank balances (source of truth)
//! - `LedgerStore` / `BillingRepository`: Atomic procedures and billing CRUD
//! - `AuditRepository`: Append-only audit log
//! - `NotificationSink`: User notices and operational alerts

pub mod audit;
pub mod notifier;
pub mod store;
pub mod wallet;
