//! Domain layer - Core ledger and billing models.
//!
//! Pure types and decision functions for the economy core: money,
//! credit lines, deferred transfers, prepaid instruments, savings accounts,
//! audit entries, anomaly rules, retry policy and batch triggers. Nothing
//! here performs I/O (hexagonal architecture inner ring).

pub mod anomaly;
pub mod audit;
pub mod credit;
pub mod error;
pub mod money;
pub mod prepaid;
pub mod retry;
pub mod savings;
pub mod schedule;
pub mod transfer;

// Re-export core types for convenience
pub use anomaly::{Anomaly, AnomalyThresholds};
pub use audit::{AuditEntry, GameStats, NewAuditEntry, TransactionType};
pub use credit::{CreditLine, CreditStatus, PaymentKind, PaymentRecord, SettlementOutcome, SettlementPlan};
pub use error::LedgerError;
pub use money::{Amount, Balance, EntityId, Pocket, UserId};
pub use prepaid::{InstrumentStatus, PrepaidInstrument};
pub use retry::{FailureRecord, RetryDecision, RetryPolicy};
pub use savings::{SavingsAccount, SavingsStatus};
pub use schedule::Trigger;
pub use transfer::{DeferredTransfer, TransferKind, TransferStatus};
