//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the economy core's workflows. Each use case is a self-contained
//! business operation.
//!
//! Use cases:
//! - `LedgerFacade`: Guarded atomic money movement
//! - `AuditService`: Audit append plus anomaly scans
//! - `CreditSettlement`: Weekly credit line billing
//! - `TransferSettlement`: Hourly deferred transfer release
//! - `OverdraftSweep`: Prepaid coverage of negative cash
//! - `BatchScheduler`: Periodic triggers and batch reports

pub mod audit_service;
pub mod credit_settlement;
pub mod guard;
pub mod ledger_facade;
pub mod overdraft_sweep;
pub mod retry_tracker;
pub mod scheduler;
pub mod transfer_settlement;
