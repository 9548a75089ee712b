//! Integration Tests - End-to-end Ledger and Batch Testing
//!
//! Tests the interaction between usecases, ports, and adapters.
//! Uses the in-memory store for state, mockall for wallet and
//! notification failure injection, and tokio::test for async tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use mockall::mock;
use mockall::predicate::*;
use rust_decimal_macros::dec;
use tokio::sync::Notify;

use economy_ledger::adapters::metrics::MetricsRegistry;
use economy_ledger::adapters::notify::LogNotifier;
use economy_ledger::adapters::persistence::{InMemoryStore, MemoryAuditLog, Pockets};
use economy_ledger::domain::anomaly::AnomalyThresholds;
use economy_ledger::domain::audit::{AuditEntry, NewAuditEntry, TransactionType};
use economy_ledger::domain::credit::{CreditLine, CreditStatus, PaymentKind};
use economy_ledger::domain::error::LedgerError;
use economy_ledger::domain::money::{Amount, Balance, Pocket};
use economy_ledger::domain::prepaid::{InstrumentStatus, PrepaidInstrument};
use economy_ledger::domain::retry::RetryPolicy;
use economy_ledger::domain::savings::{SavingsAccount, SavingsStatus};
use economy_ledger::domain::schedule::Trigger;
use economy_ledger::domain::transfer::{DeferredTransfer, TransferKind, TransferStatus};
use economy_ledger::ports::audit::AuditRepository;
use economy_ledger::ports::notifier::{Notification, NotificationSink, NotifyTarget};
use economy_ledger::ports::store::{
    BankOp, BankOutcome, BankParams, BillingRepository, CasinoOutcome, CasinoParams, ChipsExchangeOutcome,
    ChipsExchangeParams, ChipsOp, CreditPaymentOutcome, CreditPaymentParams, DuelOutcome, DuelParams, LedgerStore,
    ProcedureError, SavingsOp, SavingsOutcome, SavingsParams, TransferOutcome, TransferParams,
};
use economy_ledger::ports::wallet::{WalletError, WalletProvider};
use economy_ledger::usecases::audit_service::AuditService;
use economy_ledger::usecases::credit_settlement::{CreditSettlement, CreditSettlementSettings};
use economy_ledger::usecases::ledger_facade::{FacadeSettings, LedgerFacade};
use economy_ledger::usecases::overdraft_sweep::OverdraftSweep;
use economy_ledger::usecases::retry_tracker::RetryTracker;
use economy_ledger::usecases::scheduler::{Batch, BatchScheduler};
use economy_ledger::usecases::transfer_settlement::TransferSettlement;

// ---- Mock Definitions ----

mock! {
    pub Wallet {}

    #[async_trait::async_trait]
    impl WalletProvider for Wallet {
        async fn get_balance(&self, community: &str, user: &str) -> Result<Balance, WalletError>;

        async fn credit(
            &self,
            community: &str,
            user: &str,
            amount: Amount,
            reason: &str,
            pocket: Pocket,
        ) -> Result<Balance, WalletError>;

        async fn debit(
            &self,
            community: &str,
            user: &str,
            amount: Amount,
            reason: &str,
            pocket: Pocket,
        ) -> Result<Balance, WalletError>;
    }
}

mock! {
    pub Sink {}

    #[async_trait::async_trait]
    impl NotificationSink for Sink {
        async fn send(&self, target: &NotifyTarget, notification: &Notification) -> anyhow::Result<()>;
    }
}

// ---- Fixtures ----

/// Store whose casino procedure parks until released.
struct GatedStore {
    inner: Arc<InMemoryStore>,
    entered: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl LedgerStore for GatedStore {
    async fn casino_transaction(&self, params: &CasinoParams) -> Result<CasinoOutcome, ProcedureError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.casino_transaction(params).await
    }

    async fn chips_exchange(&self, params: &ChipsExchangeParams) -> Result<ChipsExchangeOutcome, ProcedureError> {
        self.inner.chips_exchange(params).await
    }

    async fn money_transfer(&self, params: &TransferParams) -> Result<TransferOutcome, ProcedureError> {
        self.inner.money_transfer(params).await
    }

    async fn bank_operation(&self, params: &BankParams) -> Result<BankOutcome, ProcedureError> {
        self.inner.bank_operation(params).await
    }

    async fn savings_transaction(&self, params: &SavingsParams) -> Result<SavingsOutcome, ProcedureError> {
        self.inner.savings_transaction(params).await
    }

    async fn pvp_duel(&self, params: &DuelParams) -> Result<DuelOutcome, ProcedureError> {
        self.inner.pvp_duel(params).await
    }

    async fn credit_payment(&self, params: &CreditPaymentParams) -> Result<CreditPaymentOutcome, ProcedureError> {
        self.inner.credit_payment(params).await
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

fn audit_service(store: &Arc<InMemoryStore>, log: Arc<MemoryAuditLog>, sink: Arc<dyn NotificationSink>) -> AuditService {
    AuditService::new(log, store.clone(), sink, AnomalyThresholds::default())
}

fn facade_settings() -> FacadeSettings {
    FacadeSettings {
        pvp_tax_rate: dec!(0.05),
        treasury_account: "treasury".into(),
    }
}

fn credit_line(balance: Amount) -> CreditLine {
    CreditLine {
        id: "card_1".into(),
        holder_id: "alice".into(),
        credit_limit: dec!(5000),
        current_balance: balance,
        interest_rate: dec!(0.05),
        status: CreditStatus::Active,
        next_payment_at: Utc::now(),
        missed_payments: 0,
        last_payment_at: None,
    }
}

fn settlement_settings() -> CreditSettlementSettings {
    CreditSettlementSettings {
        community_id: "guild".into(),
        min_payment_fraction: dec!(0.25),
        default_interest_rate: dec!(0.05),
        dry_run: false,
    }
}

fn log_sink() -> Arc<dyn NotificationSink> {
    Arc::new(LogNotifier::new("ops"))
}

// ---- Integration Tests ----

#[tokio::test]
async fn test_guard_exclusivity_for_concurrent_casino_calls() {
    let inner = Arc::new(InMemoryStore::new());
    inner.set_pockets("alice", Pockets::new(dec!(0), dec!(0), dec!(100))).await;
    let gated = Arc::new(GatedStore {
        inner: inner.clone(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let audit = audit_service(&inner, Arc::new(MemoryAuditLog::new()), log_sink());
    let facade = Arc::new(LedgerFacade::new(gated.clone(), audit, facade_settings()));

    let first = {
        let facade = Arc::clone(&facade);
        tokio::spawn(async move {
            facade
                .execute_casino_transaction("alice", dec!(10), dec!(0), "slots", serde_json::Value::Null)
                .await
        })
    };
    gated.entered.notified().await;

    let second = facade
        .execute_casino_transaction("alice", dec!(10), dec!(0), "slots", serde_json::Value::Null)
        .await;
    assert_eq!(second.unwrap_err(), LedgerError::ConcurrencyBusy("alice".into()));

    gated.release.notify_one();
    let receipt = first.await.unwrap().unwrap();
    assert_eq!(receipt.new_balance, dec!(90));
    assert!(!facade.guard().is_busy("alice"));
    assert_eq!(inner.pockets("alice").await.unwrap().chips, dec!(90));
}

#[tokio::test]
async fn test_transfer_conserves_money() {
    let store = Arc::new(InMemoryStore::new());
    store.set_pockets("a", Pockets::new(dec!(250), dec!(0), dec!(0))).await;
    store.set_pockets("b", Pockets::new(dec!(40), dec!(0), dec!(0))).await;
    let facade = LedgerFacade::new(
        store.clone(),
        audit_service(&store, Arc::new(MemoryAuditLog::new()), log_sink()),
        facade_settings(),
    );

    facade
        .execute_money_transfer("a", "b", dec!(75.50), Pocket::Cash, serde_json::Value::Null)
        .await
        .unwrap();

    let a = store.pockets("a").await.unwrap().cash;
    let b = store.pockets("b").await.unwrap().cash;
    assert_eq!(a, dec!(174.50));
    assert_eq!(b, dec!(115.50));
    assert_eq!(a + b, dec!(290));
}

#[tokio::test]
async fn test_settlement_paying_branch_with_mock_wallet() {
    let mut wallet = MockWallet::new();
    wallet
        .expect_get_balance()
        .with(eq("guild"), eq("alice"))
        .returning(|_, _| Ok(Balance::new(dec!(300), dec!(0))));
    wallet
        .expect_debit()
        .with(eq("guild"), eq("alice"), eq(dec!(300)), always(), eq(Pocket::Cash))
        .times(1)
        .returning(|_, _, _, _, _| Ok(Balance::new(dec!(0), dec!(0))));

    let store = Arc::new(InMemoryStore::new());
    store.upsert_credit_line(&credit_line(dec!(1000))).await.unwrap();
    let batch = CreditSettlement::new(
        Arc::new(wallet),
        store.clone(),
        audit_service(&store, Arc::new(MemoryAuditLog::new()), log_sink()),
        log_sink(),
        RetryTracker::default(),
        settlement_settings(),
    );

    let report = batch.run(Utc::now()).await;
    assert_eq!(report.settled, 1);

    let line = store.credit_line("card_1").await.unwrap().unwrap();
    assert_eq!(line.current_balance, dec!(700));
    assert_eq!(line.status, CreditStatus::Active);
    let payments = store.payments_for_line("card_1").await.unwrap();
    assert_eq!(payments[0].kind, PaymentKind::Success);
}

#[tokio::test]
async fn test_settlement_freeze_branch_splits_pockets() {
    let mut wallet = MockWallet::new();
    wallet
        .expect_get_balance()
        .returning(|_, _| Ok(Balance::new(dec!(60), dec!(40))));
    wallet
        .expect_debit()
        .with(always(), always(), eq(dec!(60)), always(), eq(Pocket::Cash))
        .times(1)
        .returning(|_, _, _, _, _| Ok(Balance::new(dec!(0), dec!(40))));
    wallet
        .expect_debit()
        .with(always(), always(), eq(dec!(40)), always(), eq(Pocket::Bank))
        .times(1)
        .returning(|_, _, _, _, _| Ok(Balance::new(dec!(0), dec!(0))));

    let store = Arc::new(InMemoryStore::new());
    store.upsert_credit_line(&credit_line(dec!(1000))).await.unwrap();
    let log = Arc::new(MemoryAuditLog::new());
    let batch = CreditSettlement::new(
        Arc::new(wallet),
        store.clone(),
        audit_service(&store, log.clone(), log_sink()),
        log_sink(),
        RetryTracker::default(),
        settlement_settings(),
    );

    batch.run(Utc::now()).await;

    let line = store.credit_line("card_1").await.unwrap().unwrap();
    assert_eq!(line.current_balance, dec!(945));
    assert_eq!(line.status, CreditStatus::Frozen);
    assert_eq!(line.missed_payments, 1);

    let entries = log.history("alice", 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].balance_before, dec!(1000));
    assert_eq!(entries[0].balance_after, dec!(945));
}

#[tokio::test]
async fn test_failed_bank_leg_refunds_cash_and_backs_off() {
    let mut wallet = MockWallet::new();
    wallet
        .expect_get_balance()
        .returning(|_, _| Ok(Balance::new(dec!(100), dec!(200))));
    wallet
        .expect_debit()
        .with(always(), always(), always(), always(), eq(Pocket::Cash))
        .times(1)
        .returning(|_, _, _, _, _| Ok(Balance::new(dec!(0), dec!(200))));
    wallet
        .expect_debit()
        .with(always(), always(), always(), always(), eq(Pocket::Bank))
        .times(1)
        .returning(|_, _, _, _, _| Err(WalletError::Unreachable(anyhow::anyhow!("timeout"))));
    wallet
        .expect_credit()
        .with(always(), eq("alice"), eq(dec!(100)), always(), eq(Pocket::Cash))
        .times(1)
        .returning(|_, _, _, _, _| Ok(Balance::new(dec!(100), dec!(200))));

    let store = Arc::new(InMemoryStore::new());
    store.upsert_credit_line(&credit_line(dec!(1000))).await.unwrap();
    let batch = CreditSettlement::new(
        Arc::new(wallet),
        store.clone(),
        audit_service(&store, Arc::new(MemoryAuditLog::new()), log_sink()),
        log_sink(),
        RetryTracker::new(RetryPolicy::default()),
        settlement_settings(),
    );

    let now = Utc::now();
    let report = batch.run(now).await;
    assert_eq!(report.failed, 1);
    assert_eq!(store.credit_line("card_1").await.unwrap().unwrap().current_balance, dec!(1000));

    let record = batch.retry_tracker().record("card_1").unwrap();
    assert_eq!(record.attempts, 1);
    assert!(!record.quarantined);

    // Still backing off: skipped without touching the wallet.
    let again = batch.run(now + Duration::minutes(1)).await;
    assert_eq!(again.skipped, 1);
}

#[tokio::test]
async fn test_transfer_retry_after_backoff() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut wallet = MockWallet::new();
    {
        let calls = Arc::clone(&calls);
        wallet.expect_credit().returning(move |_, _, amount, _, _| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(WalletError::Rejected {
                    status: 503,
                    message: "maintenance".into(),
                })
            } else {
                Ok(Balance::new(amount, dec!(0)))
            }
        });
    }

    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    store
        .insert_transfer(&DeferredTransfer {
            id: "tr_9".into(),
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            amount: dec!(25),
            kind: TransferKind::Cash,
            reason: "lunch".into(),
            release_at: now - Duration::hours(1),
            status: TransferStatus::Pending,
            completed_at: None,
        })
        .await
        .unwrap();

    let batch = TransferSettlement::new(
        Arc::new(wallet),
        store.clone(),
        audit_service(&store, Arc::new(MemoryAuditLog::new()), log_sink()),
        log_sink(),
        RetryTracker::default(),
        "guild",
        false,
    );

    assert_eq!(batch.run(now).await.failed, 1);
    assert_eq!(batch.run(now + Duration::minutes(5)).await.skipped, 1);
    assert_eq!(batch.run(now + Duration::minutes(11)).await.settled, 1);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.transfer("tr_9").await.unwrap().unwrap().status, TransferStatus::Completed);
    assert!(batch.retry_tracker().record("tr_9").is_none());
}

#[tokio::test]
async fn test_transfer_settlement_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    store.set_wallet("bob", Balance::new(dec!(0), dec!(0))).await;
    let now = Utc::now();
    store
        .insert_transfer(&DeferredTransfer {
            id: "tr_1".into(),
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            amount: dec!(150),
            kind: TransferKind::Bank,
            reason: "rent".into(),
            release_at: now - Duration::minutes(30),
            status: TransferStatus::Pending,
            completed_at: None,
        })
        .await
        .unwrap();

    let batch = TransferSettlement::new(
        store.clone(),
        store.clone(),
        audit_service(&store, Arc::new(MemoryAuditLog::new()), log_sink()),
        log_sink(),
        RetryTracker::default(),
        "guild",
        false,
    );

    batch.run(now).await;
    batch.run(now).await;

    assert_eq!(store.get_balance("guild", "bob").await.unwrap().bank, dec!(150));
    assert_eq!(store.transfer("tr_1").await.unwrap().unwrap().status, TransferStatus::Completed);
}

#[tokio::test]
async fn test_overdraft_partial_then_full_coverage() {
    let store = Arc::new(InMemoryStore::new());
    store.set_wallet("carol", Balance::new(dec!(-500), dec!(0))).await;
    store
        .upsert_instrument(&PrepaidInstrument {
            id: "debit_1".into(),
            holder_id: "carol".into(),
            balance: dec!(300),
            status: InstrumentStatus::Active,
        })
        .await
        .unwrap();
    let sweep = OverdraftSweep::new(
        store.clone(),
        store.clone(),
        audit_service(&store, Arc::new(MemoryAuditLog::new()), log_sink()),
        log_sink(),
        RetryTracker::default(),
        "guild",
        false,
    );

    sweep.run(Utc::now()).await;
    assert_eq!(store.get_balance("guild", "carol").await.unwrap().cash, dec!(-200));
    assert_eq!(store.instrument("debit_1").await.unwrap().unwrap().balance, dec!(0));

    // Topping up the card lets the next sweep finish the job.
    store.credit_instrument("debit_1", dec!(300)).await.unwrap();
    sweep.run(Utc::now()).await;
    assert_eq!(store.get_balance("guild", "carol").await.unwrap().cash, dec!(0));
    assert_eq!(store.instrument("debit_1").await.unwrap().unwrap().balance, dec!(100));
}

#[tokio::test]
async fn test_large_transaction_threshold_boundary() {
    let mut sink = MockSink::new();
    sink.expect_send()
        .with(eq(NotifyTarget::Operations), always())
        .times(1)
        .returning(|_, _| Ok(()));

    let store = Arc::new(InMemoryStore::new());
    let audit = audit_service(&store, Arc::new(MemoryAuditLog::new()), Arc::new(sink));
    let threshold = audit.thresholds().large_transaction;

    let at = NewAuditEntry::new("whale", TransactionType::BankDeposit, threshold, dec!(0), threshold);
    let (_, scan) = audit.record_with_scan(at).await.unwrap();
    assert!(scan.await.unwrap().is_empty());

    let above = NewAuditEntry::new(
        "whale",
        TransactionType::BankDeposit,
        threshold + dec!(1),
        dec!(0),
        threshold + dec!(1),
    );
    let (_, scan) = audit.record_with_scan(above).await.unwrap();
    let anomalies = scan.await.unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].kind(), "large_transaction");
}

#[tokio::test]
async fn test_failed_alert_never_affects_transaction() {
    let mut sink = MockSink::new();
    sink.expect_send()
        .returning(|_, _| Err(anyhow::anyhow!("webhook down")));

    let store = Arc::new(InMemoryStore::new());
    store.set_pockets("whale", Pockets::new(dec!(0), dec!(0), dec!(10))).await;
    let log = Arc::new(MemoryAuditLog::new());
    let audit = audit_service(&store, log.clone(), Arc::new(sink));
    let facade = LedgerFacade::new(store.clone(), audit.clone(), facade_settings());

    let receipt = facade
        .execute_casino_transaction("whale", dec!(10), dec!(6000000), "slots", serde_json::Value::Null)
        .await
        .unwrap();
    assert!(receipt.won);

    let entry = log.history("whale", 1).await.unwrap().remove(0);
    let anomalies = audit.scan_and_alert(&entry).await;
    assert_eq!(anomalies.len(), 1);
    assert_eq!(store.pockets("whale").await.unwrap().chips, dec!(6000000));
}

#[tokio::test]
async fn test_audit_completeness_across_primitives() {
    let store = Arc::new(InMemoryStore::new());
    store.set_pockets("a", Pockets::new(dec!(1000), dec!(50), dec!(20))).await;
    store.set_pockets("b", Pockets::new(dec!(10), dec!(0), dec!(0))).await;
    store.set_pockets("c", Pockets::new(dec!(-80), dec!(0), dec!(0))).await;
    store
        .upsert_savings_account(&SavingsAccount {
            id: "sav_a".into(),
            holder_id: "a".into(),
            balance: dec!(0),
            status: SavingsStatus::Active,
            opened_at: Utc::now(),
        })
        .await
        .unwrap();
    let now = Utc::now();
    store
        .insert_transfer(&DeferredTransfer {
            id: "tr_b".into(),
            sender_id: "a".into(),
            receiver_id: "b".into(),
            amount: dec!(40),
            kind: TransferKind::Cash,
            reason: "gift".into(),
            release_at: now - Duration::minutes(1),
            status: TransferStatus::Pending,
            completed_at: None,
        })
        .await
        .unwrap();
    store
        .upsert_instrument(&PrepaidInstrument {
            id: "card_c".into(),
            holder_id: "c".into(),
            balance: dec!(50),
            status: InstrumentStatus::Active,
        })
        .await
        .unwrap();

    let log = Arc::new(MemoryAuditLog::new());
    let audit = audit_service(&store, log.clone(), log_sink());
    let facade = LedgerFacade::new(store.clone(), audit.clone(), facade_settings());

    facade
        .execute_casino_transaction("a", dec!(20), dec!(0), "dice", serde_json::Value::Null)
        .await
        .unwrap();
    facade
        .execute_money_transfer("a", "b", dec!(100), Pocket::Cash, serde_json::Value::Null)
        .await
        .unwrap();
    facade.execute_bank_operation("a", dec!(50), BankOp::Withdraw).await.unwrap();
    facade.execute_pvp_duel("b", "a", dec!(200), "coinflip").await.unwrap();
    facade
        .execute_chips_exchange("a", dec!(100), dec!(50), ChipsOp::Buy)
        .await
        .unwrap();
    facade
        .execute_savings_transaction("a", "sav_a", dec!(200), SavingsOp::Deposit, None)
        .await
        .unwrap();

    // Rejected calls leave no trace.
    assert!(facade
        .execute_money_transfer("b", "a", dec!(1000), Pocket::Cash, serde_json::Value::Null)
        .await
        .is_err());
    assert!(facade
        .execute_chips_exchange("b", dec!(1), dec!(1), ChipsOp::Sell)
        .await
        .is_err());

    let transfers = TransferSettlement::new(
        store.clone(),
        store.clone(),
        audit.clone(),
        log_sink(),
        RetryTracker::default(),
        "guild",
        false,
    );
    let sweep = OverdraftSweep::new(
        store.clone(),
        store.clone(),
        audit,
        log_sink(),
        RetryTracker::default(),
        "guild",
        false,
    );
    transfers.run(now).await;
    sweep.run(now).await;

    let a_history = facade.transaction_history("a", 10).await.unwrap();
    assert_eq!(a_history.len(), 5);
    let of_kind = |history: &[AuditEntry], kind: TransactionType| {
        let matching: Vec<_> = history.iter().filter(|e| e.kind == kind).cloned().collect();
        assert_eq!(matching.len(), 1, "expected exactly one {kind} entry");
        matching[0].clone()
    };

    let transfer = of_kind(&a_history, TransactionType::TransferOut);
    assert_eq!(transfer.balance_before, dec!(1000));
    assert_eq!(transfer.balance_after, dec!(900));

    let exchange = of_kind(&a_history, TransactionType::ChipsExchange);
    assert_eq!(exchange.balance_before, dec!(750));
    assert_eq!(exchange.balance_after, dec!(700));
    assert_eq!(exchange.metadata["chips_after"], "100");

    let savings = of_kind(&a_history, TransactionType::SavingsDeposit);
    assert_eq!(savings.balance_before, dec!(0));
    assert_eq!(savings.balance_after, dec!(200));
    assert_eq!(savings.metadata["cash_after"], "500");

    let b_history = facade.transaction_history("b", 10).await.unwrap();
    assert_eq!(b_history.len(), 2);
    let duel = of_kind(&b_history, TransactionType::PvpDuel);
    assert_eq!(duel.balance_before, dec!(110));
    assert_eq!(duel.balance_after, dec!(300));
    let release = of_kind(&b_history, TransactionType::DeferredTransferRelease);
    assert_eq!(release.balance_before, dec!(300));
    assert_eq!(release.balance_after, dec!(340));

    let c_history = facade.transaction_history("c", 10).await.unwrap();
    let coverage = of_kind(&c_history, TransactionType::OverdraftCoverage);
    assert_eq!(coverage.amount, dec!(50));
    assert_eq!(coverage.balance_before, dec!(-80));
    assert_eq!(coverage.balance_after, dec!(-30));

    assert_eq!(log.len().await, 8);
}

#[tokio::test]
async fn test_credit_line_payment_through_facade() {
    let store = Arc::new(InMemoryStore::new());
    store.set_pockets("alice", Pockets::new(dec!(500), dec!(0), dec!(0))).await;
    store.upsert_credit_line(&credit_line(dec!(120))).await.unwrap();
    let facade = LedgerFacade::new(
        store.clone(),
        audit_service(&store, Arc::new(MemoryAuditLog::new()), log_sink()),
        facade_settings(),
    );

    let outcome = facade.pay_credit_line("alice", "card_1", dec!(200)).await.unwrap();
    assert_eq!(outcome.applied, dec!(120));
    assert_eq!(outcome.cash_after, dec!(380));
    assert_eq!(outcome.line_balance_after, dec!(0));

    let err = facade.pay_credit_line("alice", "card_1", dec!(10)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn test_scheduler_records_batch_metrics() {
    let store = Arc::new(InMemoryStore::new());
    let sweep = Arc::new(OverdraftSweep::new(
        store.clone(),
        store.clone(),
        audit_service(&store, Arc::new(MemoryAuditLog::new()), log_sink()),
        log_sink(),
        RetryTracker::default(),
        "guild",
        false,
    ));
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let scheduler = BatchScheduler::new(sweep, Trigger::Every(Duration::minutes(10))).with_metrics(Arc::clone(&metrics));

    let report = scheduler.run_once(Utc::now()).await;
    assert_eq!(report.processed, 0);

    let text = metrics.render().unwrap();
    assert!(text.contains("economy_batch_runs_total{batch=\"overdraft_sweep\"} 1"));
}
