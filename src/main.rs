//! Economy Ledger - Entry Point
//!
//! Initializes configuration, logging, persistence and the three
//! billing batches. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Restore the in-memory store from the last snapshot
//! 4. Open the JSONL audit log and the notification sink
//! 5. Pick the wallet provider (HTTP client or local store)
//! 6. Build the ledger facade and the three batches
//! 7. Spawn one scheduler per batch, the snapshot loop and the servers
//! 8. Wait for SIGINT → graceful shutdown (stop→snapshot→exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use economy_ledger::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use economy_ledger::adapters::notify::{LogNotifier, WebhookNotifier};
use economy_ledger::adapters::persistence::{InMemoryStore, JsonlAuditLog, SnapshotStore};
use economy_ledger::adapters::wallet::{HttpWalletClient, HttpWalletConfig};
use economy_ledger::config::{self, AppConfig, WalletMode};
use economy_ledger::ports::audit::AuditRepository;
use economy_ledger::ports::notifier::NotificationSink;
use economy_ledger::ports::store::LedgerStore;
use economy_ledger::ports::wallet::WalletProvider;
use economy_ledger::usecases::audit_service::AuditService;
use economy_ledger::usecases::credit_settlement::{CreditSettlement, CreditSettlementSettings};
use economy_ledger::usecases::ledger_facade::{FacadeSettings, LedgerFacade};
use economy_ledger::usecases::overdraft_sweep::OverdraftSweep;
use economy_ledger::usecases::retry_tracker::RetryTracker;
use economy_ledger::usecases::scheduler::{Batch, BatchScheduler};
use economy_ledger::usecases::transfer_settlement::TransferSettlement;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config = config::loader::load_config("config.toml").context("Failed to load configuration")?;
    let triggers = config.schedule.parse().context("Invalid schedule")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        community = %config.service.community_id,
        dry_run = config.service.dry_run,
        wallet_mode = ?config.wallet.mode,
        "Starting economy ledger"
    );

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 3. Restore store state ──────────────────────────────
    let snapshots = Arc::new(SnapshotStore::new(&config.persistence.data_dir).await?);
    let store = Arc::new(match snapshots.load().await? {
        Some(state) => InMemoryStore::from_state(state),
        None => InMemoryStore::new(),
    });

    // ── 4. Audit log, notifications, metrics ────────────────
    let audit_log: Arc<dyn AuditRepository> = Arc::new(
        JsonlAuditLog::open(
            &config.persistence.data_dir,
            chrono::Duration::seconds(config.anomaly.velocity_window_secs),
        )
        .await
        .context("Failed to open audit log")?,
    );
    let notifier = build_notifier(&config)?;
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);

    let audit = AuditService::new(
        Arc::clone(&audit_log),
        store.clone(),
        Arc::clone(&notifier),
        config.anomaly.thresholds(),
    )
    .with_metrics(Arc::clone(&metrics));

    // ── 5. Wallet provider ──────────────────────────────────
    let wallet = build_wallet(&config, &store)?;

    // ── 6. Facade and batches ───────────────────────────────
    let facade = LedgerFacade::new(
        store.clone(),
        audit.clone(),
        FacadeSettings {
            pvp_tax_rate: config.billing.pvp_tax_rate,
            treasury_account: config.billing.treasury_account.clone(),
        },
    )
    .with_metrics(Arc::clone(&metrics));

    let policy = config.retry.policy();
    let community = config.service.community_id.clone();
    let dry_run = config.service.dry_run;

    let credit = Arc::new(CreditSettlement::new(
        Arc::clone(&wallet),
        store.clone(),
        audit.clone(),
        Arc::clone(&notifier),
        RetryTracker::new(policy),
        CreditSettlementSettings {
            community_id: community.clone(),
            min_payment_fraction: config.billing.min_payment_fraction,
            default_interest_rate: config.billing.default_interest_rate,
            dry_run,
        },
    ));
    let transfers = Arc::new(TransferSettlement::new(
        Arc::clone(&wallet),
        store.clone(),
        audit.clone(),
        Arc::clone(&notifier),
        RetryTracker::new(policy),
        community.clone(),
        dry_run,
    ));
    let sweep = Arc::new(OverdraftSweep::new(
        Arc::clone(&wallet),
        store.clone(),
        audit,
        Arc::clone(&notifier),
        RetryTracker::new(policy),
        community,
        dry_run,
    ));

    if dry_run {
        warn!("Dry-run mode: batch plans computed but NO money moved");
    }

    // ── 7. Spawn schedulers, snapshot loop and servers ──────
    let mut tasks = vec![
        spawn_scheduler(credit, triggers.credit_settlement, &metrics, &shutdown_tx),
        spawn_scheduler(transfers, triggers.transfer_settlement, &metrics, &shutdown_tx),
        spawn_scheduler(sweep, triggers.overdraft_sweep, &metrics, &shutdown_tx),
    ];

    let health = Arc::new(HealthState::new());
    tasks.push(tokio::spawn(snapshot_loop(
        store.clone(),
        Arc::clone(&snapshots),
        Arc::clone(&audit_log),
        Arc::clone(&health),
        Duration::from_secs(config.persistence.snapshot_interval_seconds),
        shutdown_tx.subscribe(),
    )));

    let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    let metrics_handle = config.metrics.enabled.then(|| {
        let bind = config.metrics.bind_address.clone();
        let rx = shutdown_tx.subscribe();
        let registry = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = registry.serve(bind, rx).await {
                error!(error = %e, "Metrics server failed");
            }
        })
    });

    info!("All tasks spawned, ledger is running");

    // ── 8. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT");
    }
    info!("SIGINT received, initiating graceful shutdown");

    health.shutting_down.store(true, Ordering::Relaxed);
    let _ = shutdown_tx.send(());

    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(30), task).await.is_err() {
            warn!("Task did not stop within 30s");
        }
    }

    info!(in_flight = facade.guard().in_flight(), "Ledger facade drained");
    match snapshots.save(&store.export().await).await {
        Ok(()) => info!("Final snapshot saved"),
        Err(e) => error!(error = %e, "Final snapshot failed"),
    }

    health_handle.abort();
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

fn build_notifier(config: &AppConfig) -> Result<Arc<dyn NotificationSink>> {
    let ops = config.notifications.ops_channel.clone();
    let sink: Arc<dyn NotificationSink> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), ops)?),
        None => {
            info!("No webhook configured, notifications go to the log");
            Arc::new(LogNotifier::new(ops))
        }
    };
    Ok(sink)
}

fn build_wallet(config: &AppConfig, store: &Arc<InMemoryStore>) -> Result<Arc<dyn WalletProvider>> {
    let wallet: Arc<dyn WalletProvider> = match config.wallet.mode {
        WalletMode::Http => {
            let http_config = HttpWalletConfig::from_config(&config.wallet)?;
            info!(base_url = %http_config.base_url, "Using HTTP wallet provider");
            Arc::new(HttpWalletClient::new(http_config).context("Failed to create wallet client")?)
        }
        WalletMode::Local => {
            warn!("Local wallet mode: balances live in the ledger store");
            store.clone()
        }
    };
    Ok(wallet)
}

fn spawn_scheduler<B: Batch>(
    batch: Arc<B>,
    trigger: economy_ledger::domain::schedule::Trigger,
    metrics: &Arc<MetricsRegistry>,
    shutdown_tx: &broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let scheduler = BatchScheduler::new(batch, trigger).with_metrics(Arc::clone(metrics));
    tokio::spawn(scheduler.run(shutdown_tx.subscribe()))
}

/// Persist the store periodically and refresh readiness flags.
async fn snapshot_loop(
    store: Arc<InMemoryStore>,
    snapshots: Arc<SnapshotStore>,
    audit_log: Arc<dyn AuditRepository>,
    health: Arc<HealthState>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let saved = snapshots.save(&store.export().await).await;
                if let Err(e) = &saved {
                    error!(error = %e, "Snapshot failed");
                }
                health
                    .store_healthy
                    .store(saved.is_ok() && store.is_healthy().await, Ordering::Relaxed);
                health.audit_healthy.store(audit_log.is_healthy().await, Ordering::Relaxed);
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}
