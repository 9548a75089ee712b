//! Prometheus Metrics Registry - Ledger Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Covers ledger primitive outcomes, batch runs and per-entity
//! results, detected anomalies and alert delivery failures.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Centralized Prometheus metrics for the economy core.
///
/// All metrics follow the naming convention `economy_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Ledger facade calls by primitive and outcome.
    pub ledger_ops: IntCounterVec,
    /// Completed batch runs.
    pub batch_runs: IntCounterVec,
    /// Per-entity batch outcomes.
    pub batch_entities: IntCounterVec,
    /// Unix timestamp of the last finished run per batch.
    pub batch_last_run: GaugeVec,
    /// Anomalies detected by kind.
    pub anomalies: IntCounterVec,
    /// Operational alerts that could not be delivered.
    pub alert_failures: IntCounter,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ledger_ops = IntCounterVec::new(
            Opts::new("economy_ledger_ops_total", "Ledger facade calls"),
            &["op", "outcome"],
        )?;

        let batch_runs = IntCounterVec::new(
            Opts::new("economy_batch_runs_total", "Completed batch runs"),
            &["batch"],
        )?;

        let batch_entities = IntCounterVec::new(
            Opts::new(
                "economy_batch_entities_total",
                "Per-entity batch outcomes (settled, failed, skipped, quarantined)",
            ),
            &["batch", "outcome"],
        )?;

        let batch_last_run = GaugeVec::new(
            Opts::new(
                "economy_batch_last_run_timestamp",
                "Unix time of the last finished batch run",
            ),
            &["batch"],
        )?;

        let anomalies = IntCounterVec::new(
            Opts::new("economy_anomalies_total", "Detected anomalies"),
            &["kind"],
        )?;

        let alert_failures = IntCounter::new(
            "economy_alert_failures_total",
            "Operational alerts that failed to deliver",
        )?;

        // Register all metrics
        registry.register(Box::new(ledger_ops.clone()))?;
        registry.register(Box::new(batch_runs.clone()))?;
        registry.register(Box::new(batch_entities.clone()))?;
        registry.register(Box::new(batch_last_run.clone()))?;
        registry.register(Box::new(anomalies.clone()))?;
        registry.register(Box::new(alert_failures.clone()))?;

        Ok(Self {
            registry,
            ledger_ops,
            batch_runs,
            batch_entities,
            batch_last_run,
            anomalies,
            alert_failures,
        })
    }

    pub fn record_ledger_op(&self, op: &str, outcome: &str) {
        self.ledger_ops.with_label_values(&[op, outcome]).inc();
    }

    pub fn record_anomaly(&self, kind: &str) {
        self.anomalies.with_label_values(&[kind]).inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
