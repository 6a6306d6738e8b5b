//! scan-engine - badge scan classification with offline synchronization
//!
//! Module structure:
//! - `domain/` - Event entities, scans and outcomes
//! - `io/` - External interfaces (authoritative store, offline queue, device listener)
//! - `services/` - Scan policy (classifier, ingest, sync manager)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use scan_engine::domain::EventSnapshot;
use scan_engine::infra::{Config, Metrics};
use scan_engine::io::{start_scan_listener, HttpStore, ListenerConfig, OfflineScanQueue};
use scan_engine::services::{ScanIngestService, SyncManager};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Scan engine - classifies badge scans and syncs them to the authoritative store
#[derive(Parser, Debug)]
#[command(name = "scan-engine", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-scan visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("scan-engine starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        snapshot = %config.snapshot_path(),
        queue = %config.queue_path(),
        store_url = %config.store_url(),
        cooldown_secs = %config.cooldown().as_secs(),
        queue_capacity = %config.queue_capacity(),
        max_attempts = %config.max_attempts(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let snapshot = EventSnapshot::from_file(config.snapshot_path())?;
    let queue = Arc::new(
        OfflineScanQueue::open(config.queue_config())
            .with_context(|| format!("Failed to open offline queue {}", config.queue_path()))?,
    );
    let store = Arc::new(HttpStore::new(config.store_url(), config.commit_timeout())?);
    let metrics = Arc::new(Metrics::new());
    let sync_signal = Arc::new(Notify::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingest = Arc::new(
        ScanIngestService::new(snapshot, queue.clone(), store.clone(), metrics.clone())
            .with_cooldown(config.cooldown())
            .with_commit_timeout(config.commit_timeout())
            .with_sync_signal(sync_signal.clone()),
    );

    // Start sync manager (drains whatever survived the last restart first)
    let sync = SyncManager::new(queue, store, metrics.clone())
        .with_interval(config.sync_interval())
        .with_commit_timeout(config.commit_timeout())
        .with_signal(sync_signal);
    let sync_shutdown = shutdown_rx.clone();
    let sync_handle = tokio::spawn(async move {
        sync.run(sync_shutdown).await;
    });

    // Start device listener
    let listener_config = ListenerConfig {
        port: config.listener_port(),
        enabled: config.listener_enabled(),
    };
    let listener_ingest = ingest.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_scan_listener(listener_config, listener_ingest, listener_shutdown).await
        {
            tracing::error!(error = %e, "scan listener error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = scan_engine::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut reporter_shutdown = shutdown_rx;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = reporter_shutdown.changed() => {
                    if *reporter_shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    info!(pending = %ingest.pending_count(), "scan_engine_ready");

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Let an in-progress sync cycle finish its current record
    let _ = sync_handle.await;

    info!(pending = %ingest.pending_count(), "scan-engine shutdown complete");
    Ok(())
}
