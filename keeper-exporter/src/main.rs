//! Prometheus exporter for database monitoring tables.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use keeper_exporter::store::{SharedStore, quote_ident};
use keeper_exporter::{
    Engine, ExporterConfig, HttpServer, RestStoreClient, Scheduler, StoreClient,
    build_tracked_set,
};

/// Prometheus exporter for database monitoring tables.
#[derive(Parser, Debug)]
#[command(name = "keeper-exporter")]
#[command(about = "Export database monitoring tables as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    keeper_common::init_tracing(&config.logging)?;

    info!("Starting keeper exporter");

    let listen_addr: SocketAddr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    let interval = config.metrics.rotation_interval()?;

    let client = RestStoreClient::new(&config.store)?;
    if config.metrics.create_database {
        let sql = format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            quote_ident(&config.metrics.database)
        );
        if let Err(e) = client.exec(&sql).await {
            error!(database = %config.metrics.database, error = %e, "Failed to create database");
            return Err(e.into());
        }
    }
    let store: SharedStore = Arc::new(client);

    let tracked = match build_tracked_set(&config.metrics, store.as_ref()).await {
        Ok(tracked) => tracked,
        Err(e) => {
            error!(error = %e, "Failed to build tracked table set");
            return Err(e.into());
        }
    };

    let engine = Arc::new(Engine::new(tracked, store, &config.metrics));
    if let Err(e) = engine.discover().await {
        error!(error = %e, "Discovery failed");
        return Err(e.into());
    }
    engine.sample().await;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(engine.clone(), interval);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let http_server = HttpServer::new(
        engine.clone(),
        listen_addr,
        config.http.path.clone(),
        config.metrics.refresh_on_scrape,
    );
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = scheduler_task.await;
        let _ = http_task.await;
    })
    .await;

    let stats = engine.stats();
    info!(
        sampling_passes = stats.sampling_passes,
        sampling_failures = stats.sampling_failures,
        tables = engine.registry().len(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
