// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circulation Storage - storage service process
//!
//! Owns the primary and secondary databases:
//! - serves sealed loan/return/renewal commands from the actors
//! - checks the primary and fails over to the secondary
//! - mirrors committed writes to the secondary

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use circulation_protocol::{Endpoint, EnvelopeCodec, Properties};
use tracing::{error, info, warn};

use circulation_storage::config::Config;
use circulation_storage::gateway::StorageGateway;
use circulation_storage::health_monitor::{FailbackPolicy, HealthMonitor};
use circulation_storage::persistence::open_store;
use circulation_storage::replicator::Replicator;
use circulation_storage::router::DatabaseRouter;
use circulation_storage::service::{self, StorageService};

/// Circulation storage service
#[derive(Parser, Debug)]
#[command(name = "circulation-storage")]
#[command(about = "Transactional loan storage with primary/secondary failover")]
struct Args {
    /// Properties file (default: $CIRCULATION_PROPERTIES or ./circulation.properties)
    #[arg(long)]
    properties: Option<PathBuf>,

    /// Request endpoint to bind, overriding configuration
    #[arg(long)]
    bind: Option<Endpoint>,

    /// Failback policy when the primary recovers (manual or automatic)
    #[arg(long)]
    failback: Option<FailbackPolicy>,

    /// Do not apply embedded migrations on startup
    #[arg(long)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("circulation_storage=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("Starting circulation storage service");

    let props = match &args.properties {
        Some(path) => Properties::from_path(path)?,
        None => Properties::load()?,
    };
    let mut config = Config::from_properties(&props).map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(failback) = args.failback {
        config.health.failback = failback;
    }

    info!(
        bind = %config.bind,
        failback = ?config.health.failback,
        max_attempts = config.retry.max_attempts,
        replication_workers = config.replication.workers,
        "Configuration loaded"
    );

    let primary = open_store(&config.primary_url)?;
    let secondary = open_store(&config.secondary_url)?;

    if !args.skip_migrations {
        // A database that is down at startup is handled by failover, not by exiting.
        for (role, store) in [("primary", &primary), ("secondary", &secondary)] {
            match store.migrate().await {
                Ok(()) => info!(role, "Migrations completed"),
                Err(e) => warn!(role, error = %e, "Migrations failed"),
            }
        }
    }

    let router = Arc::new(DatabaseRouter::new(primary, secondary));
    let replicator = Arc::new(Replicator::start(router.clone(), config.replication.clone()));
    let gateway = Arc::new(StorageGateway::new(
        router.clone(),
        replicator.clone(),
        config.retry.clone(),
    ));

    // Start the primary health monitor
    let monitor = HealthMonitor::new(router.clone(), config.health.clone());
    let monitor_shutdown = monitor.shutdown_handle();
    let monitor_handle = tokio::spawn(async move {
        monitor.run().await;
    });

    // Start the request server
    let codec = EnvelopeCodec::new(&config.keys);
    let storage_service = StorageService::new(codec, gateway);
    let bind = config.bind.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = service::serve(&bind, storage_service).await {
            error!("Storage server error: {}", e);
        }
    });

    info!("Circulation storage service initialized");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server_handle.abort();
    monitor_shutdown.notify_one();
    if let Err(e) = monitor_handle.await {
        warn!("Health monitor task failed: {}", e);
    }
    replicator.shutdown().await;

    info!("Shutdown complete");

    Ok(())
}
