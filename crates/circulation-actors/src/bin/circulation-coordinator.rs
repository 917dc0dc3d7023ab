// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Load coordinator process
//!
//! The single client-facing endpoint:
//! - forwards loans to the loan actor and waits for the outcome
//! - acknowledges returns and renewals and publishes them to their actors
//!   (or forwards them too, with `--sync`)

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use circulation_protocol::{Endpoint, EnvelopeCodec, Properties, Publisher};
use tracing::{error, info};

use circulation_actors::audit::AuditLog;
use circulation_actors::config::Config;
use circulation_actors::coordinator::{self, ActorLinks, Coordinator, CoordinatorMode};

/// Circulation load coordinator
#[derive(Parser, Debug)]
#[command(name = "circulation-coordinator")]
#[command(about = "Client-facing dispatcher for loan, return and renewal requests")]
struct Args {
    /// Properties file (default: $CIRCULATION_PROPERTIES or ./circulation.properties)
    #[arg(long)]
    properties: Option<PathBuf>,

    /// Forward returns and renewals synchronously instead of publishing them
    #[arg(long)]
    sync: bool,

    /// Request endpoint to bind, overriding configuration
    #[arg(long)]
    bind: Option<Endpoint>,

    /// Publish endpoint to bind, overriding configuration
    #[arg(long)]
    publish: Option<Endpoint>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("circulation_actors=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("Starting circulation load coordinator");

    let props = match &args.properties {
        Some(path) => Properties::from_path(path)?,
        None => Properties::load()?,
    };
    let mut config = Config::from_properties(&props).map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    if args.sync {
        config.coordinator_mode = CoordinatorMode::Sync;
    }
    if let Some(bind) = args.bind {
        config.coordinator_bind = bind;
    }
    if let Some(publish) = args.publish {
        config.coordinator_pub = publish;
    }

    info!(
        bind = %config.coordinator_bind,
        publish = %config.coordinator_pub,
        mode = %config.coordinator_mode,
        loan_actor = %config.loan_actor,
        "Configuration loaded"
    );

    let publisher = Publisher::bind(&config.coordinator_pub).await?;
    let links = ActorLinks::new(
        &config.loan_actor,
        &config.return_actor,
        &config.renewal_actor,
        config.actor_timeout(),
    );
    let coordinator = Coordinator::new(
        config.coordinator_mode,
        EnvelopeCodec::new(&config.keys),
        publisher,
        links,
        AuditLog::new(&config.audit_path),
    );

    let bind = config.coordinator_bind.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = coordinator::serve(&bind, coordinator).await {
            error!("Coordinator server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server_handle.abort();

    info!("Shutdown complete");

    Ok(())
}
