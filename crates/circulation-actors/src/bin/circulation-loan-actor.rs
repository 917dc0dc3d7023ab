// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loan actor process: forwards LOAN requests from the coordinator to storage.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use circulation_protocol::{Endpoint, Operation, Properties};
use tracing::{error, info};

use circulation_actors::actor::run_actor;
use circulation_actors::config::Config;

/// Circulation loan actor
#[derive(Parser, Debug)]
#[command(name = "circulation-loan-actor")]
#[command(about = "Forwards loan requests to the storage service with endpoint failover")]
struct Args {
    /// Properties file (default: $CIRCULATION_PROPERTIES or ./circulation.properties)
    #[arg(long)]
    properties: Option<PathBuf>,

    /// Request endpoint to bind, overriding configuration
    #[arg(long)]
    bind: Option<Endpoint>,

    /// Storage service endpoints, comma-separated, overriding configuration
    #[arg(long)]
    storage: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("circulation_actors=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let props = match &args.properties {
        Some(path) => Properties::from_path(path)?,
        None => Properties::load()?,
    };
    let mut config = Config::from_properties(&props).map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    if let Some(bind) = args.bind {
        config.loan_actor = bind;
    }
    if let Some(storage) = &args.storage {
        config.storage_endpoints = Endpoint::parse_list(storage)?;
    }

    info!(
        bind = %config.loan_actor,
        storage = ?config.storage_endpoints,
        "Starting loan actor"
    );

    run_actor(Operation::Loan, &config, false, async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    })
    .await?;

    Ok(())
}
