// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Renewal actor process: applies RENEW requests published by the coordinator
//! or sent to its request endpoint.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use circulation_protocol::{Endpoint, Operation, Properties};
use tracing::{error, info};

use circulation_actors::actor::run_actor;
use circulation_actors::config::Config;

/// Circulation renewal actor
#[derive(Parser, Debug)]
#[command(name = "circulation-renewal-actor")]
#[command(about = "Forwards renewal requests to the storage service with endpoint failover")]
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

    /// Serve the request endpoint only; do not consume the RENEW topic
    #[arg(long)]
    no_subscribe: bool,
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
        config.renewal_actor = bind;
    }
    if let Some(storage) = &args.storage {
        config.storage_endpoints = Endpoint::parse_list(storage)?;
    }

    info!(
        bind = %config.renewal_actor,
        storage = ?config.storage_endpoints,
        subscribe = !args.no_subscribe,
        "Starting renewal actor"
    );

    run_actor(Operation::Renew, &config, !args.no_subscribe, async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    })
    .await?;

    Ok(())
}
