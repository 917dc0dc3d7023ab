// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload client: sends every request of a CSV file to the coordinator.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use circulation_protocol::{EnvelopeCodec, Properties};
use tracing::{info, warn};

use circulation_actors::config::Config;
use circulation_actors::link::FailoverLink;
use circulation_actors::workload::{Workload, WorkloadClient, WorkloadConfig};

/// Circulation workload client
#[derive(Parser, Debug)]
#[command(name = "circulation-client")]
#[command(about = "Replay OPERATION,branch,user,book requests against the coordinator")]
struct Args {
    /// Workload file, one request per line
    workload: PathBuf,

    /// Properties file (default: $CIRCULATION_PROPERTIES or ./circulation.properties)
    #[arg(long)]
    properties: Option<PathBuf>,

    /// Coordinator endpoints, comma-separated, overriding configuration
    #[arg(long)]
    coordinators: Option<String>,

    /// Pause between requests in milliseconds
    #[arg(long, default_value_t = 500)]
    pause_ms: u64,

    /// Wait before retrying the coordinator list, in milliseconds
    #[arg(long, default_value_t = 2000)]
    backoff_ms: u64,
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
    let mut config = Config::from_properties(&props)?;
    if let Some(coordinators) = &args.coordinators {
        config.coordinator_endpoints = circulation_protocol::Endpoint::parse_list(coordinators)?;
    }

    let workload = Workload::load(&args.workload)?;
    for rejected in &workload.rejected {
        warn!("Skipping workload line: {}", rejected);
    }
    info!(
        requests = workload.requests.len(),
        skipped = workload.rejected.len(),
        coordinators = ?config.coordinator_endpoints,
        "Workload loaded"
    );

    let link = FailoverLink::with_timeout(
        "coordinator",
        config.coordinator_endpoints.clone(),
        // Loans wait on the actor's own storage failover.
        config.actor_timeout() + config.storage_timeout,
    );
    let mut client = WorkloadClient::new(
        EnvelopeCodec::new(&config.keys),
        link,
        WorkloadConfig {
            retry_backoff: Duration::from_millis(args.backoff_ms),
            pause: Duration::from_millis(args.pause_ms),
            max_rounds: None,
        },
    );

    let summary = client.run(&workload.requests).await;
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        undelivered = summary.undelivered,
        "Workload finished"
    );

    Ok(())
}
