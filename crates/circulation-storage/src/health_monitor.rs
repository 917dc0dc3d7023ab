// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background health checks of the primary database.
//!
//! Every interval the monitor runs `SELECT 1` against the primary:
//! - failure while the router still trusts the primary switches writes to
//!   the secondary;
//! - success while writes are on the secondary is a recovery. Under
//!   [`FailbackPolicy::Manual`] the recovery is only logged (once per
//!   failover episode) and writes stay on the secondary until an operator
//!   restarts the service. Under [`FailbackPolicy::Automatic`] writes move
//!   back to the primary immediately.
//!
//! The monitor only touches the router's availability flag.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::router::DatabaseRouter;

/// What to do when the primary answers again after a failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailbackPolicy {
    /// Log the recovery; keep writing to the secondary.
    #[default]
    Manual,
    /// Route writes back to the primary.
    Automatic,
}

impl FromStr for FailbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(FailbackPolicy::Manual),
            "automatic" | "auto" => Ok(FailbackPolicy::Automatic),
            other => Err(format!("unknown failback policy '{other}'")),
        }
    }
}

/// Configuration for the health monitor.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// How often to check the primary.
    pub interval: Duration,
    /// A check slower than this counts as a failure.
    pub check_timeout: Duration,
    pub failback: FailbackPolicy,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            check_timeout: Duration::from_secs(1),
            failback: FailbackPolicy::Manual,
        }
    }
}

/// Outcome of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    /// Primary answered and is already the write target.
    PrimaryHealthy,
    /// Primary answered while writes are on the secondary.
    PrimaryRecovered { failed_back: bool },
    /// Primary did not answer. `switched` is true if this check caused the failover.
    PrimaryFailed { switched: bool },
}

/// Background worker that checks the primary database.
pub struct HealthMonitor {
    router: Arc<DatabaseRouter>,
    config: HealthMonitorConfig,
    shutdown: Arc<Notify>,
    recovery_reported: AtomicBool,
}

impl HealthMonitor {
    pub fn new(router: Arc<DatabaseRouter>, config: HealthMonitorConfig) -> Self {
        Self {
            router,
            config,
            shutdown: Arc::new(Notify::new()),
            recovery_reported: AtomicBool::new(false),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the health check loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            failback = ?self.config.failback,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Health monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    self.check_primary().await;
                }
            }
        }

        info!("Health monitor stopped");
    }

    /// Check the primary once and update the router.
    pub async fn check_primary(&self) -> HealthCheck {
        let primary = self.router.primary();
        let healthy = match tokio::time::timeout(self.config.check_timeout, primary.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "primary health check failed");
                false
            }
            Err(_) => {
                debug!("primary health check timed out");
                false
            }
        };

        if !healthy {
            self.recovery_reported.store(false, Ordering::SeqCst);
            let switched = self.router.is_primary_up() && self.router.switch_to_secondary();
            return HealthCheck::PrimaryFailed { switched };
        }

        if self.router.is_primary_up() {
            return HealthCheck::PrimaryHealthy;
        }

        match self.config.failback {
            FailbackPolicy::Automatic => {
                let failed_back = self.router.switch_to_primary();
                HealthCheck::PrimaryRecovered { failed_back }
            }
            FailbackPolicy::Manual => {
                if !self.recovery_reported.swap(true, Ordering::SeqCst) {
                    warn!(
                        "primary database is reachable again; writes stay on the secondary until failback is done manually"
                    );
                }
                HealthCheck::PrimaryRecovered { failed_back: false }
            }
        }
    }
}
