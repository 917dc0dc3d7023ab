// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables and the properties file.

use std::time::Duration;

use circulation_protocol::{CodecKeys, Endpoint, Properties, SettingsError};

use crate::gateway::RetryPolicy;
use crate::health_monitor::{FailbackPolicy, HealthMonitorConfig};
use crate::replicator::ReplicatorConfig;

pub const DEFAULT_PRIMARY_URL: &str = "postgres://postgres@localhost:5432/library_primary";
pub const DEFAULT_SECONDARY_URL: &str = "postgres://postgres@localhost:5432/library_secondary";
pub const DEFAULT_BIND: &str = "tcp://*:5560";

/// Storage service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Request endpoint the storage service binds
    pub bind: Endpoint,
    /// Primary database URL (PostgreSQL or SQLite)
    pub primary_url: String,
    /// Secondary database URL (PostgreSQL or SQLite)
    pub secondary_url: String,
    pub health: HealthMonitorConfig,
    pub retry: RetryPolicy,
    pub replication: ReplicatorConfig,
    pub keys: CodecKeys,
}

impl Config {
    /// Load configuration from the environment, then `props`, then defaults.
    ///
    /// Optional (with defaults):
    /// - `CIRCULATION_STORAGE_BIND` / `storage.rep`: request endpoint (default: tcp://*:5560)
    /// - `CIRCULATION_PRIMARY_DATABASE_URL` / `db.primary.url`
    /// - `CIRCULATION_SECONDARY_DATABASE_URL` / `db.secondary.url`
    /// - `CIRCULATION_HEALTH_INTERVAL_MS` / `db.health.interval` (default: 1500)
    /// - `CIRCULATION_FAILBACK` / `db.failback`: `manual` or `automatic` (default: manual)
    /// - `CIRCULATION_STORAGE_MAX_ATTEMPTS` / `storage.retry.attempts` (default: 5)
    /// - `CIRCULATION_STORAGE_BACKOFF_MS` / `storage.retry.backoff` (default: 2000)
    /// - `CIRCULATION_REPLICATION_WORKERS` / `replication.workers` (default: 2)
    /// - `CIRCULATION_REPLICATION_QUEUE` / `replication.queue` (default: 256)
    /// - the envelope key settings read by [`CodecKeys::resolve`]
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let bind_raw = props.resolve("CIRCULATION_STORAGE_BIND", "storage.rep", DEFAULT_BIND);
        let bind = Endpoint::parse(&bind_raw)
            .map_err(|e| ConfigError::Invalid("CIRCULATION_STORAGE_BIND", e.to_string()))?;

        let primary_url = props.resolve(
            "CIRCULATION_PRIMARY_DATABASE_URL",
            "db.primary.url",
            DEFAULT_PRIMARY_URL,
        );
        let secondary_url = props.resolve(
            "CIRCULATION_SECONDARY_DATABASE_URL",
            "db.secondary.url",
            DEFAULT_SECONDARY_URL,
        );

        let interval_ms: u64 =
            props.resolve_parsed("CIRCULATION_HEALTH_INTERVAL_MS", "db.health.interval", 1500)?;
        if interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "CIRCULATION_HEALTH_INTERVAL_MS",
                "must be greater than zero".to_string(),
            ));
        }
        let failback: FailbackPolicy = props
            .resolve("CIRCULATION_FAILBACK", "db.failback", "manual")
            .parse()
            .map_err(|e| ConfigError::Invalid("CIRCULATION_FAILBACK", e))?;
        let health = HealthMonitorConfig {
            interval: Duration::from_millis(interval_ms),
            failback,
            ..HealthMonitorConfig::default()
        };

        let max_attempts: u32 =
            props.resolve_parsed("CIRCULATION_STORAGE_MAX_ATTEMPTS", "storage.retry.attempts", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "CIRCULATION_STORAGE_MAX_ATTEMPTS",
                "must be at least 1".to_string(),
            ));
        }
        let backoff_ms: u64 =
            props.resolve_parsed("CIRCULATION_STORAGE_BACKOFF_MS", "storage.retry.backoff", 2000)?;
        let retry = RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(backoff_ms),
        };

        let replication = ReplicatorConfig {
            workers: props.resolve_parsed(
                "CIRCULATION_REPLICATION_WORKERS",
                "replication.workers",
                2,
            )?,
            queue_capacity: props.resolve_parsed(
                "CIRCULATION_REPLICATION_QUEUE",
                "replication.queue",
                256,
            )?,
        };

        let keys = CodecKeys::resolve(props)?;

        Ok(Self {
            bind,
            primary_url,
            secondary_url,
            health,
            retry,
            replication,
            keys,
        })
    }

    /// Load the properties file named by `CIRCULATION_PROPERTIES` and resolve from it.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_properties(&Properties::load()?)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A setting has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
