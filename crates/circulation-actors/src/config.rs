// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration shared by the coordinator, the actors and the workload client.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use circulation_protocol::{CodecKeys, Endpoint, Operation, Properties, SettingsError};

use crate::coordinator::CoordinatorMode;

/// Resolved endpoints, timeouts and keys for every actors-crate process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage service endpoints, in failover order
    pub storage_endpoints: Vec<Endpoint>,
    /// Connect/send/receive timeout towards the storage service
    pub storage_timeout: Duration,
    /// Coordinator request endpoint
    pub coordinator_bind: Endpoint,
    /// Coordinator publish endpoint
    pub coordinator_pub: Endpoint,
    pub coordinator_mode: CoordinatorMode,
    /// Request endpoints of the loan, return and renewal actors
    pub loan_actor: Endpoint,
    pub return_actor: Endpoint,
    pub renewal_actor: Endpoint,
    /// Publishers the return and renewal actors subscribe to
    pub subscribe_endpoints: Vec<Endpoint>,
    /// Coordinator endpoints used by the workload client, in failover order
    pub coordinator_endpoints: Vec<Endpoint>,
    pub audit_path: PathBuf,
    pub keys: CodecKeys,
}

impl Config {
    /// Load configuration from the environment, then `props`, then defaults.
    ///
    /// | Env var | Property | Default |
    /// |---------|----------|---------|
    /// | `CIRCULATION_STORAGE_ENDPOINTS` | `storage.endpoints` | `tcp://127.0.0.1:5560` |
    /// | `CIRCULATION_STORAGE_TIMEOUT_MS` | `storage.timeout` | `2000` |
    /// | `CIRCULATION_COORDINATOR_BIND` | `gc.rep` | `tcp://*:5555` |
    /// | `CIRCULATION_COORDINATOR_PUB` | `gc.pub` | `tcp://*:5556` |
    /// | `CIRCULATION_COORDINATOR_MODE` | `gc.mode` | `async` |
    /// | `CIRCULATION_LOAN_ACTOR` | `actor.loan.req` | `tcp://*:5557` |
    /// | `CIRCULATION_RETURN_ACTOR` | `actor.return.req` | `tcp://*:5558` |
    /// | `CIRCULATION_RENEWAL_ACTOR` | `actor.renew.req` | `tcp://*:5559` |
    /// | `CIRCULATION_SUBSCRIBE_ENDPOINTS` | `actor.sub` | `tcp://127.0.0.1:5556` |
    /// | `CIRCULATION_COORDINATOR_ENDPOINTS` | `client.gc.endpoints` | `tcp://127.0.0.1:5555` |
    /// | `CIRCULATION_AUDIT_LOG` | `audit.path` | `audit.log` |
    ///
    /// Actor endpoints are bound by the actor and dialled by the coordinator;
    /// a `*` host dials loopback.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let timeout_ms: u64 =
            props.resolve_parsed("CIRCULATION_STORAGE_TIMEOUT_MS", "storage.timeout", 2000)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "CIRCULATION_STORAGE_TIMEOUT_MS",
                "must be greater than zero".to_string(),
            ));
        }

        let coordinator_mode = props
            .resolve("CIRCULATION_COORDINATOR_MODE", "gc.mode", "async")
            .parse()
            .map_err(|e| ConfigError::Invalid("CIRCULATION_COORDINATOR_MODE", e))?;

        Ok(Self {
            storage_endpoints: endpoint_list(
                props,
                "CIRCULATION_STORAGE_ENDPOINTS",
                "storage.endpoints",
                "tcp://127.0.0.1:5560",
            )?,
            storage_timeout: Duration::from_millis(timeout_ms),
            coordinator_bind: endpoint(props, "CIRCULATION_COORDINATOR_BIND", "gc.rep", "tcp://*:5555")?,
            coordinator_pub: endpoint(props, "CIRCULATION_COORDINATOR_PUB", "gc.pub", "tcp://*:5556")?,
            coordinator_mode,
            loan_actor: endpoint(props, "CIRCULATION_LOAN_ACTOR", "actor.loan.req", "tcp://*:5557")?,
            return_actor: endpoint(
                props,
                "CIRCULATION_RETURN_ACTOR",
                "actor.return.req",
                "tcp://*:5558",
            )?,
            renewal_actor: endpoint(
                props,
                "CIRCULATION_RENEWAL_ACTOR",
                "actor.renew.req",
                "tcp://*:5559",
            )?,
            subscribe_endpoints: endpoint_list(
                props,
                "CIRCULATION_SUBSCRIBE_ENDPOINTS",
                "actor.sub",
                "tcp://127.0.0.1:5556",
            )?,
            coordinator_endpoints: endpoint_list(
                props,
                "CIRCULATION_COORDINATOR_ENDPOINTS",
                "client.gc.endpoints",
                "tcp://127.0.0.1:5555",
            )?,
            audit_path: PathBuf::from(props.resolve(
                "CIRCULATION_AUDIT_LOG",
                "audit.path",
                "audit.log",
            )),
            keys: CodecKeys::resolve(props)?,
        })
    }

    /// Load the properties file named by `CIRCULATION_PROPERTIES` and resolve from it.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_properties(&Properties::load()?)
    }

    /// Coordinator-to-actor timeout: long enough for the actor to walk its
    /// whole storage list once.
    pub fn actor_timeout(&self) -> Duration {
        self.storage_timeout * (self.storage_endpoints.len() as u32 + 1)
    }

    /// Request endpoint of the actor handling `operation`.
    pub fn actor_endpoint(&self, operation: Operation) -> &Endpoint {
        match operation {
            Operation::Loan => &self.loan_actor,
            Operation::Return => &self.return_actor,
            Operation::Renew => &self.renewal_actor,
        }
    }
}

fn endpoint(
    props: &Properties,
    env_key: &'static str,
    property_key: &str,
    default: &str,
) -> Result<Endpoint, ConfigError> {
    Endpoint::from_str(&props.resolve(env_key, property_key, default))
        .map_err(|e| ConfigError::Invalid(env_key, e.to_string()))
}

fn endpoint_list(
    props: &Properties,
    env_key: &'static str,
    property_key: &str,
    default: &str,
) -> Result<Vec<Endpoint>, ConfigError> {
    Endpoint::parse_list(&props.resolve(env_key, property_key, default))
        .map_err(|e| ConfigError::Invalid(env_key, e.to_string()))
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
