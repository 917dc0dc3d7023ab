// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the coordinator, actors and workload client.

use std::path::PathBuf;

use circulation_protocol::{CodecError, Operation, ServerError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that stop an actor or coordinator process.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("{actor} does not handle {operation} requests")]
    WrongOperation {
        actor: &'static str,
        operation: Operation,
    },
}

/// Errors reading a workload file.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("cannot read workload {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}
