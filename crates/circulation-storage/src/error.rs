// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for circulation-storage.

use thiserror::Error;

/// A domain rule rejected the command.
///
/// Business errors are a correct reading of current state. They are returned
/// to the caller as-is and never trigger retries or failover.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusinessError {
    #[error("book not in inventory")]
    BookNotInInventory,

    #[error("no copies available")]
    NoCopiesAvailable,

    #[error("no loan to return")]
    NoLoanToReturn,

    #[error("no loan")]
    NoLoanToRenew,

    #[error("not active")]
    NotActive { status: String },

    #[error("inconsistent state")]
    InconsistentState { detail: String },
}

/// Errors from a single store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Business(#[from] BusinessError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced by the storage gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Business(#[from] BusinessError),

    #[error("storage unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl GatewayError {
    pub fn is_business(&self) -> bool {
        matches!(self, GatewayError::Business(_))
    }
}
