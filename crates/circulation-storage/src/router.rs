// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Primary/secondary selection.
//!
//! The router holds both stores and a single availability flag. Every
//! transaction resolves its target at call time, so a stale read of the flag
//! costs at most one failed attempt against the wrong database.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::persistence::CirculationStore;

/// Which database is authoritative for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseRole {
    Primary,
    Secondary,
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseRole::Primary => f.write_str("primary"),
            DatabaseRole::Secondary => f.write_str("secondary"),
        }
    }
}

/// Shared handle choosing between the primary and secondary stores.
pub struct DatabaseRouter {
    primary: Arc<dyn CirculationStore>,
    secondary: Arc<dyn CirculationStore>,
    primary_available: AtomicBool,
}

impl DatabaseRouter {
    /// Create a router that starts on the primary.
    pub fn new(primary: Arc<dyn CirculationStore>, secondary: Arc<dyn CirculationStore>) -> Self {
        Self {
            primary,
            secondary,
            primary_available: AtomicBool::new(true),
        }
    }

    /// Store to write to right now.
    pub fn current_write(&self) -> Arc<dyn CirculationStore> {
        match self.current_role() {
            DatabaseRole::Primary => self.primary.clone(),
            DatabaseRole::Secondary => self.secondary.clone(),
        }
    }

    /// Store to read from right now (same as the write target).
    pub fn current_read(&self) -> Arc<dyn CirculationStore> {
        self.current_write()
    }

    pub fn current_role(&self) -> DatabaseRole {
        if self.is_primary_up() {
            DatabaseRole::Primary
        } else {
            DatabaseRole::Secondary
        }
    }

    pub fn primary(&self) -> Arc<dyn CirculationStore> {
        self.primary.clone()
    }

    pub fn secondary(&self) -> Arc<dyn CirculationStore> {
        self.secondary.clone()
    }

    pub fn is_primary_up(&self) -> bool {
        self.primary_available.load(Ordering::SeqCst)
    }

    /// Route writes to the secondary. Returns `true` if this call flipped the flag.
    pub fn switch_to_secondary(&self) -> bool {
        let switched = self
            .primary_available
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if switched {
            warn!("primary database marked down, writes now go to the secondary");
        }
        switched
    }

    /// Route writes back to the primary. Returns `true` if this call flipped the flag.
    pub fn switch_to_primary(&self) -> bool {
        let switched = self
            .primary_available
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if switched {
            info!("writes routed back to the primary database");
        }
        switched
    }
}

impl fmt::Debug for DatabaseRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseRouter")
            .field("role", &self.current_role())
            .finish_non_exhaustive()
    }
}
