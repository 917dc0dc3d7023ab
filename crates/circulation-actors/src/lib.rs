// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circulation Actors - dispatch layer of the circulation service
//!
//! This crate contains every process between a library client and the
//! storage service:
//! - the load coordinator, the only externally reachable endpoint
//! - the loan, return and renewal actors
//! - the workload client used to drive the system from a request file
//!
//! # Architecture
//!
//! ```text
//!   client ──REQ──▶ coordinator ──REQ (LOAN)──────────▶ loan actor ────┐
//!                        │                                              │
//!                        └──PUB (RETURN / RENEW)──▶ return actor ───────┼──▶ storage service
//!                                                   renewal actor ──────┘    (failover list)
//! ```
//!
//! Every hop carries sealed envelopes and sealed results. Actors reach the
//! storage service through a [`FailoverLink`], which walks an ordered
//! endpoint list and turns exhaustion into a failure result instead of an
//! error.

pub mod actor;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod link;
pub mod workload;

pub use actor::{RequestActor, actor_name};
pub use audit::{AuditLog, AuditStatus};
pub use config::{Config, ConfigError};
pub use coordinator::{ActorLinks, Coordinator, CoordinatorMode};
pub use error::{ActorError, WorkloadError};
pub use link::{Delivery, FailoverLink};
pub use workload::{Workload, WorkloadClient, WorkloadConfig, WorkloadSummary};
