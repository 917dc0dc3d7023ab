// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circulation Storage - transactional loans with primary/secondary failover
//!
//! This crate owns every write to the circulation databases. Actors reach it
//! through the storage service endpoint with sealed envelopes; the gateway runs
//! the matching business transaction against whichever database the router
//! currently trusts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Request Actors (loan / return / renewal)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ sealed envelopes
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  StorageService  ──►  StorageGateway (retry + failover)                 │
//! │                            │                    │                       │
//! │                            ▼                    ▼                       │
//! │                     DatabaseRouter ◄──── HealthMonitor                  │
//! │                            │                                            │
//! │                            │            Replicator (2 workers)          │
//! └────────────────────────────┼────────────────────┼───────────────────────┘
//!                   writes     ▼                    ▼   mirrored writes
//!              ┌──────────────────────┐   ┌──────────────────────┐
//!              │  Primary database    │   │  Secondary database  │
//!              └──────────────────────┘   └──────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! | Operation | Repeated call |
//! |-----------|---------------|
//! | `LOAN` | no-op success while the loan is active |
//! | `RETURN` | no-op success once the latest loan is returned |
//! | `RENEW` | no-op success once the loan reaches 2 renewals |
//!
//! Every transaction commits on success and rolls back on any error, so
//! inventory never moves without a matching loan row. Replication to the
//! secondary is best-effort.

pub mod config;
pub mod error;
pub mod gateway;
pub mod health_monitor;
pub mod migrations;
pub mod persistence;
pub mod replicator;
pub mod router;
pub mod service;

pub use config::{Config, ConfigError};
pub use error::{BusinessError, GatewayError, StoreError};
pub use gateway::{RetryPolicy, StorageGateway};
pub use health_monitor::{FailbackPolicy, HealthCheck, HealthMonitor, HealthMonitorConfig};
pub use persistence::{Applied, CirculationStore, LoanKey, LoanRecord, open_store};
pub use replicator::{ReplicationTask, Replicator, ReplicatorConfig, Submission};
pub use router::{DatabaseRole, DatabaseRouter};
pub use service::StorageService;
