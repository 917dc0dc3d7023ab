// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage gateway: the three business transactions with retry and failover.
//!
//! Every operation runs against the router's current write target. Business
//! errors return immediately. Database errors are retried up to
//! [`RetryPolicy::max_attempts`] times with a fixed backoff; the first one
//! seen while the primary is still trusted switches writes to the secondary.
//! Committed changes are handed to the [`Replicator`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use circulation_protocol::Operation;
use tracing::{debug, info, instrument, warn};

use crate::error::{GatewayError, StoreError};
use crate::persistence::{Applied, CirculationStore, LoanKey};
use crate::replicator::{ReplicationTask, Replicator};
use crate::router::DatabaseRouter;

/// Fixed-backoff retry policy for storage failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Executes circulation commands against the current database.
pub struct StorageGateway {
    router: Arc<DatabaseRouter>,
    replicator: Arc<Replicator>,
    retry: RetryPolicy,
}

impl StorageGateway {
    pub fn new(router: Arc<DatabaseRouter>, replicator: Arc<Replicator>, retry: RetryPolicy) -> Self {
        Self {
            router,
            replicator,
            retry,
        }
    }

    pub fn router(&self) -> &Arc<DatabaseRouter> {
        &self.router
    }

    /// Dispatch one operation.
    pub async fn apply(&self, operation: Operation, key: &LoanKey) -> Result<Applied, GatewayError> {
        match operation {
            Operation::Loan => self.apply_loan(key).await,
            Operation::Return => self.apply_return(key).await,
            Operation::Renew => self.apply_renewal(key).await,
        }
    }

    pub async fn apply_loan(&self, key: &LoanKey) -> Result<Applied, GatewayError> {
        self.apply_loan_on(key, Local::now().date_naive()).await
    }

    /// Loan with an explicit start date.
    pub async fn apply_loan_on(
        &self,
        key: &LoanKey,
        today: NaiveDate,
    ) -> Result<Applied, GatewayError> {
        self.run_with_failover(Operation::Loan, key, move |store| async move {
            store.apply_loan(key, today).await
        })
        .await
    }

    pub async fn apply_return(&self, key: &LoanKey) -> Result<Applied, GatewayError> {
        self.run_with_failover(Operation::Return, key, move |store| async move {
            store.apply_return(key).await
        })
        .await
    }

    pub async fn apply_renewal(&self, key: &LoanKey) -> Result<Applied, GatewayError> {
        self.run_with_failover(Operation::Renew, key, move |store| async move {
            store.apply_renewal(key).await
        })
        .await
    }

    #[instrument(skip(self, key, transaction), fields(%operation, %key))]
    async fn run_with_failover<F, Fut>(
        &self,
        operation: Operation,
        key: &LoanKey,
        transaction: F,
    ) -> Result<Applied, GatewayError>
    where
        F: Fn(Arc<dyn CirculationStore>) -> Fut,
        Fut: Future<Output = Result<Applied, StoreError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let role = self.router.current_role();
            let store = self.router.current_write();

            match transaction(store).await {
                Ok(applied) => {
                    debug!(attempt, %role, outcome = %applied.describe(), "committed");
                    if let Some(task) = ReplicationTask::for_applied(&applied) {
                        self.replicator.submit(task);
                    }
                    return Ok(applied);
                }
                Err(StoreError::Business(rejection)) => {
                    info!(%role, reason = %rejection, "command rejected");
                    return Err(rejection.into());
                }
                Err(StoreError::Database(e)) => {
                    warn!(attempt, max_attempts, %role, error = %e, "storage attempt failed");
                    last_error = e.to_string();

                    if attempt == 1 && self.router.is_primary_up() {
                        self.router.switch_to_secondary();
                    }
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }

        Err(GatewayError::Unavailable {
            attempts: max_attempts,
            last_error,
        })
    }
}
