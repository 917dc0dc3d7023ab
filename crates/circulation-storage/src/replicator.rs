// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Best-effort replication of committed writes to the secondary.
//!
//! Successful gateway transactions submit an immutable [`ReplicationTask`] to
//! a bounded queue drained by a small worker pool. Tasks always target the
//! secondary and are only accepted while the primary is believed up. Failed
//! tasks are logged and dropped; they never fail the originating request.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::persistence::{Applied, CirculationStore, LoanKey, LoanRecord};
use crate::router::DatabaseRouter;

/// One write to mirror on the secondary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationTask {
    NewLoan { loan: LoanRecord },
    RenewLoan { loan: LoanRecord },
    ReturnLoan { key: LoanKey },
}

impl ReplicationTask {
    /// The task mirroring a committed transaction, if it changed anything.
    pub fn for_applied(applied: &Applied) -> Option<Self> {
        match applied {
            Applied::Loaned(loan) => Some(Self::NewLoan { loan: loan.clone() }),
            Applied::Renewed(loan) => Some(Self::RenewLoan { loan: loan.clone() }),
            Applied::Returned(loan) => Some(Self::ReturnLoan { key: loan.key() }),
            Applied::AlreadyLoaned | Applied::AlreadyReturned | Applied::RenewalLimitReached => {
                None
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewLoan { .. } => "new_loan",
            Self::RenewLoan { .. } => "renew_loan",
            Self::ReturnLoan { .. } => "return_loan",
        }
    }

    pub fn key(&self) -> LoanKey {
        match self {
            Self::NewLoan { loan } | Self::RenewLoan { loan } => loan.key(),
            Self::ReturnLoan { key } => key.clone(),
        }
    }

    /// Apply to `store`. Returns `false` if the store already had the change.
    pub async fn apply_to(&self, store: &dyn CirculationStore) -> Result<bool, StoreError> {
        match self {
            Self::NewLoan { loan } => store.replicate_new_loan(loan).await,
            Self::RenewLoan { loan } => store.replicate_renewal(loan).await,
            Self::ReturnLoan { key } => store.replicate_return(key).await,
        }
    }
}

/// Configuration for the replicator.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
        }
    }
}

/// What happened to a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Primary is down, so there is nothing to mirror to.
    Skipped,
    /// Queue full or replicator stopped.
    Dropped,
}

/// Bounded queue plus worker pool targeting the secondary.
pub struct Replicator {
    router: Arc<DatabaseRouter>,
    sender: Mutex<Option<mpsc::Sender<ReplicationTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Replicator {
    /// Spawn the worker pool.
    pub fn start(router: Arc<DatabaseRouter>, config: ReplicatorConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|id| tokio::spawn(run_worker(id, router.clone(), receiver.clone())))
            .collect();

        info!(
            workers = config.workers.max(1),
            queue_capacity = config.queue_capacity,
            "Replicator started"
        );

        Self {
            router,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue a task without waiting for it to run.
    pub fn submit(&self, task: ReplicationTask) -> Submission {
        if !self.router.is_primary_up() {
            debug!(kind = task.kind(), "primary down, replication skipped");
            return Submission::Skipped;
        }

        let sender = self.sender.lock().ok().and_then(|guard| guard.clone());
        let Some(sender) = sender else {
            debug!(kind = task.kind(), "replicator stopped, task dropped");
            return Submission::Dropped;
        };

        match sender.try_send(task) {
            Ok(()) => Submission::Queued,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(kind = task.kind(), key = %task.key(), "replication queue full, task dropped");
                Submission::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                debug!(kind = task.kind(), "replication queue closed, task dropped");
                Submission::Dropped
            }
        }
    }

    /// Stop accepting tasks and wait for the queue to drain.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "replication worker ended abnormally");
            }
        }
        info!("Replicator stopped");
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        if let Ok(workers) = self.workers.get_mut() {
            for worker in workers.drain(..) {
                worker.abort();
            }
        }
    }
}

async fn run_worker(
    id: usize,
    router: Arc<DatabaseRouter>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ReplicationTask>>>,
) {
    loop {
        let task = receiver.lock().await.recv().await;
        let Some(task) = task else {
            break;
        };

        let secondary = router.secondary();
        match task.apply_to(secondary.as_ref()).await {
            Ok(true) => debug!(worker = id, kind = task.kind(), key = %task.key(), "replicated"),
            Ok(false) => debug!(
                worker = id,
                kind = task.kind(),
                key = %task.key(),
                "secondary already up to date"
            ),
            Err(e) => warn!(
                worker = id,
                kind = task.kind(),
                key = %task.key(),
                error = %e,
                "replication failed"
            ),
        }
    }
}
