// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for circulation-storage tests.
//!
//! Provides in-memory SQLite stores, a store that can be switched off to
//! simulate a crashed database, and a gateway wired with fast retries.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqlitePoolOptions;

use circulation_storage::error::StoreError;
use circulation_storage::gateway::{RetryPolicy, StorageGateway};
use circulation_storage::migrations;
use circulation_storage::persistence::{
    Applied, CirculationStore, InventoryRecord, LoanKey, LoanRecord, SqliteStore,
};
use circulation_storage::replicator::{Replicator, ReplicatorConfig};
use circulation_storage::router::DatabaseRouter;

/// Fresh in-memory SQLite store with the schema applied.
pub async fn memory_store() -> Arc<SqliteStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run SQLite migrations");

    Arc::new(SqliteStore::new(pool))
}

/// Make every insert into `loans` abort, after the inventory update has already run.
pub async fn fail_loan_inserts(store: &SqliteStore) {
    sqlx::query(
        r#"
        CREATE TRIGGER fail_loan_insert BEFORE INSERT ON loans
        BEGIN
            SELECT RAISE(ABORT, 'disk I/O error');
        END
        "#,
    )
    .execute(store.pool())
    .await
    .expect("Failed to install loan insert trigger");
}

pub fn key() -> LoanKey {
    LoanKey::new("B1", "U1", "BK1")
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

pub async fn copies(store: &dyn CirculationStore, branch_id: &str, book_code: &str) -> i32 {
    store
        .inventory(branch_id, book_code)
        .await
        .unwrap()
        .map(|row| row.available_copies)
        .unwrap_or(-1)
}

/// Retry policy with the production attempt count and a short backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff: Duration::from_millis(10),
    }
}

/// Fully wired gateway over two stores.
pub struct Harness {
    pub router: Arc<DatabaseRouter>,
    pub replicator: Arc<Replicator>,
    pub gateway: Arc<StorageGateway>,
}

impl Harness {
    pub fn new(primary: Arc<dyn CirculationStore>, secondary: Arc<dyn CirculationStore>) -> Self {
        let router = Arc::new(DatabaseRouter::new(primary, secondary));
        let replicator = Arc::new(Replicator::start(
            router.clone(),
            ReplicatorConfig::default(),
        ));
        let gateway = Arc::new(StorageGateway::new(
            router.clone(),
            replicator.clone(),
            fast_retry(),
        ));
        Self {
            router,
            replicator,
            gateway,
        }
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

/// Wraps a real store; while switched off every call fails like a dead database.
pub struct SwitchableStore {
    inner: Arc<SqliteStore>,
    down: AtomicBool,
    transactions: AtomicU32,
}

impl SwitchableStore {
    pub fn new(inner: Arc<SqliteStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            transactions: AtomicU32::new(0),
        }
    }

    /// A store that is down from the start.
    pub fn down(inner: Arc<SqliteStore>) -> Self {
        let store = Self::new(inner);
        store.set_down(true);
        store
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of business transactions attempted, including failed ones.
    pub fn transactions(&self) -> u32 {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<SqliteStore> {
        &self.inner
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }

    fn begin_transaction(&self) -> Result<(), StoreError> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.check()
    }
}

#[async_trait]
impl CirculationStore for SwitchableStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.ping().await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.migrate().await
    }

    async fn apply_loan(&self, key: &LoanKey, today: NaiveDate) -> Result<Applied, StoreError> {
        self.begin_transaction()?;
        self.inner.apply_loan(key, today).await
    }

    async fn apply_return(&self, key: &LoanKey) -> Result<Applied, StoreError> {
        self.begin_transaction()?;
        self.inner.apply_return(key).await
    }

    async fn apply_renewal(&self, key: &LoanKey) -> Result<Applied, StoreError> {
        self.begin_transaction()?;
        self.inner.apply_renewal(key).await
    }

    async fn replicate_new_loan(&self, loan: &LoanRecord) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.replicate_new_loan(loan).await
    }

    async fn replicate_return(&self, key: &LoanKey) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.replicate_return(key).await
    }

    async fn replicate_renewal(&self, loan: &LoanRecord) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.replicate_renewal(loan).await
    }

    async fn find_active_loan(&self, key: &LoanKey) -> Result<Option<LoanRecord>, StoreError> {
        self.check()?;
        self.inner.find_active_loan(key).await
    }

    async fn latest_loan(&self, key: &LoanKey) -> Result<Option<LoanRecord>, StoreError> {
        self.check()?;
        self.inner.latest_loan(key).await
    }

    async fn inventory(
        &self,
        branch_id: &str,
        book_code: &str,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        self.check()?;
        self.inner.inventory(branch_id, book_code).await
    }

    async fn upsert_inventory(
        &self,
        branch_id: &str,
        book_code: &str,
        available_copies: i32,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner
            .upsert_inventory(branch_id, book_code, available_copies)
            .await
    }
}
