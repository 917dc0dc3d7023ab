// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store tests. Run with `TEST_DATABASE_URL` pointing at a scratch database.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{NaiveDate, TimeDelta};
use sqlx::PgPool;

use circulation_storage::error::{BusinessError, StoreError};
use circulation_storage::migrations;
use circulation_storage::persistence::{
    Applied, CirculationStore, LoanKey, LoanRecord, PostgresStore,
};
use circulation_storage::replicator::ReplicationTask;

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

/// Get a migrated store for testing
async fn get_test_store() -> Option<PostgresStore> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    migrations::run_postgres(&pool).await.ok()?;
    Some(PostgresStore::new(pool))
}

/// A key no other test run will reuse.
fn unique_key(label: &str) -> LoanKey {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    LoanKey::new(
        format!("PG-{label}-{nanos}"),
        format!("U-{}", std::process::id()),
        "BK1",
    )
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

async fn copies(store: &PostgresStore, key: &LoanKey) -> i32 {
    store
        .inventory(&key.branch_id, &key.book_code)
        .await
        .unwrap()
        .unwrap()
        .available_copies
}

#[tokio::test]
async fn test_postgres_loan_lifecycle() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect to database");
    let key = unique_key("lifecycle");
    store
        .upsert_inventory(&key.branch_id, &key.book_code, 1)
        .await
        .unwrap();

    let Applied::Loaned(loan) = store.apply_loan(&key, day(1)).await.unwrap() else {
        panic!("expected a new loan");
    };
    assert_eq!(loan.due_date, day(8));
    assert_eq!(copies(&store, &key).await, 0);
    assert_eq!(
        store.apply_loan(&key, day(2)).await.unwrap(),
        Applied::AlreadyLoaned
    );

    for _ in 0..2 {
        assert!(matches!(
            store.apply_renewal(&key).await.unwrap(),
            Applied::Renewed(_)
        ));
    }
    assert_eq!(
        store.apply_renewal(&key).await.unwrap(),
        Applied::RenewalLimitReached
    );
    let active = store.find_active_loan(&key).await.unwrap().unwrap();
    assert_eq!(active.due_date - loan.due_date, TimeDelta::days(14));

    assert!(matches!(
        store.apply_return(&key).await.unwrap(),
        Applied::Returned(_)
    ));
    assert_eq!(copies(&store, &key).await, 1);
    assert_eq!(
        store.apply_return(&key).await.unwrap(),
        Applied::AlreadyReturned
    );

    let err = store.apply_renewal(&key).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Business(BusinessError::NotActive { .. })
    ));
}

#[tokio::test]
async fn test_postgres_rejections() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect to database");
    let key = unique_key("rejections");

    let err = store.apply_loan(&key, day(1)).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Business(BusinessError::BookNotInInventory)
    ));

    store
        .upsert_inventory(&key.branch_id, &key.book_code, 0)
        .await
        .unwrap();
    let err = store.apply_loan(&key, day(1)).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Business(BusinessError::NoCopiesAvailable)
    ));
    assert!(store.latest_loan(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_postgres_replication_is_idempotent() {
    skip_if_no_db!();
    let store = get_test_store().await.expect("Failed to connect to database");
    let key = unique_key("replication");
    store
        .upsert_inventory(&key.branch_id, &key.book_code, 2)
        .await
        .unwrap();

    let loan = LoanRecord {
        loan_id: 0,
        user_id: key.user_id.clone(),
        book_code: key.book_code.clone(),
        branch_id: key.branch_id.clone(),
        start_date: day(1),
        due_date: day(8),
        renewals: 0,
        status: "ACTIVE".to_string(),
    };
    let task = ReplicationTask::NewLoan { loan };
    assert!(task.apply_to(&store).await.unwrap());
    assert!(!task.apply_to(&store).await.unwrap());
    assert_eq!(copies(&store, &key).await, 1);

    let task = ReplicationTask::ReturnLoan { key: key.clone() };
    assert!(task.apply_to(&store).await.unwrap());
    assert!(!task.apply_to(&store).await.unwrap());
    assert_eq!(copies(&store, &key).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_postgres_concurrent_loans_share_the_last_copy_once() {
    skip_if_no_db!();
    let store = Arc::new(get_test_store().await.expect("Failed to connect to database"));
    let base = unique_key("last-copy");
    store
        .upsert_inventory(&base.branch_id, &base.book_code, 1)
        .await
        .unwrap();

    let mut borrowers = tokio::task::JoinSet::new();
    for i in 0..8 {
        let store = store.clone();
        let key = LoanKey::new(base.branch_id.clone(), format!("U{i}"), base.book_code.clone());
        borrowers.spawn(async move { store.apply_loan(&key, day(1)).await });
    }

    let mut loaned = 0;
    let mut refused = 0;
    while let Some(outcome) = borrowers.join_next().await {
        match outcome.unwrap() {
            Ok(Applied::Loaned(_)) => loaned += 1,
            Err(StoreError::Business(BusinessError::NoCopiesAvailable)) => refused += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!((loaned, refused), (1, 7));
    assert_eq!(copies(&store, &base).await, 0);
}
