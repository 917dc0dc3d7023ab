// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed circulation store.
//!
//! SQLite has no `SELECT ... FOR UPDATE`; the store is meant to run on a
//! single-connection pool, which serializes every transaction.

use std::path::Path;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::warn;

use super::{
    ACQUIRE_TIMEOUT, Applied, CirculationStore, InventoryRecord, LOAN_PERIOD_DAYS, LoanKey,
    LoanRecord, LoanStatus, MAX_RENEWALS,
};
use crate::error::{BusinessError, StoreError};
use crate::migrations;

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn active_loan_in(
    conn: &mut SqliteConnection,
    key: &LoanKey,
) -> Result<Option<LoanRecord>, sqlx::Error> {
    sqlx::query_as::<_, LoanRecord>(
        r#"
        SELECT loan_id, user_id, book_code, branch_id, start_date, due_date, renewals, status
        FROM loans
        WHERE user_id = ? AND book_code = ? AND branch_id = ? AND status = 'ACTIVE'
        "#,
    )
    .bind(&key.user_id)
    .bind(&key.book_code)
    .bind(&key.branch_id)
    .fetch_optional(conn)
    .await
}

async fn latest_loan_in(
    conn: &mut SqliteConnection,
    key: &LoanKey,
) -> Result<Option<LoanRecord>, sqlx::Error> {
    sqlx::query_as::<_, LoanRecord>(
        r#"
        SELECT loan_id, user_id, book_code, branch_id, start_date, due_date, renewals, status
        FROM loans
        WHERE user_id = ? AND book_code = ? AND branch_id = ?
        ORDER BY start_date DESC, loan_id DESC
        LIMIT 1
        "#,
    )
    .bind(&key.user_id)
    .bind(&key.book_code)
    .bind(&key.branch_id)
    .fetch_optional(conn)
    .await
}

async fn adjust_inventory(
    conn: &mut SqliteConnection,
    key: &LoanKey,
    delta: i32,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE branch_inventory
        SET available_copies = available_copies + ?
        WHERE branch_id = ? AND book_code = ? AND available_copies + ? >= 0
        "#,
    )
    .bind(delta)
    .bind(&key.branch_id)
    .bind(&key.book_code)
    .bind(delta)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl CirculationStore for SqliteStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        migrations::run_sqlite(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }

    async fn apply_loan(&self, key: &LoanKey, today: NaiveDate) -> Result<Applied, StoreError> {
        let mut tx = self.pool.begin().await?;

        let copies: Option<i32> = sqlx::query_scalar(
            "SELECT available_copies FROM branch_inventory WHERE branch_id = ? AND book_code = ?",
        )
        .bind(&key.branch_id)
        .bind(&key.book_code)
        .fetch_optional(&mut *tx)
        .await?;

        if active_loan_in(&mut *tx, key).await?.is_some() {
            tx.commit().await?;
            return Ok(Applied::AlreadyLoaned);
        }

        let rejection = match copies {
            None => Some(BusinessError::BookNotInInventory),
            Some(n) if n <= 0 => Some(BusinessError::NoCopiesAvailable),
            Some(_) => None,
        };
        if let Some(rejection) = rejection {
            tx.rollback().await?;
            return Err(rejection.into());
        }

        adjust_inventory(&mut *tx, key, -1).await?;

        let due = today + TimeDelta::days(LOAN_PERIOD_DAYS);
        let loan = sqlx::query_as::<_, LoanRecord>(
            r#"
            INSERT INTO loans (user_id, book_code, branch_id, start_date, due_date, renewals, status)
            VALUES (?, ?, ?, ?, ?, 0, 'ACTIVE')
            RETURNING loan_id, user_id, book_code, branch_id, start_date, due_date, renewals, status
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.book_code)
        .bind(&key.branch_id)
        .bind(today)
        .bind(due)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Applied::Loaned(loan))
    }

    async fn apply_return(&self, key: &LoanKey) -> Result<Applied, StoreError> {
        let mut tx = self.pool.begin().await?;

        let returned = sqlx::query_as::<_, LoanRecord>(
            r#"
            UPDATE loans
            SET status = 'RETURNED'
            WHERE user_id = ? AND book_code = ? AND branch_id = ? AND status = 'ACTIVE'
            RETURNING loan_id, user_id, book_code, branch_id, start_date, due_date, renewals, status
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.book_code)
        .bind(&key.branch_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(loan) = returned {
            if adjust_inventory(&mut *tx, key, 1).await? == 0 {
                warn!(%key, "returned loan has no inventory row");
            }
            tx.commit().await?;
            return Ok(Applied::Returned(loan));
        }

        let rejection = match latest_loan_in(&mut *tx, key).await? {
            None => BusinessError::NoLoanToReturn,
            Some(loan) if loan.loan_status() == Some(LoanStatus::Returned) => {
                tx.commit().await?;
                return Ok(Applied::AlreadyReturned);
            }
            Some(loan) => BusinessError::InconsistentState {
                detail: format!("loan {} has status {}", loan.loan_id, loan.status),
            },
        };
        tx.rollback().await?;
        Err(rejection.into())
    }

    async fn apply_renewal(&self, key: &LoanKey) -> Result<Applied, StoreError> {
        let mut tx = self.pool.begin().await?;

        let renewed = sqlx::query_as::<_, LoanRecord>(
            r#"
            UPDATE loans
            SET renewals = renewals + 1, due_date = date(due_date, ?)
            WHERE user_id = ? AND book_code = ? AND branch_id = ?
              AND status = 'ACTIVE' AND renewals < ?
            RETURNING loan_id, user_id, book_code, branch_id, start_date, due_date, renewals, status
            "#,
        )
        .bind(format!("+{LOAN_PERIOD_DAYS} days"))
        .bind(&key.user_id)
        .bind(&key.book_code)
        .bind(&key.branch_id)
        .bind(MAX_RENEWALS)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(loan) = renewed {
            tx.commit().await?;
            return Ok(Applied::Renewed(loan));
        }

        let rejection = match latest_loan_in(&mut *tx, key).await? {
            None => BusinessError::NoLoanToRenew,
            Some(loan) if !loan.is_active() => BusinessError::NotActive {
                status: loan.status,
            },
            Some(loan) if loan.renewals >= MAX_RENEWALS => {
                tx.commit().await?;
                return Ok(Applied::RenewalLimitReached);
            }
            Some(loan) => BusinessError::InconsistentState {
                detail: format!("loan {} could not be renewed", loan.loan_id),
            },
        };
        tx.rollback().await?;
        Err(rejection.into())
    }

    async fn replicate_new_loan(&self, loan: &LoanRecord) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO loans (user_id, book_code, branch_id, start_date, due_date, renewals, status)
            VALUES (?, ?, ?, ?, ?, ?, 'ACTIVE')
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&loan.user_id)
        .bind(&loan.book_code)
        .bind(&loan.branch_id)
        .bind(loan.start_date)
        .bind(loan.due_date)
        .bind(loan.renewals)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            adjust_inventory(&mut *tx, &loan.key(), -1).await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn replicate_return(&self, key: &LoanKey) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            r#"
            UPDATE loans
            SET status = 'RETURNED'
            WHERE user_id = ? AND book_code = ? AND branch_id = ? AND status = 'ACTIVE'
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.book_code)
        .bind(&key.branch_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if flipped {
            adjust_inventory(&mut *tx, key, 1).await?;
        }
        tx.commit().await?;
        Ok(flipped)
    }

    async fn replicate_renewal(&self, loan: &LoanRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET renewals = ?, due_date = ?
            WHERE user_id = ? AND book_code = ? AND branch_id = ?
              AND status = 'ACTIVE' AND renewals < ?
            "#,
        )
        .bind(loan.renewals)
        .bind(loan.due_date)
        .bind(&loan.user_id)
        .bind(&loan.book_code)
        .bind(&loan.branch_id)
        .bind(loan.renewals)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_active_loan(&self, key: &LoanKey) -> Result<Option<LoanRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(active_loan_in(&mut *conn, key).await?)
    }

    async fn latest_loan(&self, key: &LoanKey) -> Result<Option<LoanRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(latest_loan_in(&mut *conn, key).await?)
    }

    async fn inventory(
        &self,
        branch_id: &str,
        book_code: &str,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        let record = sqlx::query_as::<_, InventoryRecord>(
            r#"
            SELECT branch_id, book_code, available_copies
            FROM branch_inventory
            WHERE branch_id = ? AND book_code = ?
            "#,
        )
        .bind(branch_id)
        .bind(book_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn upsert_inventory(
        &self,
        branch_id: &str,
        book_code: &str,
        available_copies: i32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO branch_inventory (branch_id, book_code, available_copies)
            VALUES (?, ?, ?)
            ON CONFLICT(branch_id, book_code) DO UPDATE SET
                available_copies = excluded.available_copies
            "#,
        )
        .bind(branch_id)
        .bind(book_code)
        .bind(available_copies)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
