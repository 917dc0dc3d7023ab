// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for circulation-storage.
//!
//! Each store owns one database (primary or secondary). The three business
//! transactions run inside an explicit transaction that commits on success
//! and rolls back on every error path. Replication writes are separate,
//! idempotent statements aimed at the secondary.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use circulation_protocol::Envelope;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::StoreError;

/// Days a loan runs before it is due; also the renewal extension.
pub const LOAN_PERIOD_DAYS: i64 = 7;

/// Maximum renewals per loan.
pub const MAX_RENEWALS: i32 = 2;

/// How long a request waits for a pooled connection before giving up.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Loan record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LoanRecord {
    pub loan_id: i64,
    pub user_id: String,
    pub book_code: String,
    pub branch_id: String,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub renewals: i32,
    pub status: String,
}

impl LoanRecord {
    pub fn key(&self) -> LoanKey {
        LoanKey::new(&self.branch_id, &self.user_id, &self.book_code)
    }

    pub fn loan_status(&self) -> Option<LoanStatus> {
        LoanStatus::parse(&self.status)
    }

    pub fn is_active(&self) -> bool {
        self.loan_status() == Some(LoanStatus::Active)
    }
}

/// Loan lifecycle states as stored in `loans.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanStatus {
    Active,
    Returned,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "ACTIVE",
            LoanStatus::Returned => "RETURNED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(LoanStatus::Active),
            "RETURNED" => Some(LoanStatus::Returned),
            _ => None,
        }
    }
}

/// Inventory row for one book at one branch.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InventoryRecord {
    pub branch_id: String,
    pub book_code: String,
    pub available_copies: i32,
}

/// The `(branch, user, book)` tuple a command targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoanKey {
    pub branch_id: String,
    pub user_id: String,
    pub book_code: String,
}

impl LoanKey {
    pub fn new(
        branch_id: impl Into<String>,
        user_id: impl Into<String>,
        book_code: impl Into<String>,
    ) -> Self {
        Self {
            branch_id: branch_id.into(),
            user_id: user_id.into(),
            book_code: book_code.into(),
        }
    }
}

impl From<&Envelope> for LoanKey {
    fn from(envelope: &Envelope) -> Self {
        Self::new(&envelope.branch_id, &envelope.user_id, &envelope.book_code)
    }
}

impl std::fmt::Display for LoanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "branch={} user={} book={}",
            self.branch_id, self.user_id, self.book_code
        )
    }
}

/// What a committed business transaction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A new active loan was created and inventory decremented.
    Loaned(LoanRecord),
    /// An active loan already existed; nothing changed.
    AlreadyLoaned,
    /// The active loan was returned and inventory incremented.
    Returned(LoanRecord),
    /// The latest loan was already returned; nothing changed.
    AlreadyReturned,
    /// Renewal count incremented and due date extended.
    Renewed(LoanRecord),
    /// The loan is at the renewal cap; nothing changed.
    RenewalLimitReached,
}

impl Applied {
    /// Human-readable outcome, sent back to the client.
    pub fn describe(&self) -> String {
        match self {
            Applied::Loaned(loan) => {
                format!("loan {} created, due {}", loan.loan_id, loan.due_date)
            }
            Applied::AlreadyLoaned => "loan already active, nothing to do".to_string(),
            Applied::Returned(loan) => format!("loan {} returned", loan.loan_id),
            Applied::AlreadyReturned => "loan already returned, nothing to do".to_string(),
            Applied::Renewed(loan) => format!(
                "loan {} renewed ({}/{}), due {}",
                loan.loan_id, loan.renewals, MAX_RENEWALS, loan.due_date
            ),
            Applied::RenewalLimitReached => {
                format!("renewal limit of {MAX_RENEWALS} reached, nothing to do")
            }
        }
    }

    /// Whether the transaction changed state (and so needs replicating).
    pub fn changed_state(&self) -> bool {
        matches!(
            self,
            Applied::Loaned(_) | Applied::Returned(_) | Applied::Renewed(_)
        )
    }
}

/// Storage operations against one circulation database.
#[async_trait]
pub trait CirculationStore: Send + Sync {
    /// Trivial round-trip (`SELECT 1`).
    async fn ping(&self) -> Result<(), StoreError>;

    /// Apply embedded migrations.
    async fn migrate(&self) -> Result<(), StoreError>;

    /// Create an active loan, or no-op if one already exists for the tuple.
    async fn apply_loan(&self, key: &LoanKey, today: NaiveDate) -> Result<Applied, StoreError>;

    /// Return the active loan, or no-op if the latest loan is already returned.
    async fn apply_return(&self, key: &LoanKey) -> Result<Applied, StoreError>;

    /// Renew the active loan, or no-op at the renewal cap.
    async fn apply_renewal(&self, key: &LoanKey) -> Result<Applied, StoreError>;

    /// Mirror a new loan. Returns `false` when the loan was already present.
    async fn replicate_new_loan(&self, loan: &LoanRecord) -> Result<bool, StoreError>;

    /// Mirror a return. Returns `false` when there was no active loan to flip.
    async fn replicate_return(&self, key: &LoanKey) -> Result<bool, StoreError>;

    /// Mirror a renewal. Returns `false` when the mirror was already up to date.
    async fn replicate_renewal(&self, loan: &LoanRecord) -> Result<bool, StoreError>;

    async fn find_active_loan(&self, key: &LoanKey) -> Result<Option<LoanRecord>, StoreError>;

    /// Most recent loan for the tuple by `start_date`, then `loan_id`.
    async fn latest_loan(&self, key: &LoanKey) -> Result<Option<LoanRecord>, StoreError>;

    async fn inventory(
        &self,
        branch_id: &str,
        book_code: &str,
    ) -> Result<Option<InventoryRecord>, StoreError>;

    async fn upsert_inventory(
        &self,
        branch_id: &str,
        book_code: &str,
        available_copies: i32,
    ) -> Result<(), StoreError>;
}

/// Open a store for `url`, choosing the backend from the scheme.
///
/// Pools connect lazily, so a store can be created while its database is down.
pub fn open_store(url: &str) -> Result<Arc<dyn CirculationStore>, StoreError> {
    if url.starts_with("sqlite:") {
        // One connection keeps SQLite writers strictly serialized.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(url)?;
        Ok(Arc::new(SqliteStore::new(pool)))
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(url)?;
        Ok(Arc::new(PostgresStore::new(pool)))
    } else {
        Err(StoreError::Database(sqlx::Error::Configuration(
            format!("unsupported database URL scheme: {url}").into(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan() -> LoanRecord {
        LoanRecord {
            loan_id: 3,
            user_id: "U1".into(),
            book_code: "BK1".into(),
            branch_id: "B1".into(),
            start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 3, 8).unwrap(),
            renewals: 1,
            status: "ACTIVE".into(),
        }
    }

    #[test]
    fn test_loan_key_from_envelope() {
        let key = LoanKey::from(&Envelope::loan("B1", "U1", "BK1"));
        assert_eq!(key, loan().key());
        assert_eq!(key.to_string(), "branch=B1 user=U1 book=BK1");
    }

    #[test]
    fn test_status_parsing() {
        assert!(loan().is_active());
        assert_eq!(LoanStatus::parse("RETURNED"), Some(LoanStatus::Returned));
        assert_eq!(LoanStatus::parse("LOST"), None);
        assert_eq!(LoanStatus::Active.as_str(), "ACTIVE");
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            Applied::Loaned(loan()).describe(),
            "loan 3 created, due 2025-03-08"
        );
        assert_eq!(
            Applied::Renewed(loan()).describe(),
            "loan 3 renewed (1/2), due 2025-03-08"
        );
        assert!(Applied::Returned(loan()).changed_state());
        assert!(!Applied::AlreadyReturned.changed_state());
        assert!(!Applied::RenewalLimitReached.changed_state());
    }

    #[tokio::test]
    async fn test_open_store_rejects_unknown_scheme() {
        assert!(open_store("mysql://localhost/library").is_err());
    }

    #[tokio::test]
    async fn test_open_store_is_lazy() {
        // Nothing listens here; creating the store must still succeed.
        assert!(open_store("postgres://postgres@127.0.0.1:1/library").is_ok());
    }
}
