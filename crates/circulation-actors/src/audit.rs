// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Append-only audit trail with size-based rotation.
//!
//! Each record is one line:
//!
//! ```text
//! 2025-03-01T10:15:00.123Z | pid=4242 | actor=LoanActor | action=LOAN_OK | status=OK | branch=B1 user=U1 book=BK1
//! ```
//!
//! Once the file grows past [`MAX_AUDIT_LOG_SIZE`] it is renamed to
//! `<file>.old` (replacing any previous one) before the next write. Recording
//! never fails the caller; I/O errors are logged and dropped.
//!
//! File work runs on the blocking pool, off the request handlers' runtime threads.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use tracing::warn;

/// Rotate once the log exceeds this many bytes.
pub const MAX_AUDIT_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Outcome column of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Ok,
    Fail,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Ok => "OK",
            AuditStatus::Fail => "FAIL",
        }
    }

    pub fn from_ok(ok: bool) -> Self {
        if ok { AuditStatus::Ok } else { AuditStatus::Fail }
    }
}

/// Shared handle to the audit file. Clones write to the same file.
#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
    max_size: u64,
    lock: Arc<Mutex<()>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_max_size(path, MAX_AUDIT_LOG_SIZE)
    }

    pub fn with_max_size(path: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            path: path.into(),
            max_size,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the log rotates to.
    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".old");
        PathBuf::from(name)
    }

    /// Append one record. Failures are logged, never returned.
    pub async fn record(&self, actor: &str, action: &str, status: AuditStatus, detail: &str) {
        let log = self.clone();
        let (actor, action, detail) = (actor.to_owned(), action.to_owned(), detail.to_owned());
        let written =
            tokio::task::spawn_blocking(move || log.try_record(&actor, &action, status, &detail))
                .await;

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %self.path.display(), error = %e, "audit write failed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "audit writer task failed"),
        }
    }

    fn try_record(
        &self,
        actor: &str,
        action: &str,
        status: AuditStatus,
        detail: &str,
    ) -> io::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| io::Error::other("audit lock poisoned"))?;

        self.rotate_if_needed()?;

        let line = format!(
            "{} | pid={} | actor={} | action={} | status={} | {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            std::process::id(),
            actor,
            action,
            status.as_str(),
            detail.replace('\n', " "),
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    fn rotate_if_needed(&self) -> io::Result<()> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() > self.max_size => fs::rename(&self.path, self.rotated_path()),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .field("max_size", &self.max_size)
            .finish()
    }
}
