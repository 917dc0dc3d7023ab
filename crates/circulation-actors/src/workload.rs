// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload client: replays a request file against the coordinator.
//!
//! File format, one request per line:
//!
//! ```text
//! # operation,branch,user,book
//! LOAN,B1,U1,BK1
//! RENEW,B1,U1,BK1
//! RETURN,B1,U1,BK1
//! ```
//!
//! Blank lines and `#` comments are skipped. Malformed lines are reported and
//! skipped. A request is retried, after a backoff, until some coordinator on
//! the list answers.

use std::path::Path;
use std::time::Duration;

use circulation_protocol::{CommandResult, Envelope, EnvelopeCodec, Operation};
use tracing::{info, warn};

use crate::error::WorkloadError;
use crate::link::{Delivery, FailoverLink};

/// Parsed workload file.
#[derive(Debug, Default)]
pub struct Workload {
    pub requests: Vec<Envelope>,
    pub rejected: Vec<WorkloadError>,
}

impl Workload {
    pub fn parse(content: &str) -> Self {
        let mut workload = Workload::default();
        for (index, line) in content.lines().enumerate() {
            match parse_workload_line(index + 1, line) {
                Ok(Some(envelope)) => workload.requests.push(envelope),
                Ok(None) => {}
                Err(e) => workload.rejected.push(e),
            }
        }
        workload
    }

    pub fn load(path: &Path) -> Result<Self, WorkloadError> {
        let content = std::fs::read_to_string(path).map_err(|source| WorkloadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }
}

/// Parse one line; `Ok(None)` for blanks and comments.
pub fn parse_workload_line(line_no: usize, line: &str) -> Result<Option<Envelope>, WorkloadError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let malformed = |reason: String| WorkloadError::Malformed {
        line: line_no,
        reason,
    };

    let parts: Vec<&str> = line.splitn(4, ',').map(str::trim).collect();
    let [operation, branch_id, user_id, book_code] = parts.as_slice() else {
        return Err(malformed(format!("expected 4 fields in '{line}'")));
    };

    let operation: Operation = operation
        .to_ascii_uppercase()
        .parse()
        .map_err(|_| malformed(format!("unknown operation '{operation}'")))?;

    if [branch_id, user_id, book_code].iter().any(|f| f.is_empty()) {
        return Err(malformed(format!("empty field in '{line}'")));
    }

    Ok(Some(Envelope::new(operation, *branch_id, *user_id, *book_code)))
}

/// Pacing of the workload client.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Wait after the whole coordinator list failed
    pub retry_backoff: Duration,
    /// Pause between consecutive requests
    pub pause: Duration,
    /// Give up on a request after this many failed passes; `None` retries forever
    pub max_rounds: Option<u32>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(2),
            pause: Duration::from_millis(500),
            max_rounds: None,
        }
    }
}

/// Totals reported after a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkloadSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub undelivered: usize,
}

pub struct WorkloadClient {
    codec: EnvelopeCodec,
    link: FailoverLink,
    config: WorkloadConfig,
}

impl WorkloadClient {
    pub fn new(codec: EnvelopeCodec, link: FailoverLink, config: WorkloadConfig) -> Self {
        Self {
            codec,
            link,
            config,
        }
    }

    /// Send one request, passing over the coordinator list until one answers.
    ///
    /// `None` only when `max_rounds` is set and every pass failed.
    pub async fn submit(&mut self, envelope: &Envelope) -> Option<CommandResult> {
        let wire = match self.codec.encode_envelope(envelope) {
            Ok(wire) => wire,
            Err(e) => return Some(CommandResult::failure(format!("cannot encode request: {e}"))),
        };

        let mut rounds = 0u32;
        loop {
            match self.link.deliver(&wire).await {
                Delivery::Replied(reply) => {
                    return Some(self.codec.decode_result(&reply).unwrap_or_else(|e| {
                        CommandResult::failure(format!("invalid reply from coordinator: {e}"))
                    }));
                }
                Delivery::Refused(message) => return Some(CommandResult::failure(message)),
                Delivery::Unreachable => {
                    rounds += 1;
                    if self.config.max_rounds.is_some_and(|max| rounds >= max) {
                        return None;
                    }
                    warn!(
                        rounds,
                        backoff_ms = self.config.retry_backoff.as_millis() as u64,
                        "no coordinator reachable, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    /// Submit every request in order.
    pub async fn run(&mut self, requests: &[Envelope]) -> WorkloadSummary {
        let mut summary = WorkloadSummary::default();
        for (index, envelope) in requests.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.pause).await;
            }
            match self.submit(envelope).await {
                Some(result) if result.ok => {
                    info!(%envelope, message = %result.message, "request succeeded");
                    summary.succeeded += 1;
                }
                Some(result) => {
                    warn!(%envelope, message = %result.message, "request failed");
                    summary.failed += 1;
                }
                None => {
                    warn!(%envelope, "request undelivered");
                    summary.undelivered += 1;
                }
            }
        }
        summary
    }
}
