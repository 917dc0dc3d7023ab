// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Load coordinator: the externally reachable dispatch endpoint.
//!
//! In [`CoordinatorMode::Async`] returns and renewals are acknowledged at once
//! and published on their topic; loans are forwarded to the loan actor and
//! the client waits for the outcome. [`CoordinatorMode::Sync`] forwards every
//! operation to its actor. The coordinator holds no state beyond its links.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use circulation_protocol::{
    CodecError, CommandResult, Endpoint, Envelope, EnvelopeCodec, Operation, Publisher,
    RequestHandler, RequestServer, ServerError,
};
use tracing::{debug, info, warn};

use crate::actor::audit_detail;
use crate::audit::{AuditLog, AuditStatus};
use crate::link::FailoverLink;

/// Name used for coordinator audit records.
pub const COORDINATOR_NAME: &str = "LoadCoordinator";

/// How returns and renewals reach their actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorMode {
    /// Acknowledge immediately and publish on the operation topic.
    #[default]
    Async,
    /// Forward to the actor and wait for its result.
    Sync,
}

impl CoordinatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorMode::Async => "async",
            CoordinatorMode::Sync => "sync",
        }
    }
}

impl fmt::Display for CoordinatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinatorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "async" => Ok(CoordinatorMode::Async),
            "sync" => Ok(CoordinatorMode::Sync),
            other => Err(format!("unknown coordinator mode '{other}' (expected async or sync)")),
        }
    }
}

/// One request link per actor.
pub struct ActorLinks {
    pub loan: FailoverLink,
    pub returns: FailoverLink,
    pub renewals: FailoverLink,
}

impl ActorLinks {
    pub fn new(
        loan: &Endpoint,
        returns: &Endpoint,
        renewals: &Endpoint,
        timeout: Duration,
    ) -> Self {
        Self {
            loan: FailoverLink::with_timeout("loan actor", vec![loan.clone()], timeout),
            returns: FailoverLink::with_timeout("return actor", vec![returns.clone()], timeout),
            renewals: FailoverLink::with_timeout("renewal actor", vec![renewals.clone()], timeout),
        }
    }

    fn get_mut(&mut self, operation: Operation) -> &mut FailoverLink {
        match operation {
            Operation::Loan => &mut self.loan,
            Operation::Return => &mut self.returns,
            Operation::Renew => &mut self.renewals,
        }
    }
}

/// Client-facing reply for an actor's result.
fn forwarded_reply(envelope: &Envelope, result: &CommandResult) -> CommandResult {
    let (granted, refused) = match envelope.operation {
        Operation::Loan => ("loan granted", "loan refused"),
        Operation::Return => ("return accepted", "return rejected"),
        Operation::Renew => ("renewal granted", "renewal refused"),
    };
    if result.ok {
        CommandResult::success(format!(
            "{granted} for book {}: {}",
            envelope.book_code, result.message
        ))
    } else {
        CommandResult::failure(format!(
            "{refused} for book {}: {}",
            envelope.book_code, result.message
        ))
    }
}

pub struct Coordinator {
    mode: CoordinatorMode,
    codec: EnvelopeCodec,
    publisher: Publisher,
    links: ActorLinks,
    audit: AuditLog,
}

impl Coordinator {
    pub fn new(
        mode: CoordinatorMode,
        codec: EnvelopeCodec,
        publisher: Publisher,
        links: ActorLinks,
        audit: AuditLog,
    ) -> Self {
        Self {
            mode,
            codec,
            publisher,
            links,
            audit,
        }
    }

    pub fn mode(&self) -> CoordinatorMode {
        self.mode
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Dispatch one decoded envelope. `wire` is its sealed form, republished as is.
    pub async fn dispatch(&mut self, envelope: &Envelope, wire: &str) -> CommandResult {
        match (self.mode, envelope.operation) {
            (CoordinatorMode::Async, Operation::Return | Operation::Renew) => {
                self.publish(envelope, wire)
            }
            _ => self.forward(envelope).await,
        }
    }

    fn publish(&self, envelope: &Envelope, wire: &str) -> CommandResult {
        let topic = envelope.operation.topic();
        let subscribers = self.publisher.publish(topic, wire);
        if subscribers == 0 {
            warn!(topic, %envelope, "no subscriber for topic, request will not be processed");
        } else {
            debug!(topic, subscribers, %envelope, "published");
        }
        CommandResult::success(format!(
            "{} request received for book {}",
            envelope.operation, envelope.book_code
        ))
    }

    async fn forward(&mut self, envelope: &Envelope) -> CommandResult {
        let result = self
            .links
            .get_mut(envelope.operation)
            .send(&self.codec, envelope)
            .await;

        let status = AuditStatus::from_ok(result.ok);
        self.audit.record(
            COORDINATOR_NAME,
            &format!("{}_{}", envelope.operation, status.as_str()),
            status,
            &format!("{} message={}", audit_detail(envelope), result.message),
        )
        .await;

        let reply = forwarded_reply(envelope, &result);
        info!(%envelope, ok = reply.ok, message = %reply.message, "request forwarded");
        reply
    }

    /// Decode, dispatch and seal the reply for one client request.
    pub async fn handle_wire(&mut self, wire: &str) -> Result<String, CodecError> {
        let result = match self.codec.decode_envelope(wire) {
            Ok(envelope) => self.dispatch(&envelope, wire).await,
            Err(e) => {
                warn!(error = %e, "rejecting undecodable request");
                CommandResult::failure(e.to_string())
            }
        };
        self.codec.encode_result(&result)
    }
}

#[async_trait]
impl RequestHandler for Coordinator {
    async fn handle(&mut self, request: String) -> Result<String, String> {
        self.handle_wire(&request).await.map_err(|e| e.to_string())
    }
}

/// Bind `endpoint` and serve `coordinator` until the future is dropped.
pub async fn serve(endpoint: &Endpoint, coordinator: Coordinator) -> Result<(), ServerError> {
    let server = RequestServer::bind(endpoint).await?;
    info!(
        %endpoint,
        mode = %coordinator.mode(),
        addr = ?server.local_addr().ok(),
        "coordinator listening"
    );
    server.serve(coordinator).await
}
