// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request actors: one process per operation, forwarding to the storage service.
//!
//! An actor accepts sealed envelopes on its request endpoint and, for return
//! and renewal, also from the coordinator's topic. Either way the envelope is
//! delivered through a single [`FailoverLink`] to the storage service, one
//! delivery at a time, and every outcome is written to the audit log.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use circulation_protocol::{
    CodecError, CommandResult, Endpoint, Envelope, EnvelopeCodec, Operation, RequestHandler,
    RequestServer, ServerError, Subscriber,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, AuditStatus};
use crate::config::Config;
use crate::error::ActorError;
use crate::link::FailoverLink;

/// Delay before a lost publisher connection is retried.
const SUBSCRIBER_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Audit and log name of the actor for `operation`.
pub fn actor_name(operation: Operation) -> &'static str {
    match operation {
        Operation::Loan => "LoanActor",
        Operation::Return => "ReturnActor",
        Operation::Renew => "RenewalActor",
    }
}

/// `branch=… user=… book=…` detail column shared by audit records.
pub(crate) fn audit_detail(envelope: &Envelope) -> String {
    format!(
        "branch={} user={} book={}",
        envelope.branch_id, envelope.user_id, envelope.book_code
    )
}

/// Forwards one kind of operation to the storage service.
///
/// Clones share the storage link and the audit file, so the request endpoint
/// and the subscription can run side by side.
#[derive(Clone)]
pub struct RequestActor {
    operation: Operation,
    codec: EnvelopeCodec,
    link: Arc<Mutex<FailoverLink>>,
    audit: AuditLog,
}

impl RequestActor {
    pub fn new(
        operation: Operation,
        codec: EnvelopeCodec,
        link: FailoverLink,
        audit: AuditLog,
    ) -> Self {
        Self {
            operation,
            codec,
            link: Arc::new(Mutex::new(link)),
            audit,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn name(&self) -> &'static str {
        actor_name(self.operation)
    }

    /// Deliver a decoded envelope and audit the outcome.
    pub async fn handle_envelope(&self, envelope: &Envelope) -> CommandResult {
        if envelope.operation != self.operation {
            let err = ActorError::WrongOperation {
                actor: self.name(),
                operation: envelope.operation,
            };
            warn!(actor = self.name(), %envelope, "rejecting request");
            return CommandResult::failure(err.to_string());
        }

        let result = {
            let mut link = self.link.lock().await;
            link.send(&self.codec, envelope).await
        };

        let mut detail = audit_detail(envelope);
        if !result.ok {
            detail.push_str(&format!(" error={}", result.message));
        }
        let status = AuditStatus::from_ok(result.ok);
        self.audit.record(
            self.name(),
            &format!("{}_{}", self.operation, status.as_str()),
            status,
            &detail,
        )
        .await;

        if result.ok {
            info!(actor = self.name(), %envelope, message = %result.message, "request applied");
        } else {
            warn!(actor = self.name(), %envelope, message = %result.message, "request failed");
        }
        result
    }

    /// Decode one wire request, deliver it and seal the result.
    pub async fn handle_wire(&self, wire: &str) -> Result<String, CodecError> {
        let result = match self.codec.decode_envelope(wire) {
            Ok(envelope) => self.handle_envelope(&envelope).await,
            Err(e) => {
                warn!(actor = self.name(), error = %e, "rejecting undecodable request");
                CommandResult::failure(e.to_string())
            }
        };
        self.codec.encode_result(&result)
    }

    /// Consume publications until the subscriber closes.
    ///
    /// Nobody waits for these results; they only reach the audit log.
    pub async fn run_subscription(&self, mut subscriber: Subscriber) {
        info!(actor = self.name(), topic = self.operation.topic(), "consuming topic");
        while let Some(publication) = subscriber.recv().await {
            debug!(actor = self.name(), topic = %publication.topic, "publication received");
            match self.codec.decode_envelope(&publication.body) {
                Ok(envelope) => {
                    self.handle_envelope(&envelope).await;
                }
                Err(e) => warn!(actor = self.name(), error = %e, "dropping undecodable publication"),
            }
        }
        info!(actor = self.name(), "subscription closed");
    }
}

#[async_trait]
impl RequestHandler for RequestActor {
    async fn handle(&mut self, request: String) -> Result<String, String> {
        self.handle_wire(&request).await.map_err(|e| e.to_string())
    }
}

/// Bind `endpoint` and serve `actor` until the future is dropped.
pub async fn serve(endpoint: &Endpoint, actor: RequestActor) -> Result<(), ServerError> {
    let server = RequestServer::bind(endpoint).await?;
    info!(actor = actor.name(), %endpoint, addr = ?server.local_addr().ok(), "actor listening");
    server.serve(actor).await
}

/// Run the actor for `operation` until `shutdown` completes.
///
/// With `subscribe`, the actor also consumes its topic from the configured
/// publishers. Both paths share one storage link.
pub async fn run_actor<F>(
    operation: Operation,
    config: &Config,
    subscribe: bool,
    shutdown: F,
) -> Result<(), ActorError>
where
    F: Future<Output = ()>,
{
    let link = FailoverLink::with_timeout(
        "storage service",
        config.storage_endpoints.clone(),
        config.storage_timeout,
    );
    let actor = RequestActor::new(
        operation,
        EnvelopeCodec::new(&config.keys),
        link,
        AuditLog::new(&config.audit_path),
    );

    let consumer = subscribe.then(|| {
        let subscriber = Subscriber::connect(
            config.subscribe_endpoints.clone(),
            vec![operation.topic().to_string()],
            SUBSCRIBER_RECONNECT_INTERVAL,
        );
        let actor = actor.clone();
        tokio::spawn(async move { actor.run_subscription(subscriber).await })
    });

    let outcome = tokio::select! {
        served = serve(config.actor_endpoint(operation), actor) => served.map_err(ActorError::from),
        _ = shutdown => Ok(()),
    };

    if let Some(consumer) = consumer {
        consumer.abort();
    }
    outcome
}
