// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Actor-facing storage service.
//!
//! Decodes sealed envelopes, runs the matching gateway operation and replies
//! with a sealed [`CommandResult`].

use std::sync::Arc;

use async_trait::async_trait;
use circulation_protocol::{
    CodecError, CommandResult, Endpoint, Envelope, EnvelopeCodec, RequestHandler, RequestServer,
    ServerError,
};
use tracing::{debug, info, warn};

use crate::gateway::StorageGateway;
use crate::persistence::LoanKey;

/// Request handler backing the storage endpoint.
pub struct StorageService {
    codec: EnvelopeCodec,
    gateway: Arc<StorageGateway>,
}

impl StorageService {
    pub fn new(codec: EnvelopeCodec, gateway: Arc<StorageGateway>) -> Self {
        Self { codec, gateway }
    }

    pub fn gateway(&self) -> &Arc<StorageGateway> {
        &self.gateway
    }

    /// Run one decoded command through the gateway.
    pub async fn process(&self, envelope: &Envelope) -> CommandResult {
        let key = LoanKey::from(envelope);
        match self.gateway.apply(envelope.operation, &key).await {
            Ok(applied) => CommandResult::success(applied.describe()),
            Err(e) => CommandResult::failure(e.to_string()),
        }
    }

    /// Decode, process and encode one wire request.
    ///
    /// Malformed or tampered requests still get a sealed failure result. Only
    /// a failure to seal the reply itself is returned as an error.
    pub async fn handle_raw(&self, wire: &str) -> Result<String, CodecError> {
        let result = match self.codec.decode_envelope(wire) {
            Ok(envelope) => {
                debug!(%envelope, "storage request");
                self.process(&envelope).await
            }
            Err(e) => {
                warn!(error = %e, "rejecting undecodable request");
                CommandResult::failure(e.to_string())
            }
        };
        self.codec.encode_result(&result)
    }
}

#[async_trait]
impl RequestHandler for StorageService {
    async fn handle(&mut self, request: String) -> Result<String, String> {
        self.handle_raw(&request).await.map_err(|e| e.to_string())
    }
}

/// Bind `endpoint` and serve `service` until the future is dropped.
pub async fn serve(endpoint: &Endpoint, service: StorageService) -> Result<(), ServerError> {
    let server = RequestServer::bind(endpoint).await?;
    info!(%endpoint, addr = ?server.local_addr().ok(), "storage service listening");
    server.serve(service).await
}
