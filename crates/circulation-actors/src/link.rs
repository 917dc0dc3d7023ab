// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request delivery over an ordered endpoint list with failover.
//!
//! A [`FailoverLink`] sends each request to its current endpoint. On timeout or
//! transport error it advances to the next endpoint (wrapping around) with a
//! fresh client, making at most one attempt per endpoint per request. The
//! endpoint that last answered stays current for the next request.

use std::time::Duration;

use circulation_protocol::{
    ClientError, CommandResult, Endpoint, Envelope, EnvelopeCodec, RequestClient,
    RequestClientConfig,
};
use tracing::{debug, info, warn};

/// Outcome of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The peer answered.
    Replied(String),
    /// The peer was reached but answered with an error frame.
    Refused(String),
    /// Every endpoint failed.
    Unreachable,
}

enum DeliveryState {
    Attempting(usize),
    NextEndpoint { failed: usize },
    Done(Delivery),
}

/// Failover client over a fixed, ordered list of endpoints.
pub struct FailoverLink {
    peer: &'static str,
    endpoints: Vec<Endpoint>,
    config: RequestClientConfig,
    current: usize,
    client: RequestClient,
}

impl FailoverLink {
    /// `peer` names the remote side in logs and in the unreachable message.
    ///
    /// `endpoints` must not be empty; [`Endpoint::parse_list`] guarantees that.
    pub fn new(peer: &'static str, endpoints: Vec<Endpoint>, config: RequestClientConfig) -> Self {
        let first = endpoints
            .first()
            .cloned()
            .unwrap_or_else(|| Endpoint::new("127.0.0.1", 0));
        Self {
            peer,
            client: RequestClient::new(first, config.clone()),
            endpoints,
            config,
            current: 0,
        }
    }

    /// Link with the same timeout for connect, send and receive.
    pub fn with_timeout(peer: &'static str, endpoints: Vec<Endpoint>, timeout: Duration) -> Self {
        Self::new(peer, endpoints, RequestClientConfig::uniform(timeout))
    }

    pub fn peer(&self) -> &'static str {
        self.peer
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn current_endpoint(&self) -> &Endpoint {
        self.client.endpoint()
    }

    /// Message used when no endpoint could be reached.
    pub fn unreachable_message(&self) -> String {
        format!("no {} reachable", self.peer)
    }

    /// Deliver one raw request.
    pub async fn deliver(&mut self, request: &str) -> Delivery {
        if self.endpoints.is_empty() {
            return Delivery::Unreachable;
        }

        let mut state = DeliveryState::Attempting(self.current);
        let mut attempts = 0;

        loop {
            state = match state {
                DeliveryState::Attempting(index) => {
                    attempts += 1;
                    match self.client.request(request).await {
                        Ok(reply) => DeliveryState::Done(Delivery::Replied(reply)),
                        Err(ClientError::Remote(message)) => {
                            DeliveryState::Done(Delivery::Refused(message))
                        }
                        Err(e) => {
                            warn!(
                                peer = self.peer,
                                endpoint = %self.endpoints[index],
                                error = %e,
                                "delivery failed"
                            );
                            DeliveryState::NextEndpoint { failed: index }
                        }
                    }
                }
                DeliveryState::NextEndpoint { failed } => {
                    if attempts >= self.endpoints.len() {
                        DeliveryState::Done(Delivery::Unreachable)
                    } else {
                        let next = (failed + 1) % self.endpoints.len();
                        self.switch_to(next);
                        DeliveryState::Attempting(next)
                    }
                }
                DeliveryState::Done(delivery) => {
                    if delivery == Delivery::Unreachable {
                        warn!(peer = self.peer, attempts, "all endpoints failed");
                    }
                    return delivery;
                }
            };
        }
    }

    /// Seal `envelope`, deliver it and open the reply.
    ///
    /// Never fails: transport and decoding problems become failure results.
    pub async fn send(&mut self, codec: &EnvelopeCodec, envelope: &Envelope) -> CommandResult {
        let wire = match codec.encode_envelope(envelope) {
            Ok(wire) => wire,
            Err(e) => return CommandResult::failure(format!("cannot encode request: {e}")),
        };

        match self.deliver(&wire).await {
            Delivery::Replied(reply) => match codec.decode_result(&reply) {
                Ok(result) => result,
                Err(e) => {
                    warn!(peer = self.peer, error = %e, "undecodable reply");
                    CommandResult::failure(format!("invalid reply from {}: {e}", self.peer))
                }
            },
            Delivery::Refused(message) => CommandResult::failure(message),
            Delivery::Unreachable => CommandResult::failure(self.unreachable_message()),
        }
    }

    fn switch_to(&mut self, index: usize) {
        self.current = index;
        let endpoint = self.endpoints[index].clone();
        info!(peer = self.peer, %endpoint, "retrying with next endpoint");
        self.client = RequestClient::new(endpoint, self.config.clone());
        debug!(peer = self.peer, index, "client recreated");
    }
}
