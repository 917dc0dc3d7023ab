// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for the actors integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use circulation_protocol::{
    CodecKeys, CommandResult, Endpoint, Envelope, EnvelopeCodec, Publisher, RequestHandler,
    RequestServer,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Codec with a single PBKDF2 round so tests stay fast.
pub fn codec() -> EnvelopeCodec {
    EnvelopeCodec::new(&CodecKeys::new("test-encryption", "test-mac").with_rounds(1))
}

pub fn loopback() -> Endpoint {
    Endpoint::new("127.0.0.1", 0)
}

/// An endpoint nothing listens on.
pub async fn dead_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    drop(listener);
    endpoint
}

/// A request server running in the background; aborted on drop.
pub struct RunningServer {
    pub endpoint: Endpoint,
    handle: JoinHandle<()>,
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_server<H: RequestHandler + 'static>(handler: H) -> RunningServer {
    let server = RequestServer::bind(&loopback()).await.unwrap();
    let endpoint = Endpoint::from(server.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let _ = server.serve(handler).await;
    });
    RunningServer { endpoint, handle }
}

pub async fn bind_publisher() -> (Publisher, Endpoint) {
    let publisher = Publisher::bind(&loopback()).await.unwrap();
    let endpoint = Endpoint::from(publisher.local_addr());
    (publisher, endpoint)
}

/// Storage service stand-in: records decoded envelopes and answers with a
/// fixed outcome.
#[derive(Clone)]
pub struct FakeStorage {
    codec: EnvelopeCodec,
    received: Arc<Mutex<Vec<Envelope>>>,
    refuse_with: Option<String>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self {
            codec: codec(),
            received: Arc::new(Mutex::new(Vec::new())),
            refuse_with: None,
        }
    }

    /// Answer every request with a failure carrying `message`.
    pub fn refusing(message: &str) -> Self {
        Self {
            refuse_with: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestHandler for FakeStorage {
    async fn handle(&mut self, request: String) -> Result<String, String> {
        let result = match self.codec.decode_envelope(&request) {
            Ok(envelope) => {
                let result = match &self.refuse_with {
                    Some(message) => CommandResult::failure(message.clone()),
                    None => CommandResult::success(format!(
                        "{} applied for book {}",
                        envelope.operation, envelope.book_code
                    )),
                };
                self.received.lock().unwrap().push(envelope);
                result
            }
            Err(e) => CommandResult::failure(e.to_string()),
        };
        self.codec.encode_result(&result).map_err(|e| e.to_string())
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
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
