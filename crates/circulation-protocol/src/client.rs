// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request/reply client over framed TCP.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::endpoint::Endpoint;
use crate::frame::{Frame, FrameError, FramedStream, MessageType};

/// Errors that can occur in the request client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} to {endpoint} timed out after {timeout:?}")]
    Timeout {
        endpoint: Endpoint,
        operation: &'static str,
        timeout: Duration,
    },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("remote error: {0}")]
    Remote(String),
}

/// Timeouts for the request client
#[derive(Debug, Clone)]
pub struct RequestClientConfig {
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
}

impl Default for RequestClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(2),
            recv_timeout: Duration::from_secs(2),
        }
    }
}

impl RequestClientConfig {
    /// Same timeout for connect, send and receive.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            send_timeout: timeout,
            recv_timeout: timeout,
        }
    }
}

/// Client for one request endpoint.
///
/// Connects lazily. Any failure drops the connection, so the next request
/// starts from a fresh socket.
pub struct RequestClient {
    endpoint: Endpoint,
    config: RequestClientConfig,
    stream: Option<FramedStream<TcpStream>>,
}

impl RequestClient {
    pub fn new(endpoint: Endpoint, config: RequestClientConfig) -> Self {
        Self {
            endpoint,
            config,
            stream: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Drop the current connection, if any.
    pub fn reset(&mut self) {
        self.stream = None;
    }

    /// Connect to the endpoint if not already connected.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.endpoint.connect_address();
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ClientError::Timeout {
                endpoint: self.endpoint.clone(),
                operation: "connect",
                timeout: self.config.connect_timeout,
            })?
            .map_err(|source| ClientError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        stream.set_nodelay(true).ok();

        debug!(endpoint = %self.endpoint, "connected");
        self.stream = Some(FramedStream::new(stream));
        Ok(())
    }

    /// Send one request and wait for its reply.
    #[instrument(skip(self, request), fields(endpoint = %self.endpoint))]
    pub async fn request(&mut self, request: &str) -> Result<String, ClientError> {
        let result = self.exchange(request).await;
        if result.is_err() {
            self.reset();
        }
        result
    }

    async fn exchange(&mut self, request: &str) -> Result<String, ClientError> {
        self.connect().await?;
        let frame = Frame::request(request)?;
        let config = self.config.clone();
        let endpoint = self.endpoint.clone();

        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::Frame(FrameError::ConnectionClosed));
        };

        tokio::time::timeout(config.send_timeout, stream.write_frame(&frame))
            .await
            .map_err(|_| ClientError::Timeout {
                endpoint: endpoint.clone(),
                operation: "send",
                timeout: config.send_timeout,
            })??;

        let reply = tokio::time::timeout(config.recv_timeout, stream.read_frame())
            .await
            .map_err(|_| ClientError::Timeout {
                endpoint,
                operation: "receive",
                timeout: config.recv_timeout,
            })??;

        match reply.message_type {
            MessageType::Response => Ok(reply.text()?),
            MessageType::Error => Err(ClientError::Remote(reply.text()?)),
            other => Err(FrameError::UnexpectedMessageType(other).into()),
        }
    }
}
