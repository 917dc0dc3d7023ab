// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request/reply server over framed TCP.
//!
//! Any number of peers may connect. Each connection task reads request frames
//! and queues them; a single loop runs the [`RequestHandler`], so requests are
//! handled strictly one at a time per process. Replies go back on the
//! connection that asked.

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::TaskGuard;
use crate::endpoint::Endpoint;
use crate::frame::{Frame, FrameError, FramedStream, MessageType};

/// Capacity of the queue between connection tasks and the handler loop.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Errors that can occur in the servers
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handles one request at a time.
///
/// `Err` is sent back to the peer as an error frame.
#[async_trait]
pub trait RequestHandler: Send {
    async fn handle(&mut self, request: String) -> Result<String, String>;
}

struct Job {
    request: String,
    reply: oneshot::Sender<Result<String, String>>,
}

/// A bound request endpoint.
pub struct RequestServer {
    listener: TcpListener,
    endpoint: Endpoint,
}

impl RequestServer {
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, ServerError> {
        let listener = bind_listener(endpoint).await?;
        Ok(Self {
            listener,
            endpoint: endpoint.clone(),
        })
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until the future is dropped.
    #[instrument(skip(self, handler), fields(endpoint = %self.endpoint))]
    pub async fn serve<H: RequestHandler>(self, mut handler: H) -> Result<(), ServerError> {
        info!("request server running");

        let (jobs_tx, mut jobs_rx) = mpsc::channel::<Job>(REQUEST_QUEUE_CAPACITY);
        let _acceptor = TaskGuard::spawn(accept_loop(self.listener, jobs_tx));

        while let Some(job) = jobs_rx.recv().await {
            let reply = handler.handle(job.request).await;
            // The peer may have gone away while we were working.
            let _ = job.reply.send(reply);
        }

        Ok(())
    }
}

pub(crate) async fn bind_listener(endpoint: &Endpoint) -> Result<TcpListener, ServerError> {
    TcpListener::bind(endpoint.bind_address())
        .await
        .map_err(|source| ServerError::Bind {
            endpoint: endpoint.clone(),
            source,
        })
}

async fn accept_loop(listener: TcpListener, jobs: mpsc::Sender<Job>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "accepted connection");
                    socket.set_nodelay(true).ok();
                    connections.spawn(handle_connection(socket, peer, jobs.clone()));
                }
                Err(e) => warn!("failed to accept connection: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn handle_connection(socket: TcpStream, peer: SocketAddr, jobs: mpsc::Sender<Job>) {
    let mut stream = FramedStream::new(socket);
    loop {
        let frame = match stream.read_frame().await {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => {
                debug!(%peer, "connection closed");
                return;
            }
            Err(e) => {
                warn!(%peer, "dropping connection: {}", e);
                return;
            }
        };

        let outcome = match frame.message_type {
            MessageType::Request => match frame.text() {
                Ok(request) => dispatch(&jobs, request).await,
                Err(e) => Err(e.to_string()),
            },
            other => Err(format!("unexpected message type {other:?}")),
        };

        let reply = match outcome {
            Ok(body) => Frame::response(&body),
            Err(message) => Frame::error(&message),
        };
        let written = match reply {
            Ok(frame) => stream.write_frame(&frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(%peer, "failed to write reply: {}", e);
            return;
        }
    }
}

async fn dispatch(jobs: &mpsc::Sender<Job>, request: String) -> Result<String, String> {
    let (reply_tx, reply_rx) = oneshot::channel();
    jobs.send(Job {
        request,
        reply: reply_tx,
    })
    .await
    .map_err(|_| "server is shutting down".to_string())?;
    reply_rx
        .await
        .map_err(|_| "request was dropped".to_string())?
}
