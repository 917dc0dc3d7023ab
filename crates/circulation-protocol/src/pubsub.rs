// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Topic fan-out over framed TCP.
//!
//! Subscribers connect to a [`Publisher`] and send one `Subscribe` frame per
//! topic; the publisher acknowledges each with a `Response` frame carrying the
//! topic. From the acknowledgement on, every publication on that topic is
//! forwarded to the connection in publication order. Publishing never blocks:
//! with nobody subscribed to the topic, the message is simply dropped.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::TaskGuard;
use crate::endpoint::Endpoint;
use crate::frame::{Frame, FrameError, FramedStream, MessageType};
use crate::server::{ServerError, bind_listener};

/// Publications buffered per subscriber connection before it starts lagging.
const PUBLICATION_BUFFER: usize = 1024;

/// One message received on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub body: String,
}

/// Number of live subscriber connections per topic.
#[derive(Clone, Default)]
struct TopicRegistry(Arc<Mutex<HashMap<String, usize>>>);

impl TopicRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, topic: &str) {
        *self.lock().entry(topic.to_string()).or_default() += 1;
    }

    fn remove(&self, topic: &str) {
        let mut counts = self.lock();
        if let Some(count) = counts.get_mut(topic) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(topic);
            }
        }
    }

    fn count(&self, topic: &str) -> usize {
        self.lock().get(topic).copied().unwrap_or(0)
    }
}

/// A bound publish endpoint.
pub struct Publisher {
    publications: broadcast::Sender<Publication>,
    topics: TopicRegistry,
    local_addr: SocketAddr,
    _acceptor: TaskGuard,
}

impl Publisher {
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, ServerError> {
        let listener = bind_listener(endpoint).await?;
        let local_addr = listener.local_addr()?;
        let (publications, _) = broadcast::channel(PUBLICATION_BUFFER);
        let topics = TopicRegistry::default();

        info!(endpoint = %endpoint, "publisher listening");
        let acceptor = TaskGuard::spawn(accept_subscribers(
            listener,
            publications.clone(),
            topics.clone(),
        ));

        Ok(Self {
            publications,
            topics,
            local_addr,
            _acceptor: acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.count(topic)
    }

    /// Publish `body` on `topic`. Returns the number of connections subscribed
    /// to that topic.
    pub fn publish(&self, topic: &str, body: &str) -> usize {
        let subscribers = self.topics.count(topic);
        if subscribers == 0 {
            debug!(topic, "no subscribers for topic, publication dropped");
            return 0;
        }
        let publication = Publication {
            topic: topic.to_string(),
            body: body.to_string(),
        };
        match self.publications.send(publication) {
            Ok(_) => subscribers,
            Err(_) => {
                debug!(topic, "no subscribers connected, publication dropped");
                0
            }
        }
    }
}

async fn accept_subscribers(
    listener: TcpListener,
    publications: broadcast::Sender<Publication>,
    registry: TopicRegistry,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "subscriber connected");
                    socket.set_nodelay(true).ok();
                    connections.spawn(serve_subscriber(
                        socket,
                        peer,
                        publications.subscribe(),
                        registry.clone(),
                    ));
                }
                Err(e) => warn!("failed to accept subscriber: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_subscriber(
    socket: TcpStream,
    peer: SocketAddr,
    mut publications: broadcast::Receiver<Publication>,
    registry: TopicRegistry,
) {
    let (read_half, write_half) = socket.into_split();
    let (topics_tx, mut topics_rx) = mpsc::channel::<String>(16);

    let _reader = TaskGuard::spawn(async move {
        let mut reader = FramedStream::new(read_half);
        loop {
            match reader.read_frame().await {
                Ok(frame) if frame.message_type == MessageType::Subscribe => {
                    let Ok(topic) = frame.text() else {
                        warn!(%peer, "ignoring non UTF-8 topic");
                        continue;
                    };
                    if topics_tx.send(topic).await.is_err() {
                        return;
                    }
                }
                Ok(frame) => debug!(%peer, message_type = ?frame.message_type, "ignoring frame"),
                Err(_) => return,
            }
        }
    });

    let mut writer = FramedStream::new(write_half);
    let mut topics = HashSet::new();
    loop {
        let written = tokio::select! {
            topic = topics_rx.recv() => match topic {
                Some(topic) => {
                    debug!(%peer, topic = %topic, "subscribed");
                    let ack = Frame::response(&topic);
                    if topics.insert(topic.clone()) {
                        registry.add(&topic);
                    }
                    match ack {
                        Ok(frame) => writer.write_frame(&frame).await,
                        Err(e) => Err(e),
                    }
                }
                None => break,
            },
            received = publications.recv() => match received {
                Ok(publication) if topics.contains(&publication.topic) => {
                    match Frame::publish(&publication.topic, &publication.body) {
                        Ok(frame) => writer.write_frame(&frame).await,
                        Err(e) => Err(e),
                    }
                }
                Ok(_) => Ok(()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%peer, skipped, "subscriber lagging, publications lost");
                    Ok(())
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if let Err(e) = written {
            debug!(%peer, "subscriber connection ended: {}", e);
            break;
        }
    }

    for topic in &topics {
        registry.remove(topic);
    }
}

/// Receives publications from one or more publishers.
///
/// Each publisher endpoint gets its own connection task, which reconnects
/// after `reconnect_interval` whenever the connection is lost.
pub struct Subscriber {
    publications: mpsc::Receiver<Publication>,
    subscribed: watch::Receiver<usize>,
    endpoint_count: usize,
    _connections: Vec<TaskGuard>,
}

impl Subscriber {
    pub fn connect(
        endpoints: Vec<Endpoint>,
        topics: Vec<String>,
        reconnect_interval: Duration,
    ) -> Self {
        let (publications_tx, publications) = mpsc::channel(PUBLICATION_BUFFER);
        let (subscribed_tx, subscribed) = watch::channel(0usize);
        let endpoint_count = endpoints.len();

        let connections = endpoints
            .into_iter()
            .map(|endpoint| {
                TaskGuard::spawn(maintain_subscription(
                    endpoint,
                    topics.clone(),
                    reconnect_interval,
                    publications_tx.clone(),
                    subscribed_tx.clone(),
                ))
            })
            .collect();

        Self {
            publications,
            subscribed,
            endpoint_count,
            _connections: connections,
        }
    }

    /// Next publication from any publisher.
    pub async fn recv(&mut self) -> Option<Publication> {
        self.publications.recv().await
    }

    /// Wait until every publisher has acknowledged every topic.
    pub async fn wait_until_subscribed(&self, timeout: Duration) -> bool {
        let expected = self.endpoint_count;
        let mut subscribed = self.subscribed.clone();
        matches!(
            tokio::time::timeout(timeout, subscribed.wait_for(|n| *n >= expected)).await,
            Ok(Ok(_))
        )
    }
}

async fn maintain_subscription(
    endpoint: Endpoint,
    topics: Vec<String>,
    reconnect_interval: Duration,
    publications: mpsc::Sender<Publication>,
    subscribed: watch::Sender<usize>,
) {
    loop {
        match TcpStream::connect(endpoint.connect_address()).await {
            Ok(socket) => {
                socket.set_nodelay(true).ok();
                let outcome =
                    run_subscription(socket, &endpoint, &topics, &publications, &subscribed).await;
                match outcome {
                    SubscriptionEnd::ReceiverDropped => return,
                    SubscriptionEnd::Disconnected(reason) => {
                        warn!(endpoint = %endpoint, "subscription lost: {}", reason)
                    }
                }
            }
            Err(e) => debug!(endpoint = %endpoint, "publisher unreachable: {}", e),
        }
        tokio::time::sleep(reconnect_interval).await;
    }
}

enum SubscriptionEnd {
    ReceiverDropped,
    Disconnected(FrameError),
}

async fn run_subscription(
    socket: TcpStream,
    endpoint: &Endpoint,
    topics: &[String],
    publications: &mpsc::Sender<Publication>,
    subscribed: &watch::Sender<usize>,
) -> SubscriptionEnd {
    let mut stream = FramedStream::new(socket);
    for topic in topics {
        let sent = match Frame::subscribe(topic) {
            Ok(frame) => stream.write_frame(&frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            return SubscriptionEnd::Disconnected(e);
        }
    }

    let mut acknowledged = 0usize;
    let mut counted = false;
    let end = loop {
        let frame = match stream.read_frame().await {
            Ok(frame) => frame,
            Err(e) => break SubscriptionEnd::Disconnected(e),
        };
        match frame.message_type {
            MessageType::Response => {
                acknowledged += 1;
                if acknowledged >= topics.len() && !counted {
                    counted = true;
                    subscribed.send_modify(|n| *n += 1);
                    info!(endpoint = %endpoint, ?topics, "subscription active");
                }
            }
            MessageType::Publish => match frame.publication() {
                Ok((topic, body)) => {
                    if publications.send(Publication { topic, body }).await.is_err() {
                        break SubscriptionEnd::ReceiverDropped;
                    }
                }
                Err(e) => warn!(endpoint = %endpoint, "bad publication: {}", e),
            },
            other => debug!(endpoint = %endpoint, message_type = ?other, "ignoring frame"),
        }
    };

    if counted {
        subscribed.send_modify(|n| *n = n.saturating_sub(1));
    }
    end
}
