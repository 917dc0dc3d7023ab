// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Circulation Protocol - sealed envelopes over framed TCP
//!
//! This crate provides the wire protocol shared by every circulation process:
//! - the load coordinator and its clients
//! - the loan, return and renewal actors
//! - the storage service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  circulation-protocol                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Messaging: request/reply + topic publish/subscribe         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Envelope: AES-256-GCM + HMAC-SHA256, pipe-joined records   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: length-prefixed frames over TCP (tokio)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! No plaintext business payload crosses a process boundary: requests carry
//! sealed [`Envelope`]s and replies carry sealed [`CommandResult`]s.
//!
//! # Usage
//!
//! ```ignore
//! use circulation_protocol::{
//!     CodecKeys, Endpoint, Envelope, EnvelopeCodec, RequestClient, RequestClientConfig,
//! };
//!
//! let codec = EnvelopeCodec::new(&CodecKeys::new("encryption-secret", "mac-secret"));
//! let endpoint = Endpoint::parse("tcp://127.0.0.1:5555")?;
//! let mut client = RequestClient::new(endpoint, RequestClientConfig::default());
//!
//! let wire = codec.encode_envelope(&Envelope::loan("B1", "U1", "BK1"))?;
//! let result = codec.decode_result(&client.request(&wire).await?)?;
//! println!("{}", result);
//! ```

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod envelope;
pub mod frame;
pub mod pubsub;
pub mod server;
pub mod settings;

pub use client::{ClientError, RequestClient, RequestClientConfig};
pub use codec::{CodecError, CodecKeys, EnvelopeCodec};
pub use endpoint::{Endpoint, EndpointError};
pub use envelope::{CommandResult, Envelope, Operation};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use pubsub::{Publication, Publisher, Subscriber};
pub use server::{RequestHandler, RequestServer, ServerError};
pub use settings::{Properties, SettingsError};

/// Aborts the wrapped task when dropped.
pub(crate) struct TaskGuard(tokio::task::JoinHandle<()>);

impl TaskGuard {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
