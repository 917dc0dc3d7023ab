// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for TCP stream framing.
//!
//! Every message on a connection is one frame:
//! - 4 bytes: payload length (big-endian)
//! - 2 bytes: message type
//! - N bytes: UTF-8 payload
//!
//! `Publish` payloads carry the topic in front of the body:
//! 2 bytes topic length, topic bytes, then the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame payload size (1 MiB). Envelopes are a few hundred bytes.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame header size (4 bytes length + 2 bytes type)
pub const HEADER_SIZE: usize = 6;

/// Message types for the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Request expecting exactly one reply
    Request = 1,
    /// Reply to a request, or subscription acknowledgement
    Response = 2,
    /// Subscriber registering interest in a topic
    Subscribe = 3,
    /// Topic publication pushed to subscribers
    Publish = 4,
    /// Error reply to a request
    Error = 5,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Subscribe),
            4 => Ok(MessageType::Publish),
            5 => Ok(MessageType::Error),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed publication frame")]
    MalformedPublication,

    #[error("unexpected message type: {0:?}")]
    UnexpectedMessageType(MessageType),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A framed message with type and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    pub fn request(text: &str) -> Result<Self, FrameError> {
        Self::new(MessageType::Request, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn response(text: &str) -> Result<Self, FrameError> {
        Self::new(MessageType::Response, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn error(text: &str) -> Result<Self, FrameError> {
        Self::new(MessageType::Error, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn subscribe(topic: &str) -> Result<Self, FrameError> {
        Self::new(MessageType::Subscribe, Bytes::copy_from_slice(topic.as_bytes()))
    }

    /// Create a publication frame for `topic`.
    pub fn publish(topic: &str, body: &str) -> Result<Self, FrameError> {
        let topic_len =
            u16::try_from(topic.len()).map_err(|_| FrameError::MalformedPublication)?;
        let mut buf = BytesMut::with_capacity(2 + topic.len() + body.len());
        buf.put_u16(topic_len);
        buf.put_slice(topic.as_bytes());
        buf.put_slice(body.as_bytes());
        Self::new(MessageType::Publish, buf.freeze())
    }

    /// Create a new frame with the given type and raw payload
    pub fn new(message_type: MessageType, payload: Bytes) -> Result<Self, FrameError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type,
            payload,
        })
    }

    /// Payload as UTF-8 text
    pub fn text(&self) -> Result<String, FrameError> {
        String::from_utf8(self.payload.to_vec()).map_err(|_| FrameError::InvalidUtf8)
    }

    /// Split a `Publish` payload into `(topic, body)`
    pub fn publication(&self) -> Result<(String, String), FrameError> {
        if self.message_type != MessageType::Publish {
            return Err(FrameError::UnexpectedMessageType(self.message_type));
        }
        let mut payload = self.payload.clone();
        if payload.len() < 2 {
            return Err(FrameError::MalformedPublication);
        }
        let topic_len = payload.get_u16() as usize;
        if payload.len() < topic_len {
            return Err(FrameError::MalformedPublication);
        }
        let topic = payload.split_to(topic_len);
        let topic = String::from_utf8(topic.to_vec()).map_err(|_| FrameError::InvalidUtf8)?;
        let body = String::from_utf8(payload.to_vec()).map_err(|_| FrameError::InvalidUtf8)?;
        Ok((topic, body))
    }

    /// Encode the frame to bytes for wire transmission
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.message_type as u16);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decode a frame from bytes
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame header",
            )));
        }

        let length = bytes.get_u32() as usize;
        let message_type = MessageType::try_from(bytes.get_u16())?;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }

        if bytes.len() < length {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame payload",
            )));
        }

        let payload = bytes.split_to(length);
        Ok(Self {
            message_type,
            payload,
        })
    }
}

/// Write a frame to an async writer
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode();
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a frame from an async reader
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let message_type = MessageType::try_from(u16::from_be_bytes([header[4], header[5]]))?;

    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        message_type,
        payload: Bytes::from(payload),
    })
}

/// Framed codec for encoding/decoding frames on a stream
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Read the next frame from the stream
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.stream).await
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    /// Write a frame to the stream
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        write_frame(&mut self.stream, frame).await
    }
}
