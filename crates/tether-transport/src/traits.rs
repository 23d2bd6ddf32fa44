//! Transport abstraction for tether.
//!
//! A connection is any duplex of [`WireMessage`]s: a `Stream` of inbound
//! messages and a `Sink` of outbound ones. Sessions split it into independent
//! reader and writer halves, so the server never cares which transport is
//! underneath.

use bytes::Bytes;
use futures_util::{Sink, Stream};
use thiserror::Error;

/// A transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A text frame carrying a JSON envelope.
    Text(String),
    /// A binary frame. The gateway protocol is text only.
    Binary(Bytes),
    /// Liveness probe.
    Ping(Bytes),
    /// Liveness response.
    Pong(Bytes),
    /// Graceful close.
    Close,
}

impl WireMessage {
    /// Create a text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        WireMessage::Text(text.into())
    }

    /// Get the text payload, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WireMessage::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An inbound frame exceeded the configured limit.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// A duplex transport connection.
///
/// Implemented for every type that is both a stream of inbound messages and a
/// sink of outbound ones.
pub trait Connection:
    Stream<Item = Result<WireMessage, TransportError>>
    + Sink<WireMessage, Error = TransportError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> Connection for T where
    T: Stream<Item = Result<WireMessage, TransportError>>
        + Sink<WireMessage, Error = TransportError>
        + Send
        + Unpin
        + 'static
{
}
