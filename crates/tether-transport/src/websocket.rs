//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] to the [`Connection`](crate::Connection)
//! contract, enforcing the inbound frame limit on the way in.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{Sink, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::traits::{TransportError, WireMessage};

/// A WebSocket connection.
pub struct WebSocketConnection {
    inner: WebSocket,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(inner: WebSocket, max_message_size: usize) -> Self {
        Self {
            inner,
            max_message_size,
        }
    }

    fn convert_inbound(&self, message: Message) -> Result<WireMessage, TransportError> {
        let size = match &message {
            Message::Text(text) => text.len(),
            Message::Binary(data) => data.len(),
            _ => 0,
        };
        if size > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                size, self.max_message_size
            );
            return Err(TransportError::FrameTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        Ok(match message {
            Message::Text(text) => WireMessage::Text(text),
            Message::Binary(data) => WireMessage::Binary(Bytes::from(data)),
            Message::Ping(data) => WireMessage::Ping(Bytes::from(data)),
            Message::Pong(data) => WireMessage::Pong(Bytes::from(data)),
            Message::Close(frame) => {
                debug!(reason = ?frame, "Received close frame");
                WireMessage::Close
            }
        })
    }
}

fn convert_outbound(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Binary(data) => Message::Binary(data.to_vec()),
        WireMessage::Ping(data) => Message::Ping(data.to_vec()),
        WireMessage::Pong(data) => Message::Pong(data.to_vec()),
        WireMessage::Close => Message::Close(None),
    }
}

impl Stream for WebSocketConnection {
    type Item = Result<WireMessage, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(message))) => Poll::Ready(Some(self.convert_inbound(message))),
            Poll::Ready(Some(Err(e))) => {
                Poll::Ready(Some(Err(TransportError::ReceiveFailed(e.to_string()))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Sink<WireMessage> for WebSocketConnection {
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WireMessage) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(convert_outbound(item))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_conversion() {
        assert!(matches!(
            convert_outbound(WireMessage::text("hi")),
            Message::Text(t) if t == "hi"
        ));
        assert!(matches!(
            convert_outbound(WireMessage::Close),
            Message::Close(None)
        ));
    }
}
