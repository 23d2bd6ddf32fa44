//! In-memory duplex transport.
//!
//! [`pair`] returns the server end, which behaves like any other
//! [`Connection`](crate::Connection), and a [`MemoryPeer`] that plays the
//! client. Dropping the peer ends the server's inbound stream, the same way a
//! socket hang-up does.

use futures_util::{Sink, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::traits::{TransportError, WireMessage};

/// Server end of an in-memory connection.
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<WireMessage>,
    outbound: mpsc::UnboundedSender<WireMessage>,
}

/// Client end of an in-memory connection.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<WireMessage>,
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

/// Create a connected (server, client) pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    (
        MemoryConnection {
            inbound: server_rx,
            outbound: server_tx,
        },
        MemoryPeer {
            tx: client_tx,
            rx: client_rx,
        },
    )
}

impl MemoryPeer {
    /// Send a message to the server end.
    ///
    /// # Errors
    ///
    /// Returns an error if the server end was dropped.
    pub fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame to the server end.
    ///
    /// # Errors
    ///
    /// Returns an error if the server end was dropped.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(WireMessage::Text(text.into()))
    }

    /// Receive the next message sent by the server, or `None` once the server
    /// end is gone.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.rx.try_recv().ok()
    }
}

impl Stream for MemoryConnection {
    type Item = Result<WireMessage, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx).map(|message| message.map(Ok))
    }
}

impl Sink<WireMessage> for MemoryConnection {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.outbound.is_closed() {
            Poll::Ready(Err(TransportError::ConnectionClosed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(self: Pin<&mut Self>, item: WireMessage) -> Result<(), Self::Error> {
        self.outbound
            .send(item)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    #[tokio::test]
    async fn test_pair_exchanges_messages() {
        let (mut server, mut client) = pair();

        client.send_text("ping").unwrap();
        let inbound = server.next().await.unwrap().unwrap();
        assert_eq!(inbound, WireMessage::text("ping"));

        server.send(WireMessage::text("pong")).await.unwrap();
        assert_eq!(client.recv().await, Some(WireMessage::text("pong")));
    }

    #[tokio::test]
    async fn test_dropping_peer_ends_stream() {
        let (mut server, client) = pair();
        drop(client);

        assert!(server.next().await.is_none());
        assert!(server.send(WireMessage::text("late")).await.is_err());
    }
}
