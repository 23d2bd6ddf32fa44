//! # tether-transport
//!
//! Transport abstraction layer for the tether gateway.
//!
//! - **WebSocket** - axum upgraded sockets, with the inbound frame limit enforced
//! - **Memory** - an in-process duplex pair for tests and embedding
//!
//! ## Transport Abstraction
//!
//! Every transport is a `Stream` of inbound [`WireMessage`]s and a `Sink` of
//! outbound ones, so it can be split into reader and writer halves.
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use tether_transport::Connection;
//!
//! async fn handle_connection(conn: impl Connection) {
//!     let (sink, mut stream) = conn.split();
//!     while let Some(Ok(message)) = stream.next().await {
//!         // Process message
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, TransportError, WireMessage};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
