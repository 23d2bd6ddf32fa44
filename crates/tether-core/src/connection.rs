//! Connection identity and the handle the registry keeps per connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A user identifier, supplied by the authentication collaborator.
pub type UserId = Uuid;

/// Serialized events queued for one connection's writer.
pub type OutboundReceiver = mpsc::Receiver<Arc<str>>;

/// A unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// What the registry holds for a live connection: its identity and the
/// sending half of its bounded outbound queue.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub(crate) sender: mpsc::Sender<Arc<str>>,
}

impl ConnectionHandle {
    /// Create a handle with an outbound queue of the given capacity.
    ///
    /// The receiver belongs to the connection's writer. It yields `None` once
    /// the registry has unregistered the connection.
    #[must_use]
    pub fn new(user_id: UserId, capacity: usize) -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::new(),
                user_id,
                sender,
            },
            receiver,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_handle_queue_capacity() {
        let (handle, _rx) = ConnectionHandle::new(Uuid::new_v4(), 2);
        assert!(handle.sender.try_send(Arc::from("a")).is_ok());
        assert!(handle.sender.try_send(Arc::from("b")).is_ok());
        assert!(handle.sender.try_send(Arc::from("c")).is_err());
    }
}
