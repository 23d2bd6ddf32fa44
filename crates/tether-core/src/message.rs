//! Internal broadcast type.

use tether_protocol::Event;

use crate::channel::{self, ChannelId};
use crate::connection::ConnectionId;

/// An event addressed to every subscriber of a channel, or to every
/// connection when the channel id is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub channel_id: ChannelId,
    pub event: Event,
    /// A connection that must not receive this copy, usually the sender.
    pub exclude: Option<ConnectionId>,
}

impl BroadcastMessage {
    #[must_use]
    pub fn new(channel_id: impl Into<ChannelId>, event: Event) -> Self {
        Self {
            channel_id: channel_id.into(),
            event,
            exclude: None,
        }
    }

    /// A message for every connection.
    #[must_use]
    pub fn global(event: Event) -> Self {
        Self::new(channel::GLOBAL, event)
    }

    #[must_use]
    pub fn excluding(mut self, connection_id: Option<ConnectionId>) -> Self {
        self.exclude = connection_id;
        self
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        channel::is_global(&self.channel_id)
    }
}
