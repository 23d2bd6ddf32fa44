//! Local fan-out.
//!
//! An event is serialized once and the same buffer is queued for every
//! target. Queuing never waits: a full outbound queue loses this message for
//! that connection only.

use std::sync::Arc;
use tether_protocol::{codec, Event};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, trace, warn};

use crate::connection::ConnectionId;
use crate::message::BroadcastMessage;
use crate::registry::HubState;

/// Result of queuing one payload on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    Dropped,
    Closed,
}

/// What a dispatch did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl FanoutReport {
    pub(crate) fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Queued => self.delivered += 1,
            Delivery::Dropped => self.dropped += 1,
            Delivery::Closed => {}
        }
    }
}

pub(crate) fn encode_payload(event: &Event) -> Option<Arc<str>> {
    match codec::encode(event) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!(event = %event.kind, error = %e, "Failed to encode event");
            None
        }
    }
}

pub(crate) fn deliver(
    connection_id: ConnectionId,
    sender: &mpsc::Sender<Arc<str>>,
    payload: &Arc<str>,
) -> Delivery {
    match sender.try_send(Arc::clone(payload)) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => {
            warn!(connection = %connection_id, "Outbound queue full, dropping message");
            Delivery::Dropped
        }
        Err(TrySendError::Closed(_)) => {
            trace!(connection = %connection_id, "Outbound queue closed");
            Delivery::Closed
        }
    }
}

/// Deliver a broadcast to every matching local connection.
pub(crate) fn dispatch(state: &HubState, message: &BroadcastMessage) -> FanoutReport {
    let mut report = FanoutReport::default();
    let Some(payload) = encode_payload(&message.event) else {
        return report;
    };

    let mut send = |connection_id: &ConnectionId| {
        if message.exclude == Some(*connection_id) {
            return;
        }
        if let Some(entry) = state.connections.get(connection_id) {
            report.record(deliver(*connection_id, &entry.sender, &payload));
        }
    };

    if message.is_global() {
        state.connections.keys().for_each(&mut send);
    } else if let Some(subscribers) = state.channels.get(&message.channel_id) {
        subscribers.iter().for_each(&mut send);
    }

    trace!(
        channel = %message.channel_id,
        event = %message.event.kind,
        delivered = report.delivered,
        dropped = report.dropped,
        "Dispatched"
    );
    report
}
