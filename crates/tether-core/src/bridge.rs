//! Cross-instance event bridge.
//!
//! Every locally originated broadcast is published on the shared bus as
//! `{channelId, event, origin}`. Each instance runs one subscriber that feeds
//! envelopes from other instances into its local fan-out and never publishes
//! them again. Its own envelopes are recognized by `origin` and skipped,
//! since they were already delivered locally.

use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether_protocol::Event;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{BusError, EventBus};
use crate::message::BroadcastMessage;
use crate::registry::Hub;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    channel_id: String,
    event: Event,
    /// Absent when published by something other than a tether instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<Uuid>,
}

/// Publishing side of the bridge.
#[derive(Clone)]
pub struct Bridge {
    bus: Arc<dyn EventBus>,
    topic: Arc<str>,
    origin: Uuid,
}

impl Bridge {
    /// Create a bridge with a fresh instance id.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: &str) -> Self {
        Self {
            bus,
            topic: Arc::from(topic),
            origin: Uuid::new_v4(),
        }
    }

    /// This instance's id on the bus.
    #[must_use]
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Publish a broadcast for other instances. Failures are logged: remote
    /// delivery is lost, local delivery is unaffected.
    pub async fn publish(&self, message: &BroadcastMessage) {
        let envelope = Envelope {
            channel_id: message.channel_id.clone(),
            event: message.event.clone(),
            origin: Some(self.origin),
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(channel = %message.channel_id, error = %e, "Failed to encode bus envelope");
                return;
            }
        };

        if let Err(e) = self.bus.publish(&self.topic, payload).await {
            error!(
                channel = %message.channel_id,
                event = %message.event.kind,
                error = %e,
                "Cross-instance publish failed"
            );
        }
    }

    /// Open the subscription. Envelopes published after this returns are
    /// seen by the returned subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus is unreachable.
    pub async fn subscribe(&self) -> Result<BridgeSubscriber, BusError> {
        let stream = self.bus.subscribe(&self.topic).await?;
        Ok(BridgeSubscriber {
            stream,
            origin: self.origin,
            topic: Arc::clone(&self.topic),
        })
    }
}

/// Receiving side of the bridge.
pub struct BridgeSubscriber {
    stream: BoxStream<'static, String>,
    origin: Uuid,
    topic: Arc<str>,
}

impl BridgeSubscriber {
    /// Feed remote envelopes into `hub` until cancelled or the bus goes away.
    pub async fn run(mut self, hub: Hub, shutdown: CancellationToken) {
        info!(topic = %self.topic, instance = %self.origin, "Bridge subscriber started");

        loop {
            let payload = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                payload = self.stream.next() => match payload {
                    Some(payload) => payload,
                    None => {
                        warn!(topic = %self.topic, "Bus subscription ended");
                        break;
                    }
                },
            };

            let envelope: Envelope = match serde_json::from_str(&payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed bus envelope");
                    continue;
                }
            };
            if envelope.origin == Some(self.origin) {
                continue;
            }

            debug!(channel = %envelope.channel_id, event = %envelope.event.kind, "Remote broadcast");
            let message = BroadcastMessage::new(envelope.channel_id, envelope.event);
            if hub.dispatch_remote(message).await.is_err() {
                break;
            }
        }

        info!(topic = %self.topic, "Bridge subscriber stopped");
    }
}
