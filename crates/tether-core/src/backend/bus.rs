//! Shared publish/subscribe bus connecting server instances.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// Default per-topic buffer of the in-memory bus.
const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus could not be reached.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

/// A fire-and-forget topic bus. Delivery is at most once: subscribers that
/// are not connected when a payload is published never see it.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, String>, BusError>;
}

/// In-process [`EventBus`] backed by one broadcast channel per topic.
///
/// Several server instances sharing one `MemoryBus` behave like processes
/// sharing a networked bus.
pub struct MemoryBus {
    topics: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
    online: AtomicBool,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate losing the connection to the bus. Publishes fail until
    /// [`reconnect`](Self::reconnect) is called.
    pub fn disconnect(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), BusError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("bus disconnected".to_string()))
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        self.ensure_online()?;
        // No subscribers is not an error
        let _ = self.sender(topic).send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, String>, BusError> {
        self.ensure_online()?;
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let stream = stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "Bus subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
