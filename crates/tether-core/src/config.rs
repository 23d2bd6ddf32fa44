//! Core configuration.

use std::time::Duration;

/// Default bus topic carrying cross-instance broadcasts.
pub const DEFAULT_BUS_TOPIC: &str = "websocket:broadcast";

/// Knobs of the realtime core.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the registry's ordered work queue.
    pub hub_queue_capacity: usize,
    /// Lifetime of a presence record.
    pub presence_ttl: Duration,
    /// Lifetime of a channel's typing set.
    pub typing_ttl: Duration,
    /// How far back a typing record still counts as typing.
    pub typing_window: Duration,
    /// How long a voice join waits for the user's lock.
    pub voice_lock_timeout: Duration,
    /// Bus topic for cross-instance broadcasts.
    pub bus_topic: String,
    /// How often the shared cache is swept for expired keys.
    pub cache_sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_queue_capacity: 256,
            presence_ttl: Duration::from_secs(300),
            typing_ttl: Duration::from_secs(10),
            typing_window: Duration::from_secs(5),
            voice_lock_timeout: Duration::from_secs(5),
            bus_topic: DEFAULT_BUS_TOPIC.to_string(),
            cache_sweep_interval: Duration::from_secs(60),
        }
    }
}
