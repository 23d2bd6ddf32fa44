//! Assembly of the realtime core.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{
    DistributedLock, EventBus, MemoryBus, MemoryCache, MemoryLock, MemoryVoiceStore, SharedCache,
    VoiceStateStore,
};
use crate::bridge::Bridge;
use crate::clock::Clock;
use crate::collaborators::{ChannelAccessChecker, MemoryDirectory, UserLookup};
use crate::config::HubConfig;
use crate::presence::PresenceCache;
use crate::registry::Hub;
use crate::voice::VoiceCoordinator;

/// The state an instance shares with its peers.
#[derive(Clone)]
pub struct Backends {
    pub cache: Arc<dyn SharedCache>,
    pub bus: Arc<dyn EventBus>,
    pub lock: Arc<dyn DistributedLock>,
    pub voice_store: Arc<dyn VoiceStateStore>,
}

impl Backends {
    /// Fresh in-memory backends. Clone the result to give several instances
    /// the same shared state.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(MemoryCache::new(clock)),
            bus: Arc::new(MemoryBus::new()),
            lock: Arc::new(MemoryLock::new()),
            voice_store: Arc::new(MemoryVoiceStore::new()),
        }
    }
}

/// The external services the core consults.
#[derive(Clone)]
pub struct Collaborators {
    pub access: Arc<dyn ChannelAccessChecker>,
    pub users: Arc<dyn UserLookup>,
}

impl Collaborators {
    #[must_use]
    pub fn from_directory(directory: Arc<MemoryDirectory>) -> Self {
        Self {
            access: directory.clone(),
            users: directory,
        }
    }
}

/// A running realtime core: the registry, its coordinating task, presence,
/// voice and the bridge subscriber, all stopped by one cancellation token.
pub struct Realtime {
    hub: Hub,
    presence: Arc<PresenceCache>,
    voice: Arc<VoiceCoordinator>,
    access: Arc<dyn ChannelAccessChecker>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Realtime {
    /// Build the core and spawn its tasks. If the bus cannot be subscribed
    /// to, the instance runs local-only.
    pub async fn start(
        config: HubConfig,
        backends: Backends,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bridge = Bridge::new(backends.bus, &config.bus_topic);
        let (hub, mut runner) = Hub::new(&config, bridge.clone());

        let presence = Arc::new(PresenceCache::new(
            hub.clone(),
            backends.cache.clone(),
            collaborators.users.clone(),
            clock.clone(),
            &config,
        ));
        let voice = Arc::new(VoiceCoordinator::new(
            hub.clone(),
            backends.voice_store,
            backends.lock,
            collaborators.access.clone(),
            collaborators.users,
            clock,
            &config,
        ));
        runner.attach_presence(presence.clone());
        runner.attach_voice(voice.clone());

        let shutdown = CancellationToken::new();
        let mut tasks = vec![
            tokio::spawn(runner.run(shutdown.child_token())),
            tokio::spawn(sweep_cache(
                backends.cache,
                config.cache_sweep_interval,
                shutdown.child_token(),
            )),
        ];
        match bridge.subscribe().await {
            Ok(subscriber) => {
                tasks.push(tokio::spawn(
                    subscriber.run(hub.clone(), shutdown.child_token()),
                ));
            }
            Err(e) => {
                error!(error = %e, "Bus unavailable, cross-instance delivery disabled");
            }
        }

        info!(instance = %bridge.origin(), "Realtime core started");
        Self {
            hub,
            presence,
            voice,
            access: collaborators.access,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceCache> {
        &self.presence
    }

    #[must_use]
    pub fn voice(&self) -> &Arc<VoiceCoordinator> {
        &self.voice
    }

    /// The access checker the core was started with.
    #[must_use]
    pub fn access(&self) -> &Arc<dyn ChannelAccessChecker> {
        &self.access
    }

    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.hub.instance_id()
    }

    /// Stop the coordinating task and the bridge subscriber and wait for
    /// them. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!(instance = %self.instance_id(), "Realtime core stopped");
    }
}

/// Purge expired cache keys every `every` until cancelled.
async fn sweep_cache(cache: Arc<dyn SharedCache>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match cache.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "Swept expired cache keys"),
                Err(e) => warn!(error = %e, "Cache sweep failed"),
            },
        }
    }
}
