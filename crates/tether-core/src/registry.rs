//! Connection registry.
//!
//! The [`Hub`] is the only writer of the connection, user and channel maps.
//! Register, unregister and broadcast go through one bounded, ordered queue
//! consumed by a single [`HubRunner`], so "X disconnected" and "deliver to Y"
//! are applied in submission order. Subscriptions, direct sends and reads
//! take the lock directly and are not ordered against the queue.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tether_protocol::Event;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::channel::{self, ChannelId};
use crate::collaborators::NotificationSink;
use crate::config::HubConfig;
use crate::connection::{ConnectionHandle, ConnectionId, UserId};
use crate::fanout::{self, FanoutReport};
use crate::message::BroadcastMessage;
use crate::presence::{PresenceCache, PresenceStatus};
use crate::voice::VoiceCoordinator;

/// Registry errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The coordinating task has stopped.
    #[error("Hub is shut down")]
    Closed,
}

enum HubCommand {
    Register {
        handle: ConnectionHandle,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        connection_id: ConnectionId,
        ack: oneshot::Sender<()>,
    },
    Dispatch(BroadcastMessage),
    Barrier(oneshot::Sender<()>),
}

pub(crate) struct ConnectionEntry {
    pub(crate) user_id: UserId,
    pub(crate) sender: mpsc::Sender<Arc<str>>,
    pub(crate) channels: HashSet<ChannelId>,
}

/// The canonical maps. Never handed out.
#[derive(Default)]
pub(crate) struct HubState {
    pub(crate) connections: HashMap<ConnectionId, ConnectionEntry>,
    pub(crate) users: HashMap<UserId, HashSet<ConnectionId>>,
    pub(crate) channels: HashMap<ChannelId, HashSet<ConnectionId>>,
}

struct Removed {
    user_id: UserId,
    last_for_user: bool,
    channels: usize,
}

impl HubState {
    /// Returns whether this is the user's first connection.
    fn insert(&mut self, handle: ConnectionHandle) -> bool {
        let connections = self.users.entry(handle.user_id).or_default();
        let first = connections.is_empty();
        connections.insert(handle.id);
        self.connections.insert(
            handle.id,
            ConnectionEntry {
                user_id: handle.user_id,
                sender: handle.sender,
                channels: HashSet::new(),
            },
        );
        first
    }

    /// Remove a connection from every map. Dropping the entry drops the
    /// registry's sender, which closes the outbound queue.
    fn remove(&mut self, connection_id: ConnectionId) -> Option<Removed> {
        let entry = self.connections.remove(&connection_id)?;

        for channel_id in &entry.channels {
            if let Some(subscribers) = self.channels.get_mut(channel_id) {
                subscribers.remove(&connection_id);
                if subscribers.is_empty() {
                    self.channels.remove(channel_id);
                }
            }
        }

        let last_for_user = match self.users.get_mut(&entry.user_id) {
            Some(connections) => {
                connections.remove(&connection_id);
                if connections.is_empty() {
                    self.users.remove(&entry.user_id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };

        Some(Removed {
            user_id: entry.user_id,
            last_for_user,
            channels: entry.channels.len(),
        })
    }
}

struct Shared {
    state: RwLock<HubState>,
    dropped: AtomicU64,
    bridge: Bridge,
}

impl Shared {
    fn dispatch(&self, message: &BroadcastMessage) -> FanoutReport {
        let report = fanout::dispatch(&self.state.read(), message);
        self.count_dropped(report.dropped);
        report
    }

    fn count_dropped(&self, dropped: usize) {
        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Live connections on this instance.
    pub connections: usize,
    /// Distinct users with at least one live connection.
    pub users: usize,
    /// Channels with at least one subscriber.
    pub channels: usize,
    /// Total subscriptions across all connections.
    pub subscriptions: usize,
    /// Messages dropped on full outbound queues since start.
    pub dropped_messages: u64,
}

/// Handle to the connection registry. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    shared: Arc<Shared>,
}

impl Hub {
    /// Create the registry and the task that must run it.
    #[must_use]
    pub fn new(config: &HubConfig, bridge: Bridge) -> (Self, HubRunner) {
        let (commands, receiver) = mpsc::channel(config.hub_queue_capacity.max(1));
        let shared = Arc::new(Shared {
            state: RwLock::new(HubState::default()),
            dropped: AtomicU64::new(0),
            bridge,
        });

        let hub = Self {
            commands,
            shared: Arc::clone(&shared),
        };
        let runner = HubRunner {
            commands: receiver,
            shared,
            presence: None,
            voice: None,
        };
        (hub, runner)
    }

    async fn submit(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Add a connection. Returns once the connection is in the maps.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has shut down.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.submit(HubCommand::Register { handle, ack }).await?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Remove a connection and run the disconnect cascade. Idempotent.
    /// Returns once the cascade has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has shut down.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.submit(HubCommand::Unregister { connection_id, ack })
            .await?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Wait until everything queued before this call has been applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has shut down.
    pub async fn flush(&self) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.submit(HubCommand::Barrier(ack)).await?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Queue a broadcast for local delivery and publish it to other instances.
    pub async fn broadcast(&self, message: BroadcastMessage) {
        if self
            .submit(HubCommand::Dispatch(message.clone()))
            .await
            .is_err()
        {
            warn!(channel = %message.channel_id, "Hub is shut down, dropping broadcast");
            return;
        }
        self.shared.bridge.publish(&message).await;
    }

    /// Queue a broadcast received from another instance. Never republished.
    pub(crate) async fn dispatch_remote(&self, message: BroadcastMessage) -> Result<(), HubError> {
        self.submit(HubCommand::Dispatch(message)).await
    }

    /// Subscribe a connection to a channel. Returns `true` if the
    /// subscription is new. Authorization is the caller's job.
    pub fn subscribe(&self, connection_id: ConnectionId, channel_id: &str) -> bool {
        if channel::is_global(channel_id) {
            return false;
        }

        let mut guard = self.shared.state.write();
        let state = &mut *guard;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        if !entry.channels.insert(channel_id.to_string()) {
            return false;
        }
        state
            .channels
            .entry(channel_id.to_string())
            .or_default()
            .insert(connection_id);

        debug!(connection = %connection_id, channel = %channel_id, "Subscribed");
        true
    }

    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, connection_id: ConnectionId, channel_id: &str) -> bool {
        let mut guard = self.shared.state.write();
        let state = &mut *guard;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        if !entry.channels.remove(channel_id) {
            return false;
        }
        if let Some(subscribers) = state.channels.get_mut(channel_id) {
            subscribers.remove(&connection_id);
            if subscribers.is_empty() {
                state.channels.remove(channel_id);
            }
        }

        debug!(connection = %connection_id, channel = %channel_id, "Unsubscribed");
        true
    }

    /// Queue an event on every live connection of a user. Returns how many
    /// connections it was queued for.
    pub fn send_to_user(&self, user_id: UserId, event: &Event) -> usize {
        let Some(payload) = fanout::encode_payload(event) else {
            return 0;
        };

        let mut report = FanoutReport::default();
        {
            let state = self.shared.state.read();
            if let Some(connections) = state.users.get(&user_id) {
                for connection_id in connections {
                    if let Some(entry) = state.connections.get(connection_id) {
                        report.record(fanout::deliver(*connection_id, &entry.sender, &payload));
                    }
                }
            }
        }
        self.shared.count_dropped(report.dropped);
        report.delivered
    }

    /// Queue an event on one connection. No-op if the connection is unknown.
    pub fn send_to_connection(&self, connection_id: ConnectionId, event: &Event) -> bool {
        let Some(payload) = fanout::encode_payload(event) else {
            return false;
        };

        let delivery = {
            let state = self.shared.state.read();
            match state.connections.get(&connection_id) {
                Some(entry) => fanout::deliver(connection_id, &entry.sender, &payload),
                None => return false,
            }
        };
        let mut report = FanoutReport::default();
        report.record(delivery);
        self.shared.count_dropped(report.dropped);
        report.delivered == 1
    }

    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.shared.state.read().users.contains_key(&user_id)
    }

    /// Live connections of a user on this instance.
    #[must_use]
    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.shared
            .state
            .read()
            .users
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    /// The users from `user_ids` that are online, in input order.
    #[must_use]
    pub fn online_subset_of(&self, user_ids: &[UserId]) -> Vec<UserId> {
        let state = self.shared.state.read();
        user_ids
            .iter()
            .filter(|user_id| state.users.contains_key(user_id))
            .copied()
            .collect()
    }

    #[must_use]
    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.shared
            .state
            .read()
            .connections
            .contains_key(&connection_id)
    }

    #[must_use]
    pub fn is_subscribed(&self, connection_id: ConnectionId, channel_id: &str) -> bool {
        self.shared
            .state
            .read()
            .channels
            .get(channel_id)
            .is_some_and(|subscribers| subscribers.contains(&connection_id))
    }

    #[must_use]
    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.shared
            .state
            .read()
            .channels
            .get(channel_id)
            .map_or(0, HashSet::len)
    }

    /// Identifier of this instance on the shared bus.
    #[must_use]
    pub fn instance_id(&self) -> uuid::Uuid {
        self.shared.bridge.origin()
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.shared.state.read();
        HubStats {
            connections: state.connections.len(),
            users: state.users.len(),
            channels: state.channels.len(),
            subscriptions: state.channels.values().map(HashSet::len).sum(),
            dropped_messages: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

impl NotificationSink for Hub {
    fn send_user_event(&self, user_id: UserId, kind: &str, data: Value) -> usize {
        self.send_to_user(user_id, &Event::new(kind, data))
    }

    fn is_online(&self, user_id: UserId) -> bool {
        Hub::is_online(self, user_id)
    }
}

/// The single coordinating task that applies the registry's ordered queue.
pub struct HubRunner {
    commands: mpsc::Receiver<HubCommand>,
    shared: Arc<Shared>,
    presence: Option<Arc<PresenceCache>>,
    voice: Option<Arc<VoiceCoordinator>>,
}

impl HubRunner {
    /// Record presence transitions in the shared cache.
    pub fn attach_presence(&mut self, presence: Arc<PresenceCache>) {
        self.presence = Some(presence);
    }

    /// Release voice sessions when a user's last connection goes away.
    pub fn attach_voice(&mut self, voice: Arc<VoiceCoordinator>) {
        self.voice = Some(voice);
    }

    /// Apply queued commands until `shutdown` is cancelled. Individual
    /// failures are logged; they never stop the loop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Hub coordinator started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        // Dropping every sender closes every outbound queue.
        let closed = {
            let mut state = self.shared.state.write();
            let count = state.connections.len();
            *state = HubState::default();
            count
        };
        info!(connections = closed, "Hub coordinator stopped");
    }

    async fn handle(&self, command: HubCommand) {
        match command {
            HubCommand::Register { handle, ack } => self.on_register(handle, ack).await,
            HubCommand::Unregister { connection_id, ack } => {
                self.on_unregister(connection_id).await;
                let _ = ack.send(());
            }
            HubCommand::Dispatch(message) => {
                self.shared.dispatch(&message);
            }
            HubCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }

    async fn on_register(&self, handle: ConnectionHandle, ack: oneshot::Sender<()>) {
        let connection_id = handle.id;
        let user_id = handle.user_id;
        let first = self.shared.state.write().insert(handle);
        let _ = ack.send(());

        info!(connection = %connection_id, user = %user_id, "Connection registered");
        if first {
            self.announce_presence(user_id, PresenceStatus::Online).await;
        }
    }

    async fn on_unregister(&self, connection_id: ConnectionId) {
        let removed = self.shared.state.write().remove(connection_id);
        let Some(removed) = removed else {
            debug!(connection = %connection_id, "Already unregistered");
            return;
        };

        info!(
            connection = %connection_id,
            user = %removed.user_id,
            channels = removed.channels,
            "Connection unregistered"
        );
        if !removed.last_for_user {
            return;
        }

        self.announce_presence(removed.user_id, PresenceStatus::Offline)
            .await;

        let Some(voice) = &self.voice else {
            return;
        };
        match voice.auto_leave_on_disconnect(removed.user_id).await {
            Ok(channels) => {
                let user = removed.user_id.to_string();
                for channel_id in channels {
                    let event = Event::voice_leave(&channel_id, &user);
                    self.emit(BroadcastMessage::new(channel_id, event)).await;
                }
            }
            Err(e) => {
                error!(user = %removed.user_id, error = %e, "Voice auto-leave failed");
            }
        }
    }

    async fn announce_presence(&self, user_id: UserId, status: PresenceStatus) {
        let event = match &self.presence {
            Some(presence) => presence.set_presence(user_id, status).await,
            None => Event::presence_update(&user_id.to_string(), status.as_str()),
        };
        self.emit(BroadcastMessage::global(event)).await;
    }

    /// Deliver locally and publish. Applied inline: the runner never queues
    /// onto its own queue.
    async fn emit(&self, message: BroadcastMessage) {
        self.shared.dispatch(&message);
        self.shared.bridge.publish(&message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBus;
    use crate::connection::OutboundReceiver;
    use tether_protocol::{codec, EventType};
    use uuid::Uuid;

    fn start(config: HubConfig) -> (Hub, CancellationToken) {
        let bridge = Bridge::new(Arc::new(MemoryBus::new()), &config.bus_topic);
        let (hub, runner) = Hub::new(&config, bridge);
        let token = CancellationToken::new();
        tokio::spawn(runner.run(token.clone()));
        (hub, token)
    }

    async fn connect(hub: &Hub, user: UserId) -> (ConnectionId, OutboundReceiver) {
        let (handle, rx) = ConnectionHandle::new(user, 256);
        let id = handle.id;
        hub.register(handle).await.unwrap();
        (id, rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(text) = rx.try_recv() {
            events.push(codec::decode_event(&text).unwrap());
        }
        events
    }

    fn kinds(events: &[Event]) -> Vec<EventType> {
        events.iter().map(|e| e.kind.clone()).collect()
    }

    #[tokio::test]
    async fn test_online_tracks_connection_set() {
        let (hub, _token) = start(HubConfig::default());
        let user = Uuid::new_v4();
        assert!(!hub.is_online(user));

        let (a, _rx_a) = connect(&hub, user).await;
        let (b, _rx_b) = connect(&hub, user).await;
        assert!(hub.is_online(user));
        assert_eq!(hub.connection_count(user), 2);

        hub.unregister(a).await.unwrap();
        assert!(hub.is_online(user));
        hub.unregister(b).await.unwrap();
        assert!(!hub.is_online(user));
        assert_eq!(hub.connection_count(user), 0);
    }

    #[tokio::test]
    async fn test_presence_only_on_first_and_last_connection() {
        let (hub, _token) = start(HubConfig::default());
        let watcher = Uuid::new_v4();
        let (_w, mut rx) = connect(&hub, watcher).await;
        hub.flush().await.unwrap();
        drain(&mut rx);

        let user = Uuid::new_v4();
        let (a, _rx_a) = connect(&hub, user).await;
        let (b, _rx_b) = connect(&hub, user).await;
        hub.unregister(a).await.unwrap();
        hub.unregister(b).await.unwrap();
        hub.flush().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data["status"], "online");
        assert_eq!(events[1].data["status"], "offline");
        assert_eq!(events[1].data["userId"], user.to_string());
    }

    #[tokio::test]
    async fn test_fanout_precision() {
        let (hub, _token) = start(HubConfig::default());
        let (a, mut rx_a) = connect(&hub, Uuid::new_v4()).await;
        let (b, mut rx_b) = connect(&hub, Uuid::new_v4()).await;
        let (_c, mut rx_c) = connect(&hub, Uuid::new_v4()).await;
        hub.flush().await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        assert!(hub.subscribe(a, "x"));
        assert!(hub.subscribe(b, "x"));

        let event = Event::new("MESSAGE_CREATE", serde_json::json!({"id": 1}));
        hub.broadcast(BroadcastMessage::new("x", event).excluding(Some(a)))
            .await;
        hub.flush().await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(kinds(&drain(&mut rx_b)), vec![EventType::MessageCreate]);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (hub, _token) = start(HubConfig::default());
        let (a, mut rx) = connect(&hub, Uuid::new_v4()).await;
        hub.flush().await.unwrap();
        drain(&mut rx);

        assert!(hub.subscribe(a, "x"));
        assert!(!hub.subscribe(a, "x"));
        assert_eq!(hub.subscriber_count("x"), 1);

        hub.broadcast(BroadcastMessage::new("x", Event::new("PING", Value::Null)))
            .await;
        hub.flush().await.unwrap();
        assert_eq!(drain(&mut rx).len(), 1);

        assert!(hub.unsubscribe(a, "x"));
        assert!(!hub.unsubscribe(a, "x"));
        assert_eq!(hub.stats().channels, 0);
    }

    #[tokio::test]
    async fn test_cannot_subscribe_to_global_or_unknown() {
        let (hub, _token) = start(HubConfig::default());
        let (a, _rx) = connect(&hub, Uuid::new_v4()).await;
        assert!(!hub.subscribe(a, ""));
        assert!(!hub.subscribe(ConnectionId::new(), "x"));
    }

    #[tokio::test]
    async fn test_global_broadcast_reaches_everyone() {
        let (hub, _token) = start(HubConfig::default());
        let (_a, mut rx_a) = connect(&hub, Uuid::new_v4()).await;
        let (_b, mut rx_b) = connect(&hub, Uuid::new_v4()).await;
        hub.flush().await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.broadcast(BroadcastMessage::global(Event::new("NOTICE", Value::Null)))
            .await;
        hub.flush().await.unwrap();
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_closes_queue() {
        let (hub, _token) = start(HubConfig::default());
        let watcher = Uuid::new_v4();
        let (_w, mut watcher_rx) = connect(&hub, watcher).await;

        let (a, mut rx) = connect(&hub, Uuid::new_v4()).await;
        hub.subscribe(a, "x");
        hub.subscribe(a, "y");
        hub.flush().await.unwrap();
        drain(&mut watcher_rx);

        hub.unregister(a).await.unwrap();
        hub.unregister(a).await.unwrap();

        assert!(!hub.is_connected(a));
        assert_eq!(hub.subscriber_count("x"), 0);
        assert_eq!(hub.subscriber_count("y"), 0);

        // One offline event despite the second unregister
        let events = drain(&mut watcher_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["status"], "offline");

        while rx.try_recv().is_ok() {}
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (hub, _token) = start(HubConfig::default());
        let user = Uuid::new_v4();
        let (handle, mut rx) = ConnectionHandle::new(user, 256);
        let id = handle.id;
        hub.register(handle).await.unwrap();
        hub.flush().await.unwrap();
        drain(&mut rx);

        let event = Event::new("FILL", Value::Null);
        for _ in 0..256 {
            assert!(hub.send_to_connection(id, &event));
        }
        assert!(!hub.send_to_connection(id, &event));
        assert_eq!(hub.send_to_user(user, &event), 0);
        assert_eq!(hub.stats().dropped_messages, 2);
        assert_eq!(drain(&mut rx).len(), 256);
    }

    #[tokio::test]
    async fn test_direct_sends() {
        let (hub, _token) = start(HubConfig::default());
        let user = Uuid::new_v4();
        let (_a, mut rx_a) = connect(&hub, user).await;
        let (b, mut rx_b) = connect(&hub, user).await;
        hub.flush().await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let event = Event::new("NOTIFICATION", serde_json::json!({"id": "n1"}));
        assert_eq!(hub.send_to_user(user, &event), 2);
        assert!(hub.send_to_connection(b, &event));
        assert!(!hub.send_to_connection(ConnectionId::new(), &event));
        assert_eq!(hub.send_to_user(Uuid::new_v4(), &event), 0);

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 2);
    }

    #[tokio::test]
    async fn test_online_subset_and_notification_sink() {
        let (hub, _token) = start(HubConfig::default());
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let (_a, mut rx) = connect(&hub, online).await;
        hub.flush().await.unwrap();
        drain(&mut rx);

        assert_eq!(hub.online_subset_of(&[offline, online]), vec![online]);

        let sink: &dyn NotificationSink = &hub;
        assert!(sink.is_online(online));
        assert!(!sink.is_online(offline));
        assert_eq!(
            sink.send_user_event(online, "NOTIFICATION", serde_json::json!({"n": 1})),
            1
        );
        assert_eq!(kinds(&drain(&mut rx)), vec![EventType::Notification]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues() {
        let (hub, token) = start(HubConfig::default());
        let (_a, mut rx) = connect(&hub, Uuid::new_v4()).await;
        token.cancel();

        while rx.recv().await.is_some() {}
        assert!(hub.flush().await.is_err());
        assert_eq!(hub.stats().connections, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let (hub, _token) = start(HubConfig::default());
        let user = Uuid::new_v4();
        let (a, _rx_a) = connect(&hub, user).await;
        let (b, _rx_b) = connect(&hub, user).await;
        hub.subscribe(a, "x");
        hub.subscribe(b, "x");
        hub.subscribe(b, "y");

        let stats = hub.stats();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.users, 1);
        assert_eq!(stats.channels, 2);
        assert_eq!(stats.subscriptions, 3);
    }
}
