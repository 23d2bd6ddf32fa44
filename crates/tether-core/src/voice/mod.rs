//! Voice session coordination.
//!
//! A user is in at most one voice channel across the whole fleet. Joins are
//! serialized per user with the distributed lock, and the store replaces the
//! user's rows in one unit of work. The lock is held until the resulting
//! leave and join broadcasts have been queued, so observers never see two
//! joins for one user without the leave in between.

mod session;

pub use session::{VoiceParticipant, VoiceSession, VoiceStateChange};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::Event;
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{DistributedLock, LockError, StoreError, VoiceStateStore};
use crate::channel::ChannelId;
use crate::clock::Clock;
use crate::collaborators::{ChannelAccessChecker, CollaboratorError, UserLookup};
use crate::config::HubConfig;
use crate::connection::{ConnectionId, UserId};
use crate::message::BroadcastMessage;
use crate::registry::Hub;

/// Voice errors. The display string is what clients see in `VOICE_ERROR`.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("channel is not a voice channel")]
    NotVoiceChannel,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("not in a voice channel")]
    NotInChannel,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

fn lock_key(user_id: UserId) -> String {
    format!("voice:{user_id}")
}

/// Voice session coordinator.
pub struct VoiceCoordinator {
    hub: Hub,
    store: Arc<dyn VoiceStateStore>,
    lock: Arc<dyn DistributedLock>,
    access: Arc<dyn ChannelAccessChecker>,
    users: Arc<dyn UserLookup>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl VoiceCoordinator {
    #[must_use]
    pub fn new(
        hub: Hub,
        store: Arc<dyn VoiceStateStore>,
        lock: Arc<dyn DistributedLock>,
        access: Arc<dyn ChannelAccessChecker>,
        users: Arc<dyn UserLookup>,
        clock: Arc<dyn Clock>,
        config: &HubConfig,
    ) -> Self {
        Self {
            hub,
            store,
            lock,
            access,
            users,
            clock,
            lock_timeout: config.voice_lock_timeout,
        }
    }

    /// Move `user_id` into `channel_id`, leaving any other voice channel.
    ///
    /// `origin` is the requesting connection: it receives the join with the
    /// participant list, everyone else subscribed to the channel receives
    /// the plain join.
    ///
    /// # Errors
    ///
    /// Fails if the channel is not voice capable, the user may not access
    /// it, or the lock or store fails.
    pub async fn join(
        &self,
        user_id: UserId,
        channel_id: &str,
        origin: Option<ConnectionId>,
    ) -> Result<VoiceSession, VoiceError> {
        if !self.access.is_voice_channel(channel_id).await? {
            return Err(VoiceError::NotVoiceChannel);
        }
        if !self.access.can_access_channel(channel_id, user_id).await? {
            return Err(VoiceError::Forbidden);
        }

        let _guard = self
            .lock
            .lock(&lock_key(user_id), self.lock_timeout)
            .await?;

        let session = VoiceSession::new(channel_id, user_id, self.clock.now());
        let previous = self.store.replace_user_session(session.clone()).await?;

        let user = user_id.to_string();
        for left in previous.iter().filter(|left| left.as_str() != channel_id) {
            debug!(user = %user_id, channel = %left, "Left previous voice channel");
            self.hub
                .broadcast(BroadcastMessage::new(left.clone(), Event::voice_leave(left, &user)))
                .await;
        }

        let profile = self.profile_value(user_id).await;
        if let Some(origin) = origin {
            let participants = self.participants_value(channel_id).await;
            let event = Event::voice_join(
                channel_id,
                &user,
                session.to_state(),
                profile.clone(),
                Some(participants),
            );
            self.hub.send_to_connection(origin, &event);
        }

        let event = Event::voice_join(channel_id, &user, session.to_state(), profile, None);
        self.hub
            .broadcast(BroadcastMessage::new(channel_id, event).excluding(origin))
            .await;

        info!(user = %user_id, channel = %channel_id, "Joined voice channel");
        Ok(session)
    }

    /// Leave one voice channel.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NotInChannel`] if the user has no session there.
    pub async fn leave(
        &self,
        user_id: UserId,
        channel_id: &str,
        origin: Option<ConnectionId>,
    ) -> Result<(), VoiceError> {
        if !self.store.remove(channel_id, user_id).await? {
            return Err(VoiceError::NotInChannel);
        }

        let event = Event::voice_leave(channel_id, &user_id.to_string());
        self.hub
            .broadcast(BroadcastMessage::new(channel_id, event).excluding(origin))
            .await;

        info!(user = %user_id, channel = %channel_id, "Left voice channel");
        Ok(())
    }

    /// Remove every session of a user whose last connection closed. Returns
    /// the channels left; announcing them is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn auto_leave_on_disconnect(&self, user_id: UserId) -> Result<Vec<ChannelId>, VoiceError> {
        let channels = self.store.remove_user(user_id).await?;
        if !channels.is_empty() {
            info!(user = %user_id, channels = ?channels, "Released voice sessions on disconnect");
        }
        Ok(channels)
    }

    /// Change the user's own mute and deafen flags.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NotInChannel`] if the user has no session in
    /// that exact channel.
    pub async fn update_self_state(
        &self,
        user_id: UserId,
        channel_id: &str,
        is_self_muted: Option<bool>,
        is_self_deafened: Option<bool>,
    ) -> Result<VoiceSession, VoiceError> {
        let change = VoiceStateChange::self_state(is_self_muted, is_self_deafened);
        let session = self
            .store
            .update(channel_id, user_id, change)
            .await?
            .ok_or(VoiceError::NotInChannel)?;

        self.announce_state(&session).await;
        Ok(session)
    }

    /// A moderator sets another user's server mute.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Forbidden`] if `actor` lacks moderation rights on
    /// the channel, [`VoiceError::NotInChannel`] if `target` is not in it.
    pub async fn server_mute(
        &self,
        actor: UserId,
        target: UserId,
        channel_id: &str,
        muted: bool,
    ) -> Result<VoiceSession, VoiceError> {
        if !self.access.can_manage_messages(channel_id, actor).await? {
            return Err(VoiceError::Forbidden);
        }

        let session = self
            .store
            .update(channel_id, target, VoiceStateChange::server_mute(muted))
            .await?
            .ok_or(VoiceError::NotInChannel)?;

        info!(actor = %actor, target = %target, channel = %channel_id, muted, "Server mute changed");
        self.announce_state(&session).await;
        Ok(session)
    }

    /// Forward a signaling payload to every connection of `target`. Nothing
    /// is stored; an offline target silently loses the signal.
    pub fn relay_signal(
        &self,
        from: UserId,
        channel_id: &str,
        target: UserId,
        signal_type: &str,
        signal: Value,
    ) -> usize {
        let event = Event::voice_signal(
            channel_id,
            &from.to_string(),
            &target.to_string(),
            signal_type,
            signal,
        );
        let delivered = self.hub.send_to_user(target, &event);
        if delivered == 0 {
            debug!(from = %from, target = %target, "Signal target offline, dropped");
        }
        delivered
    }

    /// Sessions in a channel with their users' profiles.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn channel_participants(&self, channel_id: &str) -> Result<Vec<VoiceParticipant>, VoiceError> {
        let sessions = self.store.channel_sessions(channel_id).await?;
        let mut participants = Vec::with_capacity(sessions.len());
        for session in sessions {
            let user = self.users.get_user_by_id(session.user_id).await.ok();
            participants.push(VoiceParticipant { session, user });
        }
        Ok(participants)
    }

    /// The channel a user is currently in, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn current_session(&self, user_id: UserId) -> Result<Option<VoiceSession>, VoiceError> {
        Ok(self.store.user_sessions(user_id).await?.into_iter().next())
    }

    async fn announce_state(&self, session: &VoiceSession) {
        let event = Event::voice_state_update(
            &session.channel_id,
            &session.user_id.to_string(),
            session.to_state(),
        );
        self.hub
            .broadcast(BroadcastMessage::new(session.channel_id.clone(), event))
            .await;
    }

    async fn profile_value(&self, user_id: UserId) -> Value {
        match self.users.get_user_by_id(user_id).await {
            Ok(profile) => profile.to_value(),
            Err(e) => {
                debug!(user = %user_id, error = %e, "No profile for voice event");
                Value::Null
            }
        }
    }

    async fn participants_value(&self, channel_id: &str) -> Value {
        match self.channel_participants(channel_id).await {
            Ok(participants) => serde_json::to_value(participants).unwrap_or(Value::Array(Vec::new())),
            Err(e) => {
                debug!(channel = %channel_id, error = %e, "Participant list unavailable");
                Value::Array(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBus, MemoryLock, MemoryVoiceStore};
    use crate::bridge::Bridge;
    use crate::clock::SystemClock;
    use crate::collaborators::{ChannelKind, MemoryDirectory, UserProfile};
    use crate::connection::{ConnectionHandle, OutboundReceiver};
    use crate::presence::PresenceCache;
    use crate::backend::MemoryCache;
    use tether_protocol::{codec, EventType};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct Fixture {
        hub: Hub,
        voice: Arc<VoiceCoordinator>,
        store: Arc<MemoryVoiceStore>,
        directory: Arc<MemoryDirectory>,
        _token: CancellationToken,
    }

    fn fixture() -> Fixture {
        let config = HubConfig::default();
        let bridge = Bridge::new(Arc::new(MemoryBus::new()), &config.bus_topic);
        let (hub, mut runner) = Hub::new(&config, bridge);

        let directory = Arc::new(MemoryDirectory::new());
        directory
            .add_channel("v1", ChannelKind::Voice)
            .add_channel("v2", ChannelKind::Voice)
            .add_channel("text", ChannelKind::Text);

        let store = Arc::new(MemoryVoiceStore::new());
        let voice = Arc::new(VoiceCoordinator::new(
            hub.clone(),
            store.clone(),
            Arc::new(MemoryLock::new()),
            directory.clone(),
            directory.clone(),
            Arc::new(SystemClock),
            &config,
        ));
        let presence = Arc::new(PresenceCache::new(
            hub.clone(),
            Arc::new(MemoryCache::new(Arc::new(SystemClock))),
            directory.clone(),
            Arc::new(SystemClock),
            &config,
        ));
        runner.attach_voice(voice.clone());
        runner.attach_presence(presence);

        let token = CancellationToken::new();
        tokio::spawn(runner.run(token.clone()));
        Fixture {
            hub,
            voice,
            store,
            directory,
            _token: token,
        }
    }

    impl Fixture {
        fn member(&self, channels: &[&str]) -> UserId {
            let user = Uuid::new_v4();
            for channel in channels {
                self.directory.add_member(channel, user);
            }
            self.directory.add_user(UserProfile::new(user, "member"));
            user
        }

        async fn connect(&self, user: UserId, channels: &[&str]) -> (ConnectionId, OutboundReceiver) {
            let (handle, mut rx) = ConnectionHandle::new(user, 256);
            let id = handle.id;
            self.hub.register(handle).await.unwrap();
            for channel in channels {
                self.hub.subscribe(id, channel);
            }
            self.hub.flush().await.unwrap();
            while rx.try_recv().is_ok() {}
            (id, rx)
        }
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(text) = rx.try_recv() {
            events.push(codec::decode_event(&text).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_join_preconditions() {
        let f = fixture();
        let outsider = Uuid::new_v4();
        let member = f.member(&["v1", "text"]);

        assert!(matches!(
            f.voice.join(member, "text", None).await,
            Err(VoiceError::NotVoiceChannel)
        ));
        assert!(matches!(
            f.voice.join(outsider, "v1", None).await,
            Err(VoiceError::Forbidden)
        ));
        assert!(matches!(
            f.voice.join(member, "missing", None).await,
            Err(VoiceError::Collaborator(_))
        ));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_switching_channels_announces_leave() {
        let f = fixture();
        let alice = f.member(&["v1", "v2"]);
        let bob = f.member(&["v1"]);
        let (origin, mut alice_rx) = f.connect(alice, &["v1", "v2"]).await;
        let (_bob_conn, mut bob_rx) = f.connect(bob, &["v1"]).await;

        f.voice.join(alice, "v1", Some(origin)).await.unwrap();
        f.voice.join(alice, "v2", Some(origin)).await.unwrap();
        f.hub.flush().await.unwrap();

        let sessions = f.store.user_sessions(alice).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].channel_id, "v2");

        let bob_events = drain(&mut bob_rx);
        let kinds: Vec<_> = bob_events.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(kinds, vec![EventType::VoiceJoin, EventType::VoiceLeave]);
        assert_eq!(bob_events[1].data["channelId"], "v1");
        assert!(bob_events[0].data.get("participants").is_none());

        // The joining connection gets its own copy with participants, never
        // the broadcast copy
        let alice_joins: Vec<_> = drain(&mut alice_rx)
            .into_iter()
            .filter(|e| e.kind == EventType::VoiceJoin)
            .collect();
        assert_eq!(alice_joins.len(), 2);
        assert!(alice_joins.iter().all(|e| e.data["participants"].is_array()));
        assert_eq!(alice_joins[1].data["participants"][0]["channelId"], "v2");
    }

    #[tokio::test]
    async fn test_rejoin_same_channel_sends_no_leave() {
        let f = fixture();
        let alice = f.member(&["v1"]);
        let bob = f.member(&["v1"]);
        let (_b, mut bob_rx) = f.connect(bob, &["v1"]).await;

        f.voice.join(alice, "v1", None).await.unwrap();
        f.voice.join(alice, "v1", None).await.unwrap();
        f.hub.flush().await.unwrap();

        assert!(drain(&mut bob_rx)
            .iter()
            .all(|e| e.kind == EventType::VoiceJoin));
    }

    #[tokio::test]
    async fn test_concurrent_joins_leave_one_session() {
        let f = fixture();
        let alice = f.member(&["v1", "v2"]);
        let bob = f.member(&["v1", "v2"]);
        let (_b, mut bob_rx) = f.connect(bob, &["v1", "v2"]).await;

        let (a, b) = tokio::join!(f.voice.join(alice, "v1", None), f.voice.join(alice, "v2", None));
        a.unwrap();
        b.unwrap();
        f.hub.flush().await.unwrap();

        let sessions = f.store.user_sessions(alice).await.unwrap();
        assert_eq!(sessions.len(), 1);

        // The channel entered first is announced as left, exactly once
        let leaves: Vec<_> = drain(&mut bob_rx)
            .into_iter()
            .filter(|e| e.kind == EventType::VoiceLeave)
            .collect();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].data["userId"], alice.to_string());
        assert_ne!(leaves[0].data["channelId"], sessions[0].channel_id.as_str());
    }

    #[tokio::test]
    async fn test_leave() {
        let f = fixture();
        let alice = f.member(&["v1"]);
        let bob = f.member(&["v1"]);
        let (origin, mut alice_rx) = f.connect(alice, &["v1"]).await;
        let (_b, mut bob_rx) = f.connect(bob, &["v1"]).await;

        assert!(matches!(
            f.voice.leave(alice, "v1", Some(origin)).await,
            Err(VoiceError::NotInChannel)
        ));

        f.voice.join(alice, "v1", Some(origin)).await.unwrap();
        f.hub.flush().await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        f.voice.leave(alice, "v1", Some(origin)).await.unwrap();
        f.hub.flush().await.unwrap();
        assert!(drain(&mut alice_rx).is_empty());
        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::VoiceLeave);
    }

    #[tokio::test]
    async fn test_self_state_requires_exact_channel() {
        let f = fixture();
        let alice = f.member(&["v1", "v2"]);
        f.voice.join(alice, "v1", None).await.unwrap();

        assert!(matches!(
            f.voice.update_self_state(alice, "v2", Some(true), None).await,
            Err(VoiceError::NotInChannel)
        ));
        let session = f
            .voice
            .update_self_state(alice, "v1", Some(true), Some(true))
            .await
            .unwrap();
        assert!(session.is_self_muted && session.is_self_deafened);
    }

    #[tokio::test]
    async fn test_server_mute_requires_moderator() {
        let f = fixture();
        let target = f.member(&["v1"]);
        let peer = f.member(&["v1"]);
        let moderator = Uuid::new_v4();
        f.directory.add_moderator("v1", moderator);
        f.voice.join(target, "v1", None).await.unwrap();

        assert!(matches!(
            f.voice.server_mute(peer, target, "v1", true).await,
            Err(VoiceError::Forbidden)
        ));
        assert!(matches!(
            f.voice.server_mute(moderator, peer, "v1", true).await,
            Err(VoiceError::NotInChannel)
        ));

        let (_c, mut rx) = f.connect(peer, &["v1"]).await;
        let session = f.voice.server_mute(moderator, target, "v1", true).await.unwrap();
        assert!(session.is_muted);
        f.hub.flush().await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::VoiceStateUpdate);
        assert_eq!(events[0].data["state"]["isMuted"], true);
    }

    #[tokio::test]
    async fn test_relay_signal() {
        let f = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_b, mut bob_rx) = f.connect(bob, &[]).await;

        let signal = serde_json::json!({"sdp": "v=0"});
        assert_eq!(f.voice.relay_signal(alice, "v1", bob, "offer", signal.clone()), 1);
        assert_eq!(f.voice.relay_signal(alice, "v1", Uuid::new_v4(), "offer", signal), 0);

        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["fromUserId"], alice.to_string());
        assert_eq!(events[0].data["signalType"], "offer");
        assert_eq!(events[0].data["signal"]["sdp"], "v=0");
    }

    #[tokio::test]
    async fn test_disconnect_cascade_releases_voice() {
        let f = fixture();
        let alice = f.member(&["v1", "x", "y"]);
        let bob = f.member(&["v1"]);
        let (a, _alice_rx) = f.connect(alice, &["x", "y"]).await;
        let (_b, mut bob_rx) = f.connect(bob, &["v1"]).await;
        f.voice.join(alice, "v1", Some(a)).await.unwrap();
        f.hub.flush().await.unwrap();
        drain(&mut bob_rx);

        f.hub.unregister(a).await.unwrap();
        f.hub.unregister(a).await.unwrap();
        f.hub.flush().await.unwrap();

        assert_eq!(f.hub.subscriber_count("x"), 0);
        assert_eq!(f.hub.subscriber_count("y"), 0);
        assert!(f.voice.current_session(alice).await.unwrap().is_none());

        let events = drain(&mut bob_rx);
        let leaves: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventType::VoiceLeave)
            .collect();
        let offline: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventType::PresenceUpdate)
            .collect();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].data["channelId"], "v1");
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].data["status"], "offline");
    }
}
