//! Presence and typing state.
//!
//! Both live only in the shared TTL cache. A missing or expired presence
//! record reads as offline; that is the intended default, not an error. A
//! typing record counts for a recency window shorter than its storage TTL,
//! so the read-side cutoff decides who is still typing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::Event;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::backend::SharedCache;
use crate::clock::Clock;
use crate::collaborators::UserLookup;
use crate::config::HubConfig;
use crate::connection::UserId;
use crate::message::BroadcastMessage;
use crate::registry::Hub;

/// A user's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    Offline,
}

impl PresenceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Idle => "idle",
            PresenceStatus::Dnd => "dnd",
            PresenceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string outside the accepted set.
#[derive(Debug, Error)]
#[error("Invalid presence status: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for PresenceStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceStatus::Online),
            "idle" => Ok(PresenceStatus::Idle),
            "dnd" => Ok(PresenceStatus::Dnd),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

fn presence_key(user_id: UserId) -> String {
    format!("presence:{user_id}")
}

fn typing_key(channel_id: &str) -> String {
    format!("typing:{channel_id}")
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Presence and typing cache.
pub struct PresenceCache {
    hub: Hub,
    cache: Arc<dyn SharedCache>,
    users: Arc<dyn UserLookup>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    typing_ttl: Duration,
    typing_window: Duration,
}

impl PresenceCache {
    #[must_use]
    pub fn new(
        hub: Hub,
        cache: Arc<dyn SharedCache>,
        users: Arc<dyn UserLookup>,
        clock: Arc<dyn Clock>,
        config: &HubConfig,
    ) -> Self {
        Self {
            hub,
            cache,
            users,
            clock,
            ttl: config.presence_ttl,
            typing_ttl: config.typing_ttl,
            typing_window: config.typing_window,
        }
    }

    /// Record a status and return the event announcing it, without
    /// broadcasting. A cache failure is logged; the event is still returned.
    pub async fn set_presence(&self, user_id: UserId, status: PresenceStatus) -> Event {
        if let Err(e) = self
            .cache
            .set_ex(&presence_key(user_id), status.as_str(), self.ttl)
            .await
        {
            error!(user = %user_id, error = %e, "Failed to write presence");
        }
        Event::presence_update(&user_id.to_string(), status.as_str())
    }

    /// Record a status and broadcast it to every connection.
    pub async fn publish_presence(&self, user_id: UserId, status: PresenceStatus) {
        let event = self.set_presence(user_id, status).await;
        debug!(user = %user_id, status = %status, "Presence updated");
        self.hub.broadcast(BroadcastMessage::global(event)).await;
    }

    /// The cached status, or offline when absent, expired or unreadable.
    pub async fn get_presence(&self, user_id: UserId) -> PresenceStatus {
        match self.cache.get(&presence_key(user_id)).await {
            Ok(Some(status)) => status.parse().unwrap_or_else(|e: InvalidStatus| {
                warn!(user = %user_id, error = %e, "Unreadable presence record");
                PresenceStatus::Offline
            }),
            Ok(None) => PresenceStatus::Offline,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Presence read failed");
                PresenceStatus::Offline
            }
        }
    }

    /// Record that a user is typing in a channel and broadcast it with the
    /// user's public profile. If the profile cannot be fetched the event is
    /// dropped.
    pub async fn set_typing(&self, channel_id: &str, user_id: UserId) {
        let key = typing_key(channel_id);
        let member = user_id.to_string();
        let write = match self
            .cache
            .zadd(&key, &member, self.clock.now_millis())
            .await
        {
            Ok(()) => self.cache.expire(&key, self.typing_ttl).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = write {
            error!(channel = %channel_id, user = %user_id, error = %e, "Failed to record typing");
        }

        let profile = match self.users.get_user_by_id(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user = %user_id, error = %e, "User lookup failed, dropping typing event");
                return;
            }
        };

        let event = Event::typing_start(channel_id, &member, profile.to_value());
        self.hub
            .broadcast(BroadcastMessage::new(channel_id, event))
            .await;
    }

    /// Users whose typing record falls inside the recency window.
    pub async fn get_typing_users(&self, channel_id: &str) -> Vec<UserId> {
        let cutoff = self.clock.now_millis() - millis(self.typing_window);
        match self.cache.zrange_by_score(&typing_key(channel_id), cutoff).await {
            Ok(members) => members
                .iter()
                .filter_map(|member| member.parse().ok())
                .collect(),
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Typing read failed");
                Vec::new()
            }
        }
    }
}
