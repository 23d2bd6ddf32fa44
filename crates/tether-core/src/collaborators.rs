//! Capability interfaces for the services this core depends on or serves.
//!
//! Authorization, user profiles and identity live outside the realtime core.
//! It sees them only through these small traits.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::channel::ChannelId;
use crate::connection::UserId;

/// Errors raised by external collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Public profile of a user, embedded in typing and voice events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub status: String,
}

impl UserProfile {
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name: None,
            avatar_url: None,
            status: "offline".to_string(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Channel and conversation authorization.
#[async_trait]
pub trait ChannelAccessChecker: Send + Sync + 'static {
    async fn is_voice_channel(&self, channel_id: &str) -> Result<bool, CollaboratorError>;

    async fn can_access_channel(&self, channel_id: &str, user_id: UserId) -> Result<bool, CollaboratorError>;

    async fn can_access_conversation(
        &self,
        conversation_id: &str,
        user_id: UserId,
    ) -> Result<bool, CollaboratorError>;

    /// Moderation permission, which also gates server mute.
    async fn can_manage_messages(&self, channel_id: &str, user_id: UserId) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait UserLookup: Send + Sync + 'static {
    async fn get_user_by_id(&self, user_id: UserId) -> Result<UserProfile, CollaboratorError>;
}

/// Resolves a bearer token to a user.
pub trait Authenticator: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns an error if the token is not valid.
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// What notification and plugin services call back into.
pub trait NotificationSink: Send + Sync {
    /// Deliver an event to every live connection of a user. Returns the
    /// number of connections it was queued for.
    fn send_user_event(&self, user_id: UserId, kind: &str, data: Value) -> usize;

    fn is_online(&self, user_id: UserId) -> bool;
}

/// Kind of a channel known to [`MemoryDirectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Voice,
}

#[derive(Debug)]
struct DirectoryChannel {
    kind: ChannelKind,
    members: HashSet<UserId>,
    moderators: HashSet<UserId>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    channels: HashMap<ChannelId, DirectoryChannel>,
    conversations: HashMap<String, HashSet<UserId>>,
    users: HashMap<UserId, UserProfile>,
}

/// In-memory channel directory and user lookup.
///
/// In open mode every access check passes, unknown channels count as voice
/// capable and unknown users get a placeholder profile. That is what the
/// binary runs with when no directory service is wired in.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
    open: bool,
}

impl MemoryDirectory {
    /// A directory that grants nothing it has not been told about.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory that grants everything.
    #[must_use]
    pub fn open() -> Self {
        Self {
            state: RwLock::default(),
            open: true,
        }
    }

    pub fn add_channel(&self, channel_id: impl Into<ChannelId>, kind: ChannelKind) -> &Self {
        self.state.write().channels.insert(
            channel_id.into(),
            DirectoryChannel {
                kind,
                members: HashSet::new(),
                moderators: HashSet::new(),
            },
        );
        self
    }

    /// Grant a user access to a known channel.
    pub fn add_member(&self, channel_id: &str, user_id: UserId) -> &Self {
        if let Some(channel) = self.state.write().channels.get_mut(channel_id) {
            channel.members.insert(user_id);
        }
        self
    }

    /// Grant a user moderation rights (and access) on a known channel.
    pub fn add_moderator(&self, channel_id: &str, user_id: UserId) -> &Self {
        if let Some(channel) = self.state.write().channels.get_mut(channel_id) {
            channel.members.insert(user_id);
            channel.moderators.insert(user_id);
        }
        self
    }

    pub fn add_conversation(
        &self,
        conversation_id: impl Into<String>,
        participants: impl IntoIterator<Item = UserId>,
    ) -> &Self {
        self.state
            .write()
            .conversations
            .insert(conversation_id.into(), participants.into_iter().collect());
        self
    }

    pub fn add_user(&self, profile: UserProfile) -> &Self {
        self.state.write().users.insert(profile.id, profile);
        self
    }
}

#[async_trait]
impl ChannelAccessChecker for MemoryDirectory {
    async fn is_voice_channel(&self, channel_id: &str) -> Result<bool, CollaboratorError> {
        match self.state.read().channels.get(channel_id) {
            Some(channel) => Ok(channel.kind == ChannelKind::Voice),
            None if self.open => Ok(true),
            None => Err(CollaboratorError::NotFound(format!("channel {channel_id}"))),
        }
    }

    async fn can_access_channel(&self, channel_id: &str, user_id: UserId) -> Result<bool, CollaboratorError> {
        if self.open {
            return Ok(true);
        }
        Ok(self
            .state
            .read()
            .channels
            .get(channel_id)
            .is_some_and(|channel| channel.members.contains(&user_id)))
    }

    async fn can_access_conversation(
        &self,
        conversation_id: &str,
        user_id: UserId,
    ) -> Result<bool, CollaboratorError> {
        if self.open {
            return Ok(true);
        }
        Ok(self
            .state
            .read()
            .conversations
            .get(conversation_id)
            .is_some_and(|participants| participants.contains(&user_id)))
    }

    async fn can_manage_messages(&self, channel_id: &str, user_id: UserId) -> Result<bool, CollaboratorError> {
        if self.open {
            return Ok(true);
        }
        Ok(self
            .state
            .read()
            .channels
            .get(channel_id)
            .is_some_and(|channel| channel.moderators.contains(&user_id)))
    }
}

#[async_trait]
impl UserLookup for MemoryDirectory {
    async fn get_user_by_id(&self, user_id: UserId) -> Result<UserProfile, CollaboratorError> {
        if let Some(profile) = self.state.read().users.get(&user_id) {
            return Ok(profile.clone());
        }
        if self.open {
            let simple = user_id.simple().to_string();
            let short = simple.get(..8).unwrap_or(&simple);
            return Ok(UserProfile::new(user_id, format!("user-{short}")));
        }
        Err(CollaboratorError::NotFound(format!("user {user_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_closed_directory() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let directory = MemoryDirectory::new();
        directory
            .add_channel("general", ChannelKind::Text)
            .add_channel("lounge", ChannelKind::Voice)
            .add_member("general", alice)
            .add_moderator("lounge", bob)
            .add_conversation("dm-1", [alice, bob]);

        assert!(directory.can_access_channel("general", alice).await.unwrap());
        assert!(!directory.can_access_channel("general", bob).await.unwrap());
        assert!(directory.can_access_channel("lounge", bob).await.unwrap());
        assert!(directory.can_manage_messages("lounge", bob).await.unwrap());
        assert!(!directory.can_manage_messages("general", alice).await.unwrap());
        assert!(directory.can_access_conversation("dm-1", alice).await.unwrap());
        assert!(!directory.can_access_conversation("dm-2", alice).await.unwrap());

        assert!(directory.is_voice_channel("lounge").await.unwrap());
        assert!(!directory.is_voice_channel("general").await.unwrap());
        assert!(directory.is_voice_channel("missing").await.is_err());
        assert!(directory.get_user_by_id(alice).await.is_err());
    }

    #[tokio::test]
    async fn test_open_directory() {
        let user = Uuid::new_v4();
        let directory = MemoryDirectory::open();
        assert!(directory.can_access_channel("anything", user).await.unwrap());
        assert!(directory.is_voice_channel("anything").await.unwrap());

        let profile = directory.get_user_by_id(user).await.unwrap();
        assert_eq!(profile.id, user);
        assert!(profile.username.starts_with("user-"));
    }

    #[test]
    fn test_profile_wire_names() {
        let profile = UserProfile::new(Uuid::nil(), "alice").with_display_name("Alice");
        let value = profile.to_value();
        assert_eq!(value["displayName"], "Alice");
        assert!(value["avatarUrl"].is_null());
    }
}
