//! Voice session rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::channel::ChannelId;
use crate::collaborators::UserProfile;
use crate::connection::UserId;

/// A user's membership in one voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSession {
    pub id: Uuid,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    /// Server mute, set by a moderator.
    pub is_muted: bool,
    /// Server deafen.
    pub is_deafened: bool,
    pub is_self_muted: bool,
    pub is_self_deafened: bool,
    pub joined_at: DateTime<Utc>,
}

impl VoiceSession {
    /// A fresh session with every flag cleared.
    #[must_use]
    pub fn new(channel_id: impl Into<ChannelId>, user_id: UserId, joined_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id: channel_id.into(),
            user_id,
            is_muted: false,
            is_deafened: false,
            is_self_muted: false,
            is_self_deafened: false,
            joined_at,
        }
    }

    /// Apply a partial change. Absent fields are left alone.
    pub fn apply(&mut self, change: VoiceStateChange) {
        if let Some(muted) = change.is_self_muted {
            self.is_self_muted = muted;
        }
        if let Some(deafened) = change.is_self_deafened {
            self.is_self_deafened = deafened;
        }
        if let Some(muted) = change.is_muted {
            self.is_muted = muted;
        }
        if let Some(deafened) = change.is_deafened {
            self.is_deafened = deafened;
        }
    }

    /// The `state` object carried by voice events.
    #[must_use]
    pub fn to_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A partial update to a [`VoiceSession`]'s flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceStateChange {
    pub is_self_muted: Option<bool>,
    pub is_self_deafened: Option<bool>,
    pub is_muted: Option<bool>,
    pub is_deafened: Option<bool>,
}

impl VoiceStateChange {
    /// A change the user makes to their own flags.
    #[must_use]
    pub fn self_state(muted: Option<bool>, deafened: Option<bool>) -> Self {
        Self {
            is_self_muted: muted,
            is_self_deafened: deafened,
            ..Self::default()
        }
    }

    /// A moderator's server mute.
    #[must_use]
    pub fn server_mute(muted: bool) -> Self {
        Self {
            is_muted: Some(muted),
            ..Self::default()
        }
    }
}

/// A session together with the public profile of its user, as listed to
/// clients joining or polling a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParticipant {
    #[serde(flatten)]
    pub session: VoiceSession,
    pub user: Option<UserProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_partial_change() {
        let mut session = VoiceSession::new("v1", Uuid::new_v4(), Utc::now());
        session.apply(VoiceStateChange::self_state(Some(true), None));
        assert!(session.is_self_muted);
        assert!(!session.is_self_deafened);

        session.apply(VoiceStateChange::server_mute(true));
        assert!(session.is_muted);
        assert!(session.is_self_muted);
    }

    #[test]
    fn test_state_field_names() {
        let session = VoiceSession::new("v1", Uuid::new_v4(), Utc::now());
        let state = session.to_state();
        for field in [
            "channelId",
            "userId",
            "isMuted",
            "isDeafened",
            "isSelfMuted",
            "isSelfDeafened",
            "joinedAt",
        ] {
            assert!(state.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_participant_flattens_session() {
        let session = VoiceSession::new("v1", Uuid::new_v4(), Utc::now());
        let participant = VoiceParticipant {
            session: session.clone(),
            user: None,
        };
        let value = serde_json::to_value(&participant).unwrap();
        assert_eq!(value["channelId"], "v1");
        assert!(value["user"].is_null());
    }
}
