//! Server to client events.
//!
//! Events share the envelope of commands: `{"type": string, "data": ...}`.
//! The type tag is a closed enum with an [`EventType::Other`] escape hatch so
//! events forwarded from collaborators with a tag this crate does not list are
//! still carried unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Event type tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Ready,
    HeartbeatAck,
    PresenceUpdate,
    TypingStart,
    VoiceJoin,
    VoiceLeave,
    VoiceStateUpdate,
    VoiceSignal,
    VoiceError,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    ReactionAdd,
    ReactionRemove,
    DmMessageCreate,
    DmMessageUpdate,
    DmMessageDelete,
    Notification,
    NotificationRead,
    /// Any tag not listed above.
    Other(String),
}

impl EventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Ready => "READY",
            EventType::HeartbeatAck => "HEARTBEAT_ACK",
            EventType::PresenceUpdate => "PRESENCE_UPDATE",
            EventType::TypingStart => "TYPING_START",
            EventType::VoiceJoin => "VOICE_JOIN",
            EventType::VoiceLeave => "VOICE_LEAVE",
            EventType::VoiceStateUpdate => "VOICE_STATE_UPDATE",
            EventType::VoiceSignal => "VOICE_SIGNAL",
            EventType::VoiceError => "VOICE_ERROR",
            EventType::MessageCreate => "MESSAGE_CREATE",
            EventType::MessageUpdate => "MESSAGE_UPDATE",
            EventType::MessageDelete => "MESSAGE_DELETE",
            EventType::ReactionAdd => "REACTION_ADD",
            EventType::ReactionRemove => "REACTION_REMOVE",
            EventType::DmMessageCreate => "DM_MESSAGE_CREATE",
            EventType::DmMessageUpdate => "DM_MESSAGE_UPDATE",
            EventType::DmMessageDelete => "DM_MESSAGE_DELETE",
            EventType::Notification => "NOTIFICATION",
            EventType::NotificationRead => "NOTIFICATION_READ",
            EventType::Other(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "READY" => EventType::Ready,
            "HEARTBEAT_ACK" => EventType::HeartbeatAck,
            "PRESENCE_UPDATE" => EventType::PresenceUpdate,
            "TYPING_START" => EventType::TypingStart,
            "VOICE_JOIN" => EventType::VoiceJoin,
            "VOICE_LEAVE" => EventType::VoiceLeave,
            "VOICE_STATE_UPDATE" => EventType::VoiceStateUpdate,
            "VOICE_SIGNAL" => EventType::VoiceSignal,
            "VOICE_ERROR" => EventType::VoiceError,
            "MESSAGE_CREATE" => EventType::MessageCreate,
            "MESSAGE_UPDATE" => EventType::MessageUpdate,
            "MESSAGE_DELETE" => EventType::MessageDelete,
            "REACTION_ADD" => EventType::ReactionAdd,
            "REACTION_REMOVE" => EventType::ReactionRemove,
            "DM_MESSAGE_CREATE" => EventType::DmMessageCreate,
            "DM_MESSAGE_UPDATE" => EventType::DmMessageUpdate,
            "DM_MESSAGE_DELETE" => EventType::DmMessageDelete,
            "NOTIFICATION" => EventType::Notification,
            "NOTIFICATION_READ" => EventType::NotificationRead,
            _ => EventType::Other(value),
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        EventType::from(value.to_string())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type tag.
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Create an event from a tag and a payload.
    #[must_use]
    pub fn new(kind: impl Into<EventType>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// `READY`, sent once when a connection enters the ready state.
    #[must_use]
    pub fn ready(connection_id: &str, user_id: &str) -> Self {
        Self::new(
            EventType::Ready,
            json!({
                "connectionId": connection_id,
                "sessionId": connection_id,
                "userId": user_id,
            }),
        )
    }

    /// `HEARTBEAT_ACK` carrying the server time in milliseconds.
    #[must_use]
    pub fn heartbeat_ack(timestamp: i64) -> Self {
        Self::new(EventType::HeartbeatAck, json!({ "timestamp": timestamp }))
    }

    #[must_use]
    pub fn presence_update(user_id: &str, status: &str) -> Self {
        Self::new(
            EventType::PresenceUpdate,
            json!({ "userId": user_id, "status": status }),
        )
    }

    #[must_use]
    pub fn typing_start(channel_id: &str, user_id: &str, user: Value) -> Self {
        Self::new(
            EventType::TypingStart,
            json!({ "channelId": channel_id, "userId": user_id, "user": user }),
        )
    }

    /// `VOICE_JOIN`. The copy sent to the joining connection carries the
    /// current participant list.
    #[must_use]
    pub fn voice_join(
        channel_id: &str,
        user_id: &str,
        state: Value,
        user: Value,
        participants: Option<Value>,
    ) -> Self {
        let mut data = json!({
            "channelId": channel_id,
            "userId": user_id,
            "state": state,
            "user": user,
        });
        if let (Some(participants), Some(map)) = (participants, data.as_object_mut()) {
            map.insert("participants".to_string(), participants);
        }
        Self::new(EventType::VoiceJoin, data)
    }

    #[must_use]
    pub fn voice_leave(channel_id: &str, user_id: &str) -> Self {
        Self::new(
            EventType::VoiceLeave,
            json!({ "channelId": channel_id, "userId": user_id }),
        )
    }

    #[must_use]
    pub fn voice_state_update(channel_id: &str, user_id: &str, state: Value) -> Self {
        Self::new(
            EventType::VoiceStateUpdate,
            json!({ "channelId": channel_id, "userId": user_id, "state": state }),
        )
    }

    #[must_use]
    pub fn voice_signal(
        channel_id: &str,
        from_user_id: &str,
        target_user_id: &str,
        signal_type: &str,
        signal: Value,
    ) -> Self {
        Self::new(
            EventType::VoiceSignal,
            json!({
                "channelId": channel_id,
                "fromUserId": from_user_id,
                "targetUserId": target_user_id,
                "signalType": signal_type,
                "signal": signal,
            }),
        )
    }

    #[must_use]
    pub fn voice_error(error: impl Into<String>) -> Self {
        Self::new(EventType::VoiceError, json!({ "error": error.into() }))
    }
}
