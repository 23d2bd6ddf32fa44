//! Client to server commands.
//!
//! Every inbound message is `{"type": string, "data": <type-specific>}`. The
//! envelope is parsed first and the `data` object is decoded according to the
//! type tag, so an unrecognised tag never fails the whole message: it becomes
//! [`ClientCommand::Unknown`] and can be ignored safely.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::ProtocolError;

/// Raw inbound envelope before the payload is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCommand {
    /// Command type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
}

/// Payload naming a single logical channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub channel_id: String,
}

/// `PRESENCE_UPDATE` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub status: String,
}

/// `VOICE_STATE_UPDATE` payload. Absent flags are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStateUpdate {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_self_muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_self_deafened: Option<bool>,
}

/// `VOICE_SIGNAL` payload: an opaque WebRTC offer/answer/candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSignal {
    pub channel_id: String,
    pub target_user_id: String,
    pub signal_type: String,
    #[serde(default)]
    pub signal: Value,
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Subscribe(ChannelRef),
    Unsubscribe(ChannelRef),
    TypingStart(ChannelRef),
    Heartbeat,
    PresenceUpdate(PresenceUpdate),
    VoiceJoin(ChannelRef),
    VoiceLeave(ChannelRef),
    VoiceStateUpdate(VoiceStateUpdate),
    VoiceSignal(VoiceSignal),
    /// A type tag this server does not know. Always ignorable.
    Unknown(String),
}

impl ClientCommand {
    /// Wire name of the command.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ClientCommand::Subscribe(_) => "SUBSCRIBE",
            ClientCommand::Unsubscribe(_) => "UNSUBSCRIBE",
            ClientCommand::TypingStart(_) => "TYPING_START",
            ClientCommand::Heartbeat => "HEARTBEAT",
            ClientCommand::PresenceUpdate(_) => "PRESENCE_UPDATE",
            ClientCommand::VoiceJoin(_) => "VOICE_JOIN",
            ClientCommand::VoiceLeave(_) => "VOICE_LEAVE",
            ClientCommand::VoiceStateUpdate(_) => "VOICE_STATE_UPDATE",
            ClientCommand::VoiceSignal(_) => "VOICE_SIGNAL",
            ClientCommand::Unknown(kind) => kind,
        }
    }

    /// Interpret a raw envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] when the tag is known but the
    /// payload does not have the expected shape.
    pub fn from_raw(raw: RawCommand) -> Result<Self, ProtocolError> {
        fn payload<T: serde::de::DeserializeOwned>(
            command: &'static str,
            data: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(data)
                .map_err(|source| ProtocolError::InvalidPayload { command, source })
        }

        let command = match raw.kind.as_str() {
            "SUBSCRIBE" => ClientCommand::Subscribe(payload("SUBSCRIBE", raw.data)?),
            "UNSUBSCRIBE" => ClientCommand::Unsubscribe(payload("UNSUBSCRIBE", raw.data)?),
            "TYPING_START" => ClientCommand::TypingStart(payload("TYPING_START", raw.data)?),
            "HEARTBEAT" => ClientCommand::Heartbeat,
            "PRESENCE_UPDATE" => {
                ClientCommand::PresenceUpdate(payload("PRESENCE_UPDATE", raw.data)?)
            }
            "VOICE_JOIN" => ClientCommand::VoiceJoin(payload("VOICE_JOIN", raw.data)?),
            "VOICE_LEAVE" => ClientCommand::VoiceLeave(payload("VOICE_LEAVE", raw.data)?),
            "VOICE_STATE_UPDATE" => {
                ClientCommand::VoiceStateUpdate(payload("VOICE_STATE_UPDATE", raw.data)?)
            }
            "VOICE_SIGNAL" => ClientCommand::VoiceSignal(payload("VOICE_SIGNAL", raw.data)?),
            _ => ClientCommand::Unknown(raw.kind),
        };

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(kind: &str, data: Value) -> RawCommand {
        RawCommand {
            kind: kind.to_string(),
            data,
        }
    }

    #[test]
    fn test_subscribe_payload() {
        let cmd = ClientCommand::from_raw(raw("SUBSCRIBE", json!({"channelId": "c1"}))).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Subscribe(ChannelRef {
                channel_id: "c1".into()
            })
        );
        assert_eq!(cmd.name(), "SUBSCRIBE");
    }

    #[test]
    fn test_heartbeat_ignores_payload() {
        assert_eq!(
            ClientCommand::from_raw(raw("HEARTBEAT", json!({}))).unwrap(),
            ClientCommand::Heartbeat
        );
        assert_eq!(
            ClientCommand::from_raw(raw("HEARTBEAT", Value::Null)).unwrap(),
            ClientCommand::Heartbeat
        );
    }

    #[test]
    fn test_voice_state_update_optional_flags() {
        let cmd = ClientCommand::from_raw(raw(
            "VOICE_STATE_UPDATE",
            json!({"channelId": "v1", "isSelfMuted": true}),
        ))
        .unwrap();

        match cmd {
            ClientCommand::VoiceStateUpdate(update) => {
                assert_eq!(update.is_self_muted, Some(true));
                assert_eq!(update.is_self_deafened, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let cmd = ClientCommand::from_raw(raw("SOMETHING_NEW", json!({"x": 1}))).unwrap();
        assert_eq!(cmd, ClientCommand::Unknown("SOMETHING_NEW".into()));
        assert_eq!(cmd.name(), "SOMETHING_NEW");
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let err = ClientCommand::from_raw(raw("VOICE_JOIN", json!({"channel": 5}))).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPayload {
                command: "VOICE_JOIN",
                ..
            }
        ));
    }
}
