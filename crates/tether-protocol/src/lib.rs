//! # tether-protocol
//!
//! Wire protocol definitions for the tether realtime gateway.
//!
//! Every message in either direction is a JSON envelope
//! `{"type": string, "data": <type-specific>}`.
//!
//! ## Commands (client to server)
//!
//! - `SUBSCRIBE` / `UNSUBSCRIBE` - Channel membership
//! - `TYPING_START`, `PRESENCE_UPDATE` - Ephemeral user state
//! - `HEARTBEAT` - Liveness, answered with `HEARTBEAT_ACK`
//! - `VOICE_JOIN` / `VOICE_LEAVE` / `VOICE_STATE_UPDATE` / `VOICE_SIGNAL` - Voice sessions
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{codec, ClientCommand, Event};
//!
//! let cmd = codec::decode_command(r#"{"type":"HEARTBEAT","data":{}}"#).unwrap();
//! assert_eq!(cmd, ClientCommand::Heartbeat);
//!
//! let text = codec::encode(&Event::heartbeat_ack(1)).unwrap();
//! assert!(text.contains("HEARTBEAT_ACK"));
//! ```

pub mod codec;
pub mod command;
pub mod event;

pub use codec::{decode_command, encode, ProtocolError, MAX_FRAME_SIZE};
pub use command::{ChannelRef, ClientCommand, PresenceUpdate, VoiceSignal, VoiceStateUpdate};
pub use event::{Event, EventType};
