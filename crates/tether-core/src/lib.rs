//! # tether-core
//!
//! Connection registry, fan-out, presence and voice coordination for the
//! tether realtime gateway.
//!
//! - **Hub** - the single owner of connection and subscription state
//! - **Fan-out** - non-blocking delivery to bounded per-connection queues
//! - **Bridge** - republishes broadcasts to, and receives them from, other instances
//! - **Presence** - TTL-backed online status and typing indicators
//! - **Voice** - one voice channel per user, fleet-wide
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│     Hub     │────▶│   Fan-out   │──▶ outbound queues
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │  ▲
//!        ▼                   ▼  │
//! ┌─────────────┐     ┌─────────────┐
//! │ Voice/Pres. │     │   Bridge    │◀──▶ shared bus
//! └─────────────┘     └─────────────┘
//! ```

pub mod backend;
pub mod bridge;
pub mod channel;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod connection;
mod fanout;
pub mod message;
pub mod presence;
pub mod registry;
pub mod runtime;
pub mod voice;

pub use bridge::Bridge;
pub use channel::ChannelId;
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    AuthError, Authenticator, ChannelAccessChecker, ChannelKind, CollaboratorError, MemoryDirectory,
    NotificationSink, UserLookup, UserProfile,
};
pub use config::HubConfig;
pub use connection::{ConnectionHandle, ConnectionId, OutboundReceiver, UserId};
pub use fanout::FanoutReport;
pub use message::BroadcastMessage;
pub use presence::{PresenceCache, PresenceStatus};
pub use registry::{Hub, HubError, HubRunner, HubStats};
pub use runtime::{Backends, Collaborators, Realtime};
pub use voice::{VoiceCoordinator, VoiceError, VoiceParticipant, VoiceSession};
