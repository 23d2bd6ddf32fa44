//! Pluggable shared backends.
//!
//! These are the only state a server process shares with its peers. Each is a
//! trait with an in-memory implementation; instances that share the same
//! backend objects behave like processes sharing networked ones.

pub mod bus;
pub mod cache;
pub mod lock;
pub mod voice_store;

pub use bus::{BusError, EventBus, MemoryBus};
pub use cache::{CacheError, MemoryCache, SharedCache};
pub use lock::{DistributedLock, LockError, LockGuard, MemoryLock};
pub use voice_store::{MemoryVoiceStore, StoreError, VoiceStateStore};
