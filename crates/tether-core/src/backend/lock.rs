//! Cross-process mutual exclusion.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not acquired within the timeout.
    #[error("Timed out acquiring lock {0}")]
    Timeout(String),

    /// The lock service could not be reached.
    #[error("Lock service unavailable: {0}")]
    Unavailable(String),
}

/// Proof of holding a lock. Dropping it releases the lock.
pub struct LockGuard {
    key: String,
    _held: Box<dyn Send + Sync>,
}

impl LockGuard {
    /// Wrap whatever value keeps the lock held until it is dropped.
    pub fn new(key: impl Into<String>, held: impl Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            _held: Box::new(held),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// A named lock that excludes holders in every process sharing the backend.
#[async_trait]
pub trait DistributedLock: Send + Sync + 'static {
    /// Wait up to `timeout` for exclusive ownership of `key`.
    async fn lock(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError>;
}

type KeyTable = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// In-process [`DistributedLock`]: one async mutex per key. A key's entry is
/// removed once nobody holds or waits for it.
#[derive(Default)]
pub struct MemoryLock {
    keys: KeyTable,
}

impl MemoryLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held or waited on.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.keys.len()
    }
}

/// Drop the key's entry if the table holds the only reference to its mutex.
fn release_idle(keys: &KeyTable, key: &str) {
    keys.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Keeps a [`MemoryLock`] key held; frees the table entry on drop.
struct Held {
    keys: KeyTable,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Held {
    fn drop(&mut self) {
        // The guard owns a reference to the mutex; release it first
        self.guard.take();
        release_idle(&self.keys, &self.key);
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn lock(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let mutex = self.keys.entry(key.to_string()).or_default().clone();
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(LockGuard::new(
                key,
                Held {
                    keys: Arc::clone(&self.keys),
                    key: key.to_string(),
                    guard: Some(guard),
                },
            )),
            Err(_) => {
                release_idle(&self.keys, key);
                Err(LockError::Timeout(key.to_string()))
            }
        }
    }
}
