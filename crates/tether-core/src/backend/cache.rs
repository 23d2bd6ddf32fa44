//! Shared TTL cache used for presence and typing state.
//!
//! Every operation is atomic per key and nothing more. Expired keys read as
//! absent, which callers treat as the default state rather than an error.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::clock::Clock;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// The key holds a value of another kind.
    #[error("Wrong value type for key {0}")]
    WrongType(String),
}

/// A cross-process key/value store with expiry and scored sets.
#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
    /// Set a string value with a time to live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Read a string value. Missing and expired keys yield `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Add or re-score a member of a sorted set. Keeps the key's existing TTL.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), CacheError>;

    /// Reset a key's time to live. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Members of a sorted set scoring at least `min`, lowest score first.
    async fn zrange_by_score(&self, key: &str, min: i64) -> Result<Vec<String>, CacheError>;

    /// Drop expired keys and return how many went. Stores that expire keys
    /// on their own keep the default.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

#[derive(Debug)]
enum Value {
    Text(String),
    Sorted(HashMap<String, i64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// In-process [`SharedCache`]. Expired keys are evicted when touched or
/// swept by [`SharedCache::purge_expired`].
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored keys, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_expired(&self, key: &str) -> i64 {
        let now = self.clock.now_millis();
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        now
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(now.saturating_add(ttl_millis(ttl))),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.evict_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Text(text) => Ok(Some(text.clone())),
                Value::Sorted(_) => Err(CacheError::WrongType(key.to_string())),
            },
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), CacheError> {
        self.evict_if_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Sorted(members) => {
                members.insert(member.to_string(), score);
                Ok(())
            }
            Value::Text(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = self.evict_if_expired(key);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(now.saturating_add(ttl_millis(ttl)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zrange_by_score(&self, key: &str, min: i64) -> Result<Vec<String>, CacheError> {
        self.evict_if_expired(key);
        let Some(entry) = self.entries.get(key) else {
            return Ok(Vec::new());
        };
        match &entry.value {
            Value::Sorted(members) => {
                let mut hits: Vec<(&String, i64)> = members
                    .iter()
                    .filter(|(_, score)| **score >= min)
                    .map(|(member, score)| (member, *score))
                    .collect();
                hits.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                Ok(hits.into_iter().map(|(member, _)| member.clone()).collect())
            }
            Value::Text(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (MemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (MemoryCache::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_ex_expires() {
        let (cache, clock) = cache();
        cache
            .set_ex("presence:a", "online", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(
            cache.get("presence:a").await.unwrap().as_deref(),
            Some("online")
        );

        clock.advance(Duration::from_secs(299));
        assert!(cache.get("presence:a").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("presence:a").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_set_ex_refreshes_ttl() {
        let (cache, clock) = cache();
        let ttl = Duration::from_secs(10);
        cache.set_ex("k", "1", ttl).await.unwrap();
        clock.advance(Duration::from_secs(8));
        cache.set_ex("k", "2", ttl).await.unwrap();
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_sorted_set_range() {
        let (cache, _clock) = cache();
        cache.zadd("typing:c", "a", 10).await.unwrap();
        cache.zadd("typing:c", "b", 20).await.unwrap();
        cache.zadd("typing:c", "c", 30).await.unwrap();
        // Re-scoring moves a member rather than duplicating it
        cache.zadd("typing:c", "a", 40).await.unwrap();

        let members = cache.zrange_by_score("typing:c", 20).await.unwrap();
        assert_eq!(members, vec!["b", "c", "a"]);
        assert!(cache.zrange_by_score("missing", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_on_sorted_set() {
        let (cache, clock) = cache();
        assert!(!cache.expire("typing:c", Duration::from_secs(10)).await.unwrap());

        cache.zadd("typing:c", "a", 1).await.unwrap();
        assert!(cache.expire("typing:c", Duration::from_secs(10)).await.unwrap());

        clock.advance(Duration::from_secs(10));
        assert!(cache.zrange_by_score("typing:c", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let (cache, _clock) = cache();
        cache.set_ex("k", "v", Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            cache.zadd("k", "m", 1).await,
            Err(CacheError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (cache, clock) = cache();
        cache.set_ex("a", "1", Duration::from_secs(1)).await.unwrap();
        cache.set_ex("b", "1", Duration::from_secs(60)).await.unwrap();
        cache.zadd("typing:c", "a", 1).await.unwrap();
        cache.expire("typing:c", Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired().await.unwrap(), 2);
        assert_eq!(cache.len(), 1);
    }
}
