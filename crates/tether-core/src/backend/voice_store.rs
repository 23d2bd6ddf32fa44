//! Persistent voice session rows.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

use crate::channel::ChannelId;
use crate::connection::UserId;
use crate::voice::{VoiceSession, VoiceStateChange};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the unit of work failed.
    #[error("Voice store unavailable: {0}")]
    Unavailable(String),
}

/// Voice session rows keyed by `(channel, user)`.
#[async_trait]
pub trait VoiceStateStore: Send + Sync + 'static {
    /// Delete every row of `session.user_id` and insert `session`, as one
    /// unit of work. Returns the channels the user's removed rows were in.
    async fn replace_user_session(&self, session: VoiceSession) -> Result<Vec<ChannelId>, StoreError>;

    /// Remove one row. Returns `false` if there was none.
    async fn remove(&self, channel_id: &str, user_id: UserId) -> Result<bool, StoreError>;

    /// Remove every row of a user. Returns the channels they were in.
    async fn remove_user(&self, user_id: UserId) -> Result<Vec<ChannelId>, StoreError>;

    /// Apply a change to an existing row and return the result, or `None` if
    /// the row does not exist.
    async fn update(
        &self,
        channel_id: &str,
        user_id: UserId,
        change: VoiceStateChange,
    ) -> Result<Option<VoiceSession>, StoreError>;

    /// Every row in a channel, earliest join first.
    async fn channel_sessions(&self, channel_id: &str) -> Result<Vec<VoiceSession>, StoreError>;

    async fn user_sessions(&self, user_id: UserId) -> Result<Vec<VoiceSession>, StoreError>;
}

type Rows = HashMap<ChannelId, HashMap<UserId, VoiceSession>>;

fn remove_user_rows(rows: &mut Rows, user_id: UserId) -> Vec<ChannelId> {
    let mut removed: Vec<ChannelId> = rows
        .iter_mut()
        .filter_map(|(channel_id, users)| users.remove(&user_id).map(|_| channel_id.clone()))
        .collect();
    rows.retain(|_, users| !users.is_empty());
    removed.sort();
    removed
}

/// In-process [`VoiceStateStore`]. Every operation runs under one lock, so
/// each call is a single atomic unit of work.
#[derive(Default)]
pub struct MemoryVoiceStore {
    rows: RwLock<Rows>,
}

impl MemoryVoiceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VoiceStateStore for MemoryVoiceStore {
    async fn replace_user_session(&self, session: VoiceSession) -> Result<Vec<ChannelId>, StoreError> {
        let mut rows = self.rows.write();
        let removed = remove_user_rows(&mut rows, session.user_id);
        rows.entry(session.channel_id.clone())
            .or_default()
            .insert(session.user_id, session);
        Ok(removed)
    }

    async fn remove(&self, channel_id: &str, user_id: UserId) -> Result<bool, StoreError> {
        let mut rows = self.rows.write();
        let Some(users) = rows.get_mut(channel_id) else {
            return Ok(false);
        };
        let removed = users.remove(&user_id).is_some();
        if users.is_empty() {
            rows.remove(channel_id);
        }
        Ok(removed)
    }

    async fn remove_user(&self, user_id: UserId) -> Result<Vec<ChannelId>, StoreError> {
        Ok(remove_user_rows(&mut self.rows.write(), user_id))
    }

    async fn update(
        &self,
        channel_id: &str,
        user_id: UserId,
        change: VoiceStateChange,
    ) -> Result<Option<VoiceSession>, StoreError> {
        let mut rows = self.rows.write();
        Ok(rows
            .get_mut(channel_id)
            .and_then(|users| users.get_mut(&user_id))
            .map(|session| {
                session.apply(change);
                session.clone()
            }))
    }

    async fn channel_sessions(&self, channel_id: &str) -> Result<Vec<VoiceSession>, StoreError> {
        let mut sessions: Vec<VoiceSession> = self
            .rows
            .read()
            .get(channel_id)
            .map(|users| users.values().cloned().collect())
            .unwrap_or_default();
        sessions.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(sessions)
    }

    async fn user_sessions(&self, user_id: UserId) -> Result<Vec<VoiceSession>, StoreError> {
        let mut sessions: Vec<VoiceSession> = self
            .rows
            .read()
            .values()
            .filter_map(|users| users.get(&user_id).cloned())
            .collect();
        sessions.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn session(channel: &str, user: UserId) -> VoiceSession {
        VoiceSession::new(channel, user, Utc::now())
    }

    #[tokio::test]
    async fn test_replace_keeps_one_row_per_user() {
        let store = MemoryVoiceStore::new();
        let user = Uuid::new_v4();

        assert!(store
            .replace_user_session(session("v1", user))
            .await
            .unwrap()
            .is_empty());
        let removed = store.replace_user_session(session("v2", user)).await.unwrap();
        assert_eq!(removed, vec!["v1".to_string()]);

        let rows = store.user_sessions(user).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id, "v2");
        assert!(store.channel_sessions("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_same_channel_reports_it() {
        let store = MemoryVoiceStore::new();
        let user = Uuid::new_v4();
        store.replace_user_session(session("v1", user)).await.unwrap();
        let removed = store.replace_user_session(session("v1", user)).await.unwrap();
        assert_eq!(removed, vec!["v1".to_string()]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_update() {
        let store = MemoryVoiceStore::new();
        let user = Uuid::new_v4();
        store.replace_user_session(session("v1", user)).await.unwrap();

        let updated = store
            .update("v1", user, VoiceStateChange::self_state(Some(true), Some(true)))
            .await
            .unwrap()
            .unwrap();
        assert!(updated.is_self_muted && updated.is_self_deafened);
        assert!(store
            .update("v2", user, VoiceStateChange::server_mute(true))
            .await
            .unwrap()
            .is_none());

        assert!(!store.remove("v2", user).await.unwrap());
        assert!(store.remove("v1", user).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove_user_returns_channels() {
        let store = MemoryVoiceStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.replace_user_session(session("v1", alice)).await.unwrap();
        store.replace_user_session(session("v1", bob)).await.unwrap();

        assert_eq!(store.remove_user(alice).await.unwrap(), vec!["v1".to_string()]);
        assert!(store.remove_user(alice).await.unwrap().is_empty());
        assert_eq!(store.channel_sessions("v1").await.unwrap().len(), 1);
    }
}
