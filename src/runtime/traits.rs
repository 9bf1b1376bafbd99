//! Trait abstractions for runtime I/O
//!
//! The gateway and speech seams live next to their implementations; the
//! cache seam lives here with its production adapter.

use crate::cache::{CacheDb, CacheKey, CacheResult};
use crate::model::{ConversationSummary, Message};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Durable key/value storage for the conversation list, per-conversation
/// message snapshots, the last-active pointer and preferences.
///
/// Loads never fail: an unreadable or corrupt entry is logged and treated
/// as absent. Saves report errors so callers can log them.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load_raw(&self, key: &CacheKey) -> CacheResult<Option<String>>;

    async fn save_raw(&self, key: &CacheKey, value: String) -> CacheResult<()>;

    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    async fn save_conversation_list(&self, list: &[ConversationSummary]) -> CacheResult<()> {
        let json = serde_json::to_string(list)?;
        self.save_raw(&CacheKey::ConversationList, json).await
    }

    async fn load_conversation_list(&self) -> Vec<ConversationSummary> {
        load_json(self, &CacheKey::ConversationList)
            .await
            .unwrap_or_default()
    }

    async fn save_messages(&self, conv_id: &str, messages: &[Message]) -> CacheResult<()> {
        let json = serde_json::to_string(messages)?;
        self.save_raw(&CacheKey::Messages(conv_id.to_string()), json)
            .await
    }

    async fn load_messages(&self, conv_id: &str) -> Vec<Message> {
        load_json(self, &CacheKey::Messages(conv_id.to_string()))
            .await
            .unwrap_or_default()
    }

    async fn remove_messages(&self, conv_id: &str) -> CacheResult<()> {
        self.remove(&CacheKey::Messages(conv_id.to_string())).await
    }

    /// Record the last-active conversation; `None` clears the pointer
    async fn save_last_active(&self, conv_id: Option<&str>) -> CacheResult<()> {
        match conv_id {
            Some(id) => {
                self.save_raw(&CacheKey::LastActiveConversation, id.to_string())
                    .await
            }
            None => self.remove(&CacheKey::LastActiveConversation).await,
        }
    }

    async fn load_last_active(&self) -> Option<String> {
        self.load_text(&CacheKey::LastActiveConversation)
            .await
            .filter(|id| !id.is_empty())
    }

    async fn load_text(&self, key: &CacheKey) -> Option<String> {
        match self.load_raw(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn save_text(&self, key: &CacheKey, value: &str) -> CacheResult<()> {
        self.save_raw(key, value.to_string()).await
    }

    async fn load_flag(&self, key: &CacheKey) -> Option<bool> {
        load_json(self, key).await
    }

    async fn save_flag(&self, key: &CacheKey, value: bool) -> CacheResult<()> {
        self.save_raw(key, serde_json::to_string(&value)?).await
    }

    async fn load_list(&self, key: &CacheKey) -> Option<Vec<String>> {
        load_json(self, key).await
    }

    async fn save_list(&self, key: &CacheKey, values: &[String]) -> CacheResult<()> {
        self.save_raw(key, serde_json::to_string(values)?).await
    }
}

async fn load_json<S, T>(store: &S, key: &CacheKey) -> Option<T>
where
    S: CacheStore + ?Sized,
    T: DeserializeOwned,
{
    let raw = store.load_text(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Ignoring corrupt cache entry");
            None
        }
    }
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    async fn load_raw(&self, key: &CacheKey) -> CacheResult<Option<String>> {
        (**self).load_raw(key).await
    }

    async fn save_raw(&self, key: &CacheKey, value: String) -> CacheResult<()> {
        (**self).save_raw(key, value).await
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        (**self).remove(key).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use `CacheDb` as a `CacheStore`
#[derive(Clone)]
pub struct SqliteCache {
    db: CacheDb,
}

impl SqliteCache {
    pub fn new(db: CacheDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn load_raw(&self, key: &CacheKey) -> CacheResult<Option<String>> {
        self.db.get(key)
    }

    async fn save_raw(&self, key: &CacheKey, value: String) -> CacheResult<()> {
        self.db.put(key, &value)
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.db.delete(key)
    }
}
