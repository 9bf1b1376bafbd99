//! Conversation state store
//!
//! Single in-memory source of truth for the conversation list and the active
//! conversation's messages, reconciled against the gateway and the cache.
//! The active identifier and the message sequence are always changed
//! together, and every change to the sequence is written to the cache before
//! the method returns.

use crate::gateway::{Gateway, GatewayError};
use crate::model::{ConversationSummary, DeliveryStatus, Message, ReplyMeta};
use crate::runtime::CacheStore;
use std::sync::Arc;

/// Where `select_conversation` found the history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySource {
    Remote,
    Cache,
    Empty,
}

/// Where `refresh_conversations` took the list from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    Remote,
    Cache,
    /// Remote and cache both empty
    Empty,
    /// Remote failed and nothing was cached; the list was left alone
    Unchanged,
}

pub struct ConversationStore<G: Gateway, C: CacheStore> {
    gateway: Arc<G>,
    cache: Arc<C>,
    conversations: Vec<ConversationSummary>,
    active_id: Option<String>,
    messages: Vec<Message>,
    last_meta: Option<ReplyMeta>,
    list_source: ListSource,
    /// Set when the backend rejected the token since the last `take_auth_rejected`
    auth_rejected: bool,
}

impl<G: Gateway, C: CacheStore> ConversationStore<G, C> {
    pub fn new(gateway: Arc<G>, cache: Arc<C>) -> Self {
        Self {
            gateway,
            cache,
            conversations: Vec::new(),
            active_id: None,
            messages: Vec::new(),
            last_meta: None,
            list_source: ListSource::Empty,
            auth_rejected: false,
        }
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_meta(&self) -> Option<&ReplyMeta> {
        self.last_meta.as_ref()
    }

    /// Where the current list came from
    pub fn list_source(&self) -> ListSource {
        self.list_source
    }

    /// Whether a gateway call made by the store came back unauthorized.
    /// Reading the flag clears it.
    pub fn take_auth_rejected(&mut self) -> bool {
        std::mem::take(&mut self.auth_rejected)
    }

    fn note_failure(&mut self, e: &GatewayError) {
        if e.is_unauthorized() {
            self.auth_rejected = true;
        }
    }

    /// Show cached state before the backend has answered: the cached list,
    /// and the last-active conversation if it has a non-empty snapshot.
    pub async fn hydrate(&mut self) {
        self.conversations = self.cache.load_conversation_list().await;
        if !self.conversations.is_empty() {
            self.list_source = ListSource::Cache;
        }
        if let Some(id) = self.cache.load_last_active().await {
            let messages = self.cache.load_messages(&id).await;
            if !messages.is_empty() {
                tracing::info!(conv_id = %id, count = messages.len(), "Restored last conversation from cache");
                self.active_id = Some(id);
                self.messages = messages;
            }
        }
    }

    /// Make `id` active, preferring the backend's history and falling back to
    /// the cached snapshot. The identifier is set even when both are empty.
    pub async fn select_conversation(&mut self, id: &str) -> HistorySource {
        let remote = match self.gateway.get_conversation(id).await {
            Ok(detail) => detail.messages,
            Err(e) => {
                tracing::warn!(conv_id = %id, error = %e, "Falling back to cached history");
                self.note_failure(&e);
                Vec::new()
            }
        };

        let (messages, source) = if remote.is_empty() {
            let cached = self.cache.load_messages(id).await;
            if cached.is_empty() {
                (cached, HistorySource::Empty)
            } else {
                (cached, HistorySource::Cache)
            }
        } else {
            (remote, HistorySource::Remote)
        };

        self.active_id = Some(id.to_string());
        self.messages = messages;
        self.last_meta = None;
        self.persist_messages().await;
        self.persist_last_active().await;
        source
    }

    /// Clear the active conversation. The next successful turn obtains a
    /// fresh identifier from the backend.
    pub async fn start_new_conversation(&mut self) {
        self.active_id = None;
        self.messages.clear();
        self.last_meta = None;
        self.persist_last_active().await;
    }

    /// Delete remotely, then purge the local copy regardless of the outcome
    /// and refresh the list. The gateway result is returned for reporting.
    pub async fn delete_conversation(&mut self, id: &str) -> Result<(), GatewayError> {
        let result = self.gateway.delete_conversation(id).await;
        if let Err(e) = &result {
            self.note_failure(e);
        }

        if result.is_ok() && self.active_id.as_deref() == Some(id) {
            self.active_id = None;
            self.messages.clear();
            self.last_meta = None;
            self.persist_last_active().await;
        }

        if let Err(e) = self.cache.remove_messages(id).await {
            tracing::warn!(conv_id = %id, error = %e, "Failed to purge cached messages");
        }
        let mut cached = self.cache.load_conversation_list().await;
        cached.retain(|c| c.id != id);
        if let Err(e) = self.cache.save_conversation_list(&cached).await {
            tracing::warn!(error = %e, "Failed to update cached conversation list");
        }
        if self.cache.load_last_active().await.as_deref() == Some(id) {
            if let Err(e) = self.cache.save_last_active(None).await {
                tracing::warn!(error = %e, "Failed to clear last-active pointer");
            }
        }
        self.conversations.retain(|c| c.id != id);

        self.refresh_conversations().await;
        result
    }

    /// Reload the list. A non-empty cache beats an empty or failed remote.
    pub async fn refresh_conversations(&mut self) -> ListSource {
        let source = self.reload_list().await;
        self.list_source = source;
        source
    }

    async fn reload_list(&mut self) -> ListSource {
        let remote = self.gateway.list_conversations().await;
        if let Err(e) = &remote {
            self.note_failure(e);
        }

        if let Ok(list) = &remote {
            if !list.is_empty() {
                self.conversations.clone_from(list);
                if let Err(e) = self.cache.save_conversation_list(list).await {
                    tracing::warn!(error = %e, "Failed to cache conversation list");
                }
                return ListSource::Remote;
            }
        }

        let cached = self.cache.load_conversation_list().await;
        if !cached.is_empty() {
            tracing::debug!(count = cached.len(), "Using cached conversation list");
            self.conversations = cached;
            return ListSource::Cache;
        }

        match remote {
            Ok(_) => {
                self.conversations.clear();
                ListSource::Empty
            }
            Err(e) => {
                tracing::warn!(error = %e, "Conversation list unavailable");
                ListSource::Unchanged
            }
        }
    }

    pub async fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.persist_messages().await;
    }

    /// Settle a provisional message. Returns false when `index` is stale.
    pub async fn set_status(&mut self, index: usize, status: Option<DeliveryStatus>) -> bool {
        let Some(message) = self.messages.get_mut(index) else {
            return false;
        };
        message.status = status;
        self.persist_messages().await;
        true
    }

    /// Take the identifier the backend assigned after the first turn
    pub async fn adopt_conversation(&mut self, id: String) {
        tracing::info!(conv_id = %id, "Conversation identifier assigned");
        self.active_id = Some(id);
        self.persist_messages().await;
        self.persist_last_active().await;
    }

    pub fn record_meta(&mut self, meta: ReplyMeta) {
        self.last_meta = Some(meta);
    }

    async fn persist_messages(&self) {
        let Some(id) = &self.active_id else {
            return;
        };
        if let Err(e) = self.cache.save_messages(id, &self.messages).await {
            tracing::warn!(conv_id = %id, error = %e, "Failed to cache messages");
        }
    }

    async fn persist_last_active(&self) {
        if let Err(e) = self.cache.save_last_active(self.active_id.as_deref()).await {
            tracing::warn!(error = %e, "Failed to record last-active conversation");
        }
    }
}

/// Conversations whose title contains `query`, case-insensitively, with
/// their 1-based position in `conversations`
pub fn search<'a>(
    conversations: &'a [ConversationSummary],
    query: &str,
) -> Vec<(usize, &'a ConversationSummary)> {
    let needle = query.trim().to_lowercase();
    conversations
        .iter()
        .enumerate()
        .filter(|(_, c)| needle.is_empty() || c.title.to_lowercase().contains(&needle))
        .map(|(i, c)| (i + 1, c))
        .collect()
}
