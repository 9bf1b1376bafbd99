//! Bearer token held for the lifetime of the process and mirrored to the
//! local cache so it survives restarts.

use crate::cache::CacheKey;
use crate::runtime::CacheStore;
use std::sync::{Arc, RwLock};

pub struct AuthSession {
    token: RwLock<Option<String>>,
    cache: Arc<dyn CacheStore>,
}

impl AuthSession {
    /// Restore the persisted token, letting an explicit override win
    pub async fn load(cache: Arc<dyn CacheStore>, override_token: Option<String>) -> Self {
        let token = match override_token {
            Some(t) => Some(t),
            None => cache.load_text(&CacheKey::AuthToken).await,
        };
        Self {
            token: RwLock::new(token.filter(|t| !t.is_empty())),
            cache,
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().unwrap().is_some()
    }

    pub async fn store(&self, token: String) {
        *self.token.write().unwrap() = Some(token.clone());
        if let Err(e) = self.cache.save_text(&CacheKey::AuthToken, &token).await {
            tracing::warn!(error = %e, "Failed to persist auth token");
        }
    }

    /// Discard the token after the backend rejected it
    pub async fn clear(&self) {
        let had_token = self.token.write().unwrap().take().is_some();
        if had_token {
            tracing::info!("Discarding rejected auth token");
        }
        if let Err(e) = self.cache.remove(&CacheKey::AuthToken).await {
            tracing::warn!(error = %e, "Failed to remove persisted auth token");
        }
    }
}
