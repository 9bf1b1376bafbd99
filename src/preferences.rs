//! Per-installation preferences
//!
//! Loaded once at startup, then written back to the cache on every change.

use crate::cache::CacheKey;
use crate::runtime::CacheStore;
use rand::distributions::Alphanumeric;
use rand::Rng;

pub const DEFAULT_QUICK_PROMPTS: [&str; 5] = [
    "Summarize this",
    "Make bullet points",
    "Translate to Hindi",
    "Write an outline",
    "Make it shorter",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    /// Stable identifier sent with every turn; generated once, never rotated
    pub user_key: String,
    /// Unsent input, restored on the next start
    pub draft: String,
    pub quick_prompts: Vec<String>,
    /// Ask for spoken replies to voice turns
    pub voice_replies: bool,
}

impl Preferences {
    pub async fn load<C: CacheStore + ?Sized>(cache: &C) -> Self {
        let user_key = match cache.load_text(&CacheKey::UserKey).await {
            Some(key) if !key.is_empty() => key,
            _ => {
                let key = generate_user_key();
                tracing::info!(user_key = %key, "Generated new user key");
                persist(cache.save_text(&CacheKey::UserKey, &key).await, "user key");
                key
            }
        };

        Self {
            user_key,
            draft: cache.load_text(&CacheKey::Draft).await.unwrap_or_default(),
            quick_prompts: cache
                .load_list(&CacheKey::QuickPrompts)
                .await
                .unwrap_or_else(|| DEFAULT_QUICK_PROMPTS.iter().map(ToString::to_string).collect()),
            voice_replies: cache
                .load_flag(&CacheKey::VoiceReplies)
                .await
                .unwrap_or(false),
        }
    }

    pub async fn set_draft<C: CacheStore + ?Sized>(&mut self, cache: &C, draft: &str) {
        draft.clone_into(&mut self.draft);
        let result = if draft.is_empty() {
            cache.remove(&CacheKey::Draft).await
        } else {
            cache.save_text(&CacheKey::Draft, draft).await
        };
        persist(result, "draft");
    }

    pub async fn set_voice_replies<C: CacheStore + ?Sized>(&mut self, cache: &C, enabled: bool) {
        self.voice_replies = enabled;
        persist(
            cache.save_flag(&CacheKey::VoiceReplies, enabled).await,
            "voice reply flag",
        );
    }

    /// Append a quick prompt; blank or duplicate prompts are ignored
    pub async fn add_quick_prompt<C: CacheStore + ?Sized>(&mut self, cache: &C, prompt: &str) -> bool {
        let prompt = prompt.trim();
        if prompt.is_empty() || self.quick_prompts.iter().any(|p| p == prompt) {
            return false;
        }
        self.quick_prompts.push(prompt.to_string());
        self.save_quick_prompts(cache).await;
        true
    }

    pub async fn remove_quick_prompt<C: CacheStore + ?Sized>(
        &mut self,
        cache: &C,
        index: usize,
    ) -> Option<String> {
        if index >= self.quick_prompts.len() {
            return None;
        }
        let removed = self.quick_prompts.remove(index);
        self.save_quick_prompts(cache).await;
        Some(removed)
    }

    async fn save_quick_prompts<C: CacheStore + ?Sized>(&self, cache: &C) {
        persist(
            cache
                .save_list(&CacheKey::QuickPrompts, &self.quick_prompts)
                .await,
            "quick prompts",
        );
    }
}

fn generate_user_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("u-{suffix}")
}

fn persist(result: crate::cache::CacheResult<()>, what: &str) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "Failed to persist {what}");
    }
}
