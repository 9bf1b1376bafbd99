//! Cache schema and keys

use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Every entry the client keeps locally. All are optional; absence means
/// "use the default".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ConversationList,
    Messages(String),
    LastActiveConversation,
    UserKey,
    Draft,
    QuickPrompts,
    VoiceReplies,
    AuthToken,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::ConversationList => write!(f, "conversations"),
            CacheKey::Messages(id) => write!(f, "messages:{id}"),
            CacheKey::LastActiveConversation => write!(f, "last_active_conversation"),
            CacheKey::UserKey => write!(f, "user_key"),
            CacheKey::Draft => write!(f, "draft"),
            CacheKey::QuickPrompts => write!(f, "quick_prompts"),
            CacheKey::VoiceReplies => write!(f, "voice_replies"),
            CacheKey::AuthToken => write!(f, "auth_token"),
        }
    }
}
