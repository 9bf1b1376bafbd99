//! Client configuration from the environment

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    /// Shell command that records speech and prints a transcript
    pub capture_command: Option<String>,
    /// Shell command that plays the audio file passed as its last argument
    pub player_command: Option<String>,
    /// Bearer token that takes precedence over the persisted one
    pub token_override: Option<String>,
    pub voice_id: Option<String>,
    pub tts_model: Option<String>,
    pub tts_output: Option<String>,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let data_dir = non_empty("RELAYCHAT_DATA_DIR").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".relaychat")
            },
            PathBuf::from,
        );

        let request_timeout = non_empty("RELAYCHAT_REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS), Duration::from_secs);

        Self {
            backend_url: non_empty("RELAYCHAT_BACKEND_URL")
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            data_dir,
            request_timeout,
            capture_command: non_empty("RELAYCHAT_STT_COMMAND"),
            player_command: non_empty("RELAYCHAT_PLAYER_COMMAND"),
            token_override: non_empty("RELAYCHAT_TOKEN"),
            voice_id: non_empty("RELAYCHAT_VOICE_ID"),
            tts_model: non_empty("RELAYCHAT_TTS_MODEL"),
            tts_output: non_empty("RELAYCHAT_TTS_OUTPUT"),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }
}
