//! Request and reply types for backend calls
//!
//! The first half holds the shapes the rest of the crate works with; the
//! second half holds the JSON bodies exactly as the backend sends them.

use crate::model::{Attachment, ConversationSummary, Message, Quality, ReplyMeta, Role, ToolDirective};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields common to every turn-producing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOptions {
    pub quality: Quality,
    pub conversation_id: Option<String>,
    pub user_key: Option<String>,
}

/// Plain text turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTurn {
    pub prompt: String,
    pub options: TurnOptions,
    pub tool: Option<ToolDirective>,
}

/// Speech synthesis knobs for voice replies; all optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceOptions {
    pub voice_id: Option<String>,
    pub tts_model: Option<String>,
    pub tts_output: Option<String>,
}

/// Text turn whose reply is also spoken back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceTurn {
    pub turn: TextTurn,
    pub voice: VoiceOptions,
}

/// Question grounded on an uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAsk {
    pub attachment: Attachment,
    pub prompt: Option<String>,
    pub options: TurnOptions,
}

/// The single outbound call a turn produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnRequest {
    Text(TextTurn),
    Voice(VoiceTurn),
    FileAsk(FileAsk),
}

impl TurnRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnRequest::Text(_) => "text",
            TurnRequest::Voice(_) => "voice",
            TurnRequest::FileAsk(_) => "file_ask",
        }
    }

    /// Prompt text carried by the request, if any
    pub fn prompt(&self) -> Option<&str> {
        match self {
            TurnRequest::Text(t) => Some(&t.prompt),
            TurnRequest::Voice(v) => Some(&v.turn.prompt),
            TurnRequest::FileAsk(f) => f.prompt.as_deref(),
        }
    }
}

/// Synthesized speech returned with a voice reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Normalized reply for any of the three turn calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub conversation_id: Option<String>,
    pub meta: ReplyMeta,
    pub audio: Option<AudioClip>,
}

/// Full history of one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDetail {
    pub id: String,
    pub title: Option<String>,
    pub messages: Vec<Message>,
}

/// Outcome of a knowledge-base ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub chunks: u64,
    pub doc_id: Option<String>,
}

/// A successful login. The token itself stays inside the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub expires_at: Option<String>,
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct ToolArgsBody<'a> {
    pub query: &'a str,
    pub k: u32,
}

/// Body for `POST /chat` and `POST /chat/voice`
#[derive(Debug, Serialize)]
pub(crate) struct ChatBody<'a> {
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<ToolArgsBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_output: Option<&'a str>,
}

impl<'a> ChatBody<'a> {
    pub fn text(turn: &'a TextTurn) -> Self {
        let (tool, tool_args) = match &turn.tool {
            Some(t) => (
                Some(t.kind.as_str()),
                Some(ToolArgsBody {
                    query: &t.query,
                    k: t.k,
                }),
            ),
            None => (None, None),
        };
        Self {
            message: &turn.prompt,
            quality: turn.options.quality.as_param(),
            conversation_id: turn.options.conversation_id.as_deref(),
            user_key: turn.options.user_key.as_deref(),
            tool,
            tool_args,
            voice_id: None,
            tts_model: None,
            tts_output: None,
        }
    }

    pub fn voice(turn: &'a VoiceTurn) -> Self {
        Self {
            voice_id: turn.voice.voice_id.as_deref(),
            tts_model: turn.voice.tts_model.as_deref(),
            tts_output: turn.voice.tts_output.as_deref(),
            ..Self::text(&turn.turn)
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub reply: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub audio_base64: Option<String>,
    #[serde(default)]
    pub audio_mime: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileAskResponse {
    pub answer: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub quality: String,
}

impl From<FileAskResponse> for Reply {
    fn from(r: FileAskResponse) -> Self {
        Reply {
            text: r.answer,
            conversation_id: r.conversation_id,
            meta: ReplyMeta {
                model: r.model,
                quality: r.quality,
            },
            audio: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationResponse {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

impl From<ConversationResponse> for ConversationDetail {
    fn from(r: ConversationResponse) -> Self {
        let messages = r
            .messages
            .into_iter()
            .map(|m| Message {
                role: m.role,
                content: m.content,
                created_at: m
                    .created_at
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or_else(Utc::now),
                status: None,
            })
            .collect();
        ConversationDetail {
            id: r.id,
            title: r.title,
            messages,
        }
    }
}

pub(crate) type ConversationListResponse = Vec<ConversationSummary>;

#[derive(Debug, Deserialize)]
pub(crate) struct IngestResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub chunks: u64,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginBody<'a> {
    pub passcode: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ok: Option<bool>,
}

/// Parse a backend timestamp. The backend emits naive UTC ISO strings;
/// RFC 3339 with an offset is accepted too.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
