//! Conversation data model
//!
//! Types shared by the turn machine, the conversation store, the cache and
//! the gateway. Everything here is plain data with serde derives so the same
//! shapes can be written to the local cache unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Transient delivery marker on a user message.
///
/// `Sent` is the provisional state while the reply is outstanding. A
/// finalized message carries no status; a turn that failed keeps `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// A single entry in a conversation's message sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
}

impl Message {
    /// Provisional user message, marked `Sent` until the turn resolves
    pub fn user(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at,
            status: Some(DeliveryStatus::Sent),
        }
    }

    pub fn assistant(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at,
            status: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Entry in the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    /// Server-formatted timestamp, kept verbatim for ordering and display
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_title() -> String {
    "Untitled".to_string()
}

/// Model metadata from the most recent reply, kept for display only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMeta {
    pub model: String,
    pub quality: String,
}

/// Requested answer quality. `Auto` leaves the choice to the backend and is
/// never put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Auto,
    Low,
    Medium,
    High,
}

impl Quality {
    /// Wire value, `None` for `Auto`
    pub fn as_param(self) -> Option<&'static str> {
        match self {
            Quality::Auto => None,
            Quality::Low => Some("low"),
            Quality::Medium => Some("medium"),
            Quality::High => Some("high"),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param().unwrap_or("auto"))
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Quality::Auto),
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(format!("unknown quality '{other}' (auto|low|medium|high)")),
        }
    }
}

/// Backend retrieval strategy requested alongside a text turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    RagSearch,
    WebSearch,
}

impl ToolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::RagSearch => "rag_search",
            ToolKind::WebSearch => "web_search",
        }
    }
}

/// Result count every tool directive asks for
pub const TOOL_TOP_K: u32 = 5;

/// Tool selection plus its arguments for one text turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDirective {
    pub kind: ToolKind,
    pub query: String,
    pub k: u32,
}

impl ToolDirective {
    pub fn new(web_search: bool, query: impl Into<String>) -> Self {
        Self {
            kind: if web_search {
                ToolKind::WebSearch
            } else {
                ToolKind::RagSearch
            },
            query: query.into(),
            k: TOOL_TOP_K,
        }
    }
}

/// A local file attached to upcoming turns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub file_name: String,
    pub mime: String,
}

impl Attachment {
    /// Describe a local file, guessing its content type from the extension
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
        let mime = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            path,
            file_name,
            mime,
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.mime == "application/pdf"
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    /// Prompt used when a file is sent without any text
    pub fn default_prompt(&self) -> &'static str {
        if self.is_image() {
            "Summarize this image"
        } else if self.is_pdf() {
            "Summarize this PDF"
        } else {
            "Summarize this document"
        }
    }
}
