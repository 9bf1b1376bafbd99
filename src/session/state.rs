//! Turn state and the context transitions read from

use crate::gateway::VoiceOptions;
use crate::model::{Attachment, Message, Quality, ToolDirective};
use chrono::{DateTime, Utc};

/// Input channel a turn came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Voice,
    File,
}

/// The single outstanding turn. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub modality: Modality,
    /// Effective prompt sent to the backend
    pub prompt: String,
    pub attachment: Option<Attachment>,
    pub tool: Option<ToolDirective>,
    /// Position of the provisional user message. `None` for regenerate and
    /// continue, which append no user message.
    pub user_index: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TurnState {
    #[default]
    Idle,
    AwaitingReply {
        pending: PendingTurn,
    },
}

impl TurnState {
    pub fn is_busy(&self) -> bool {
        matches!(self, TurnState::AwaitingReply { .. })
    }

    pub fn pending(&self) -> Option<&PendingTurn> {
        match self {
            TurnState::Idle => None,
            TurnState::AwaitingReply { pending } => Some(pending),
        }
    }
}

/// Toggles that parameterize the next turn. They describe "now", so
/// regenerate and continue read the current values, not historical ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Toggles {
    pub quality: Quality,
    pub web_search: bool,
    pub voice_replies: bool,
}

/// Read-only view of the session a transition needs
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub conversation_id: Option<&'a str>,
    pub user_key: &'a str,
    pub toggles: Toggles,
    /// File currently attached to the composer
    pub attachment: Option<&'a Attachment>,
    pub voice: &'a VoiceOptions,
    pub messages: &'a [Message],
    pub now: DateTime<Utc>,
}
