//! Events that drive the turn machine

use crate::gateway::{GatewayError, Reply};
use crate::model::Attachment;

/// One user submission, by shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    Text { text: String },
    File { text: String, attachment: Attachment },
    Voice { transcript: String },
}

#[derive(Debug, Clone)]
pub enum Event {
    // User actions
    Submit { input: TurnInput },
    Regenerate { at: usize },
    Continue,

    // Gateway outcomes
    ReplyReceived { reply: Reply },
    ReplyFailed { error: GatewayError },
}
