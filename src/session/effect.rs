//! Effects produced by turn transitions

use crate::gateway::{AudioClip, TurnRequest};
use crate::model::{DeliveryStatus, Message, ReplyMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Replied,
    Failed,
}

/// Effects to be executed after a transition, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append to the active sequence (and write the cache snapshot)
    AppendMessage { message: Message },

    /// Settle the provisional user message
    FinalizeUserMessage {
        index: usize,
        status: Option<DeliveryStatus>,
    },

    /// Take the identifier the backend assigned to this conversation
    AdoptConversation { id: String },

    RecordMeta { meta: ReplyMeta },

    /// Issue the turn's single gateway call
    DispatchRequest { request: TurnRequest },

    /// Best effort; playback failures are swallowed
    PlayAudio { clip: AudioClip },

    /// Best effort list refresh
    RefreshConversations,

    /// The backend rejected our credentials
    RequireLogin,

    NotifyTurnFinished { outcome: TurnOutcome },
}
