//! Pure state transition function

use super::{Effect, Event, Modality, PendingTurn, TurnContext, TurnInput, TurnOutcome, TurnState};
use crate::gateway::{FileAsk, GatewayErrorKind, TextTurn, TurnOptions, TurnRequest, VoiceTurn};
use crate::model::{Attachment, DeliveryStatus, Message, ToolDirective};
use thiserror::Error;

/// Prompt sent to ask the model to extend its previous answer
pub const CONTINUE_PROMPT: &str = "Continue";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Still waiting for the previous reply")]
    Busy,
    #[error("Nothing to send")]
    EmptyPrompt,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs.
pub fn transition(
    state: &TurnState,
    ctx: &TurnContext<'_>,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // One turn at a time
        (
            TurnState::AwaitingReply { .. },
            Event::Submit { .. } | Event::Regenerate { .. } | Event::Continue,
        ) => Err(TransitionError::Busy),

        (TurnState::Idle, Event::Submit { input }) => {
            let pending = plan_submission(ctx, input)?;
            let request = build_request(ctx, &pending);
            let user_message = Message::user(pending.prompt.clone(), ctx.now);
            Ok(TransitionResult::new(TurnState::AwaitingReply { pending })
                .with_effect(Effect::AppendMessage {
                    message: user_message,
                })
                .with_effect(Effect::DispatchRequest { request }))
        }

        (TurnState::Idle, Event::Regenerate { at }) => {
            match previous_user_prompt(ctx.messages, at) {
                Some(prompt) => Ok(resubmit(ctx, prompt.to_string())),
                None => Ok(TransitionResult::new(TurnState::Idle)),
            }
        }

        (TurnState::Idle, Event::Continue) => Ok(resubmit(ctx, CONTINUE_PROMPT.to_string())),

        (TurnState::AwaitingReply { pending }, Event::ReplyReceived { reply }) => {
            let mut result = TransitionResult::new(TurnState::Idle);
            if let Some(id) = reply.conversation_id.filter(|id| !id.is_empty()) {
                if ctx.conversation_id != Some(id.as_str()) {
                    result = result.with_effect(Effect::AdoptConversation { id });
                }
            }
            if let Some(index) = pending.user_index {
                result = result.with_effect(Effect::FinalizeUserMessage {
                    index,
                    status: None,
                });
            }
            result = result
                .with_effect(Effect::AppendMessage {
                    message: Message::assistant(reply.text, ctx.now),
                })
                .with_effect(Effect::RecordMeta { meta: reply.meta });
            if pending.modality == Modality::Voice {
                if let Some(clip) = reply.audio {
                    result = result.with_effect(Effect::PlayAudio { clip });
                }
            }
            Ok(result.with_effects([
                Effect::RefreshConversations,
                Effect::NotifyTurnFinished {
                    outcome: TurnOutcome::Replied,
                },
            ]))
        }

        (TurnState::AwaitingReply { pending }, Event::ReplyFailed { error }) => {
            let mut result = TransitionResult::new(TurnState::Idle);
            if let Some(index) = pending.user_index {
                result = result.with_effect(Effect::FinalizeUserMessage {
                    index,
                    status: Some(DeliveryStatus::Failed),
                });
            }
            result = result.with_effect(Effect::AppendMessage {
                message: Message::assistant(format!("Error: {}", error.message), ctx.now),
            });
            if error.kind == GatewayErrorKind::Unauthorized {
                result = result.with_effect(Effect::RequireLogin);
            }
            Ok(result.with_effects([
                Effect::RefreshConversations,
                Effect::NotifyTurnFinished {
                    outcome: TurnOutcome::Failed,
                },
            ]))
        }

        (TurnState::Idle, event @ (Event::ReplyReceived { .. } | Event::ReplyFailed { .. })) => {
            Err(TransitionError::InvalidTransition(format!(
                "{event:?} with no turn outstanding"
            )))
        }
    }
}

/// Validate a submission and decide its effective prompt and attachment.
///
/// A file attached to the composer applies to text and voice input too.
fn plan_submission(ctx: &TurnContext<'_>, input: TurnInput) -> Result<PendingTurn, TransitionError> {
    let (modality, text, attachment) = match input {
        TurnInput::Text { text } => (Modality::Text, text, ctx.attachment.cloned()),
        TurnInput::File { text, attachment } => (Modality::File, text, Some(attachment)),
        TurnInput::Voice { transcript } => (Modality::Voice, transcript, ctx.attachment.cloned()),
    };

    let text = text.trim();
    let prompt = match (&attachment, text.is_empty()) {
        (_, false) => text.to_string(),
        // Spoken input with nothing recognized is never sent
        (Some(file), true) if modality != Modality::Voice => file.default_prompt().to_string(),
        _ => return Err(TransitionError::EmptyPrompt),
    };

    let tool = attachment
        .is_none()
        .then(|| ToolDirective::new(ctx.toggles.web_search, prompt.clone()));

    Ok(PendingTurn {
        modality,
        prompt,
        attachment,
        tool,
        user_index: Some(ctx.messages.len()),
    })
}

/// Regenerate and continue: no user message, current toggles, and the
/// composer attachment if there is one.
fn resubmit(ctx: &TurnContext<'_>, prompt: String) -> TransitionResult {
    let attachment = ctx.attachment.cloned();
    let (modality, tool) = match attachment {
        Some(_) => (Modality::File, None),
        None => (
            Modality::Text,
            Some(ToolDirective::new(ctx.toggles.web_search, prompt.clone())),
        ),
    };
    let pending = PendingTurn {
        modality,
        prompt,
        attachment,
        tool,
        user_index: None,
    };
    let request = build_request(ctx, &pending);
    TransitionResult::new(TurnState::AwaitingReply { pending })
        .with_effect(Effect::DispatchRequest { request })
}

/// Choose the gateway call: attached file, then spoken reply, then text
fn build_request(ctx: &TurnContext<'_>, pending: &PendingTurn) -> TurnRequest {
    let options = TurnOptions {
        quality: ctx.toggles.quality,
        conversation_id: ctx.conversation_id.map(ToString::to_string),
        user_key: Some(ctx.user_key.to_string()),
    };

    if let Some(attachment) = &pending.attachment {
        return TurnRequest::FileAsk(file_ask(attachment, &pending.prompt, options));
    }

    let turn = TextTurn {
        prompt: pending.prompt.clone(),
        options,
        tool: pending.tool.clone(),
    };
    if pending.modality == Modality::Voice && ctx.toggles.voice_replies {
        TurnRequest::Voice(VoiceTurn {
            turn,
            voice: ctx.voice.clone(),
        })
    } else {
        TurnRequest::Text(turn)
    }
}

fn file_ask(attachment: &Attachment, prompt: &str, options: TurnOptions) -> FileAsk {
    FileAsk {
        attachment: attachment.clone(),
        prompt: Some(prompt.to_string()),
        options,
    }
}

/// Nearest user message strictly before `at` (clamped to the sequence)
pub fn previous_user_prompt(messages: &[Message], at: usize) -> Option<&str> {
    let end = at.min(messages.len());
    messages[..end]
        .iter()
        .rev()
        .find(|m| m.is_user())
        .map(|m| m.content.as_str())
}
