//! Session runtime
//!
//! One task owns all conversation state. Front ends talk to it through a
//! command channel and observe it through a broadcast of `UiEvent`s.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::gateway::{GatewayError, IngestReport, LoggingGateway, Reply};
use crate::model::{Attachment, ConversationSummary, Message, Quality, ReplyMeta};
use crate::preferences::Preferences;
use crate::session::{Toggles, TurnInput, TurnOutcome};
use crate::speech::CommandSpeech;
use crate::store::ListSource;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Runtime wired to the real backend, the SQLite cache and helper programs
pub type ProductionRuntime = SessionRuntime<LoggingGateway, SqliteCache, CommandSpeech>;

/// Requests accepted by the runtime
#[derive(Debug)]
pub enum Command {
    // Turns
    Submit(TurnInput),
    /// Resubmit the user prompt before `at`; `None` means the end of the
    /// conversation
    Regenerate { at: Option<usize> },
    Continue,

    // Conversations
    Select { id: String },
    NewConversation,
    Delete { id: String },
    Refresh,

    // Toggles and preferences
    SetQuality(Quality),
    SetWebSearch(bool),
    SetVoiceReplies(bool),
    SetDraft(String),
    AddQuickPrompt(String),
    RemoveQuickPrompt(usize),

    // Attachments and voice
    Attach { path: PathBuf },
    Detach,
    StartVoice,
    StopVoice,

    // Backend
    Login { passcode: String },
    CheckHealth,

    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,

    // Completions posted back by tasks the runtime spawned
    TurnCompleted(Result<Reply, GatewayError>),
    Transcript(String),
    CaptureEnded,
    IngestCompleted {
        file_name: String,
        result: Result<IngestReport, GatewayError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendHealth {
    Checking,
    Up,
    Down,
}

/// Events published to front ends
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Startup hydration and first refresh are done
    Ready,
    MessageAppended {
        index: usize,
        message: Message,
    },
    MessageUpdated {
        index: usize,
        message: Message,
    },
    /// The active conversation was replaced wholesale
    ConversationChanged {
        id: Option<String>,
        messages: Vec<Message>,
    },
    ConversationAdopted {
        id: String,
    },
    ConversationsUpdated {
        conversations: Vec<ConversationSummary>,
        source: ListSource,
    },
    TurnStarted {
        kind: &'static str,
    },
    TurnFinished {
        outcome: TurnOutcome,
    },
    MetaUpdated(ReplyMeta),
    AttachmentChanged(Option<Attachment>),
    Listening(bool),
    BackendStatus(BackendHealth),
    LoginRequired,
    Notice {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Point-in-time copy of the session for rendering
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub active_id: Option<String>,
    pub messages: Vec<Message>,
    pub conversations: Vec<ConversationSummary>,
    pub toggles: Toggles,
    pub attachment: Option<Attachment>,
    pub preferences: Preferences,
    pub last_meta: Option<ReplyMeta>,
    pub busy: bool,
    pub capturing: bool,
    pub backend: BackendHealth,
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub command_tx: mpsc::Sender<Command>,
    pub broadcast_tx: broadcast::Sender<UiEvent>,
}

impl SessionHandle {
    /// Returns false once the runtime has stopped
    pub async fn send(&self, command: Command) -> bool {
        self.command_tx.send(command).await.is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.broadcast_tx.subscribe()
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Snapshot(tx)).await {
            return None;
        }
        rx.await.ok()
    }
}
