//! Session runtime executor

use super::traits::CacheStore;
use super::{BackendHealth, Command, SessionHandle, SessionSnapshot, UiEvent};

use crate::gateway::{Gateway, GatewayError, IngestReport, Reply, TurnRequest, VoiceOptions};
use crate::model::{Attachment, Quality};
use crate::preferences::Preferences;
use crate::session::{transition, Effect, Event, Toggles, TurnContext, TurnInput, TurnState};
use crate::speech::SpeechIo;
use crate::store::{ConversationStore, HistorySource, ListSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Interval between backend health checks
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

const COMMAND_CAPACITY: usize = 64;
const BROADCAST_CAPACITY: usize = 256;

/// Owns the session: the conversation store, the turn machine, toggles and
/// preferences. Runs as a single task so state changes never interleave.
pub struct SessionRuntime<G, C, S>
where
    G: Gateway + 'static,
    C: CacheStore + 'static,
    S: SpeechIo + 'static,
{
    store: ConversationStore<G, C>,
    gateway: Arc<G>,
    cache: Arc<C>,
    speech: Arc<S>,
    state: TurnState,
    quality: Quality,
    web_search: bool,
    /// File attached to the composer; stays until detached
    attachment: Option<Attachment>,
    preferences: Preferences,
    voice: VoiceOptions,
    health: BackendHealth,
    health_interval: Duration,
    capturing: bool,
    /// `LoginRequired` already sent while handling the current command
    login_prompted: bool,
    command_rx: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    broadcast_tx: broadcast::Sender<UiEvent>,
}

impl<G, C, S> SessionRuntime<G, C, S>
where
    G: Gateway + 'static,
    C: CacheStore + 'static,
    S: SpeechIo + 'static,
{
    pub fn new(
        gateway: Arc<G>,
        cache: Arc<C>,
        speech: Arc<S>,
        preferences: Preferences,
        voice: VoiceOptions,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let handle = SessionHandle {
            command_tx: command_tx.clone(),
            broadcast_tx: broadcast_tx.clone(),
        };
        let runtime = Self {
            store: ConversationStore::new(gateway.clone(), cache.clone()),
            gateway,
            cache,
            speech,
            state: TurnState::Idle,
            quality: Quality::default(),
            web_search: false,
            attachment: None,
            preferences,
            voice,
            health: BackendHealth::Checking,
            health_interval: HEALTH_INTERVAL,
            capturing: false,
            login_prompted: false,
            command_rx,
            command_tx,
            broadcast_tx,
        };
        (runtime, handle)
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub async fn run(mut self) {
        tracing::info!("Starting session runtime");
        self.start().await;

        let mut health = tokio::time::interval(self.health_interval);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => break,
                        Some(command) => {
                            self.handle(command).await;
                            self.finish_command();
                        }
                    }
                }
                _ = health.tick() => self.check_health().await,
            }
        }

        if self.capturing {
            let _ = self.speech.stop_capture().await;
        }
        tracing::info!("Session runtime stopped");
    }

    /// Cached state first, then the backend
    async fn start(&mut self) {
        self.store.hydrate().await;
        self.publish_conversations(self.store.list_source());
        self.publish_active();

        if let Err(e) = self.gateway.verify_auth().await {
            if e.is_unauthorized() {
                self.require_login();
            }
        }

        let source = self.store.refresh_conversations().await;
        self.publish_conversations(source);
        self.finish_command();
        self.emit(UiEvent::Ready);
    }

    /// Any call the store made with a rejected token sends the user to login,
    /// at most once per command.
    fn finish_command(&mut self) {
        if self.store.take_auth_rejected() {
            self.require_login();
        }
        self.login_prompted = false;
    }

    fn require_login(&mut self) {
        if !self.login_prompted {
            self.login_prompted = true;
            self.emit(UiEvent::LoginRequired);
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(input) => {
                let clears_draft = !matches!(input, TurnInput::Voice { .. });
                if self.apply(Event::Submit { input }).await && clears_draft {
                    self.clear_draft().await;
                }
            }
            Command::Regenerate { at } => {
                let at = at.unwrap_or(self.store.messages().len());
                self.apply(Event::Regenerate { at }).await;
            }
            Command::Continue => {
                self.apply(Event::Continue).await;
            }
            Command::TurnCompleted(Ok(reply)) => {
                self.apply(Event::ReplyReceived { reply }).await;
            }
            Command::TurnCompleted(Err(error)) => {
                self.apply(Event::ReplyFailed { error }).await;
            }

            Command::Select { id } => {
                if self.reject_if_busy() {
                    return;
                }
                let source = self.store.select_conversation(&id).await;
                if source == HistorySource::Empty {
                    tracing::info!(conv_id = %id, "Selected conversation has no history");
                }
                self.publish_active();
            }
            Command::NewConversation => {
                if self.reject_if_busy() {
                    return;
                }
                self.store.start_new_conversation().await;
                self.publish_active();
            }
            Command::Delete { id } => {
                if self.reject_if_busy() {
                    return;
                }
                let was_active = self.store.active_id() == Some(id.as_str());
                let result = self.store.delete_conversation(&id).await;
                if let Err(e) = result {
                    self.emit(UiEvent::Error {
                        message: format!("Delete failed: {}", e.message),
                    });
                }
                if was_active && self.store.active_id().is_none() {
                    self.publish_active();
                }
                self.publish_conversations(self.store.list_source());
            }
            Command::Refresh => {
                let source = self.store.refresh_conversations().await;
                self.publish_conversations(source);
            }

            Command::SetQuality(quality) => self.quality = quality,
            Command::SetWebSearch(enabled) => self.web_search = enabled,
            Command::SetVoiceReplies(enabled) => {
                self.preferences
                    .set_voice_replies(self.cache.as_ref(), enabled)
                    .await;
            }
            Command::SetDraft(draft) => {
                self.preferences.set_draft(self.cache.as_ref(), &draft).await;
            }
            Command::AddQuickPrompt(prompt) => {
                if !self
                    .preferences
                    .add_quick_prompt(self.cache.as_ref(), &prompt)
                    .await
                {
                    self.notice("Quick prompt is empty or already saved");
                }
            }
            Command::RemoveQuickPrompt(index) => {
                if self
                    .preferences
                    .remove_quick_prompt(self.cache.as_ref(), index)
                    .await
                    .is_none()
                {
                    self.notice(format!("No quick prompt #{}", index + 1));
                }
            }

            Command::Attach { path } => self.attach(path).await,
            Command::Detach => {
                if self.attachment.take().is_some() {
                    self.emit(UiEvent::AttachmentChanged(None));
                }
            }
            Command::IngestCompleted { file_name, result } => {
                self.ingest_completed(&file_name, result);
            }
            Command::StartVoice => self.start_voice().await,
            Command::StopVoice => {
                if let Err(e) = self.speech.stop_capture().await {
                    self.notice(e.to_string());
                }
            }
            Command::Transcript(transcript) => {
                self.apply(Event::Submit {
                    input: TurnInput::Voice { transcript },
                })
                .await;
            }
            Command::CaptureEnded => {
                self.capturing = false;
                self.emit(UiEvent::Listening(false));
            }

            Command::Login { passcode } => match self.gateway.login(&passcode).await {
                Ok(grant) => {
                    self.notice(match grant.expires_at {
                        Some(expiry) => format!("Signed in until {expiry}"),
                        None => "Signed in".to_string(),
                    });
                    let source = self.store.refresh_conversations().await;
                    self.publish_conversations(source);
                }
                Err(e) => self.emit(UiEvent::Error {
                    message: format!("Login failed: {}", e.message),
                }),
            },
            Command::CheckHealth => self.check_health().await,

            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    /// Run one event through the turn machine and execute its effects.
    /// Returns false when the event was rejected.
    async fn apply(&mut self, event: Event) -> bool {
        let result = {
            let ctx = TurnContext {
                conversation_id: self.store.active_id(),
                user_key: &self.preferences.user_key,
                toggles: self.toggles(),
                attachment: self.attachment.as_ref(),
                voice: &self.voice,
                messages: self.store.messages(),
                now: chrono::Utc::now(),
            };
            transition(&self.state, &ctx, event)
        };

        match result {
            Ok(result) => {
                self.state = result.new_state;
                for effect in result.effects {
                    self.execute_effect(effect).await;
                }
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Turn event rejected");
                self.emit(UiEvent::Error {
                    message: e.to_string(),
                });
                false
            }
        }
    }

    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::AppendMessage { message } => {
                self.store.append(message.clone()).await;
                let index = self.store.messages().len() - 1;
                self.emit(UiEvent::MessageAppended { index, message });
            }
            Effect::FinalizeUserMessage { index, status } => {
                if self.store.set_status(index, status).await {
                    if let Some(message) = self.store.messages().get(index).cloned() {
                        self.emit(UiEvent::MessageUpdated { index, message });
                    }
                } else {
                    tracing::warn!(index, "Provisional message no longer present");
                }
            }
            Effect::AdoptConversation { id } => {
                self.store.adopt_conversation(id.clone()).await;
                self.emit(UiEvent::ConversationAdopted { id });
            }
            Effect::RecordMeta { meta } => {
                self.store.record_meta(meta.clone());
                self.emit(UiEvent::MetaUpdated(meta));
            }
            Effect::DispatchRequest { request } => {
                tracing::info!(
                    kind = request.kind(),
                    modality = ?self.state.pending().map(|p| p.modality),
                    conv_id = ?self.store.active_id(),
                    "Dispatching turn"
                );
                tracing::debug!(prompt = request.prompt().unwrap_or_default(), "Turn prompt");
                self.emit(UiEvent::TurnStarted {
                    kind: request.kind(),
                });
                let gateway = self.gateway.clone();
                let tx = self.command_tx.clone();
                tokio::spawn(async move {
                    let result = dispatch(gateway.as_ref(), &request).await;
                    let _ = tx.send(Command::TurnCompleted(result)).await;
                });
            }
            Effect::PlayAudio { clip } => {
                let speech = self.speech.clone();
                tokio::spawn(async move {
                    if let Err(e) = speech.speak(&clip.bytes, &clip.mime).await {
                        tracing::warn!(error = %e, "Reply playback failed");
                    }
                });
            }
            Effect::RefreshConversations => {
                let source = self.store.refresh_conversations().await;
                self.publish_conversations(source);
            }
            Effect::RequireLogin => self.require_login(),
            Effect::NotifyTurnFinished { outcome } => {
                tracing::info!(?outcome, "Turn finished");
                self.emit(UiEvent::TurnFinished { outcome });
            }
        }
    }

    async fn attach(&mut self, path: PathBuf) {
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                self.emit(UiEvent::Error {
                    message: format!("{} is not a file", path.display()),
                });
                return;
            }
            Err(e) => {
                self.emit(UiEvent::Error {
                    message: format!("Cannot attach {}: {e}", path.display()),
                });
                return;
            }
        }

        let attachment = Attachment::from_path(&path);
        tracing::info!(file = %attachment.file_name, mime = %attachment.mime, "File attached");
        self.attachment = Some(attachment.clone());
        self.emit(UiEvent::AttachmentChanged(Some(attachment.clone())));

        if attachment.is_pdf() {
            let gateway = self.gateway.clone();
            let tx = self.command_tx.clone();
            let user_key = self.preferences.user_key.clone();
            tokio::spawn(async move {
                let result = gateway.ingest_pdf(&attachment, &user_key).await;
                let _ = tx
                    .send(Command::IngestCompleted {
                        file_name: attachment.file_name,
                        result,
                    })
                    .await;
            });
        }
    }

    fn ingest_completed(&mut self, file_name: &str, result: Result<IngestReport, GatewayError>) {
        match result {
            Ok(report) => {
                tracing::info!(
                    file = %file_name,
                    chunks = report.chunks,
                    doc_id = report.doc_id.as_deref().unwrap_or(""),
                    "PDF ingested"
                );
                self.notice(format!(
                    "Added {file_name} to the knowledge base ({} chunks)",
                    report.chunks
                ));
            }
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "PDF ingestion failed");
                self.notice(format!("Could not index {file_name}: {}", e.message));
                if e.is_unauthorized() {
                    self.require_login();
                }
            }
        }
    }

    async fn start_voice(&mut self) {
        if self.capturing {
            self.notice("Already listening");
            return;
        }
        let mut rx = match self.speech.start_capture().await {
            Ok(rx) => rx,
            Err(e) => {
                self.notice(e.to_string());
                return;
            }
        };

        self.capturing = true;
        self.emit(UiEvent::Listening(true));
        let tx = self.command_tx.clone();
        tokio::spawn(async move {
            if let Some(transcript) = rx.recv().await {
                let _ = tx.send(Command::Transcript(transcript)).await;
            }
            let _ = tx.send(Command::CaptureEnded).await;
        });
    }

    async fn check_health(&mut self) {
        let health = match self.gateway.health().await {
            Ok(()) => BackendHealth::Up,
            Err(_) => BackendHealth::Down,
        };
        if health != self.health {
            tracing::info!(?health, "Backend status changed");
            self.health = health;
            self.emit(UiEvent::BackendStatus(health));
        }
    }

    async fn clear_draft(&mut self) {
        if !self.preferences.draft.is_empty() {
            self.preferences.set_draft(self.cache.as_ref(), "").await;
        }
    }

    fn reject_if_busy(&self) -> bool {
        if self.state.is_busy() {
            self.emit(UiEvent::Error {
                message: "Wait for the current reply to finish".to_string(),
            });
        }
        self.state.is_busy()
    }

    fn toggles(&self) -> Toggles {
        Toggles {
            quality: self.quality,
            web_search: self.web_search,
            voice_replies: self.preferences.voice_replies,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            active_id: self.store.active_id().map(ToString::to_string),
            messages: self.store.messages().to_vec(),
            conversations: self.store.conversations().to_vec(),
            toggles: self.toggles(),
            attachment: self.attachment.clone(),
            preferences: self.preferences.clone(),
            last_meta: self.store.last_meta().cloned(),
            busy: self.state.is_busy(),
            capturing: self.capturing,
            backend: self.health,
        }
    }

    fn publish_active(&self) {
        self.emit(UiEvent::ConversationChanged {
            id: self.store.active_id().map(ToString::to_string),
            messages: self.store.messages().to_vec(),
        });
    }

    fn publish_conversations(&self, source: ListSource) {
        self.emit(UiEvent::ConversationsUpdated {
            conversations: self.store.conversations().to_vec(),
            source,
        });
    }

    fn notice(&self, message: impl Into<String>) {
        self.emit(UiEvent::Notice {
            message: message.into(),
        });
    }

    fn emit(&self, event: UiEvent) {
        // No subscribers is fine
        let _ = self.broadcast_tx.send(event);
    }
}

/// The turn's single gateway call
async fn dispatch<G: Gateway + ?Sized>(
    gateway: &G,
    request: &TurnRequest,
) -> Result<Reply, GatewayError> {
    match request {
        TurnRequest::Text(turn) => gateway.send_text(turn).await,
        TurnRequest::Voice(turn) => gateway.send_voice(turn).await,
        TurnRequest::FileAsk(ask) => gateway.ask_file(ask).await,
    }
}
