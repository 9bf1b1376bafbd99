//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{SessionHandle, SessionRuntime, SessionSnapshot, UiEvent};
use crate::cache::{CacheError, CacheKey, CacheResult};
use crate::gateway::{
    ConversationDetail, FileAsk, Gateway, GatewayError, IngestReport, LoginGrant, Reply, TextTurn,
    TurnRequest, VoiceOptions, VoiceTurn,
};
use crate::model::{Attachment, ConversationSummary};
use crate::preferences::Preferences;
use crate::session::TurnInput;
use crate::speech::{SpeechError, SpeechIo};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// Mock Gateway
// ============================================================================

/// Gateway that returns queued results and records what it was asked.
///
/// Unqueued calls fall back to harmless defaults: empty list, unknown
/// conversation, successful delete/health/auth. Turn calls with nothing
/// queued fail as unreachable.
#[derive(Default)]
pub struct MockGateway {
    replies: Mutex<VecDeque<Result<Reply, GatewayError>>>,
    lists: Mutex<VecDeque<Result<Vec<ConversationSummary>, GatewayError>>>,
    conversations: Mutex<VecDeque<Result<ConversationDetail, GatewayError>>>,
    deletes: Mutex<VecDeque<Result<(), GatewayError>>>,
    health: Mutex<VecDeque<Result<(), GatewayError>>>,
    ingests: Mutex<VecDeque<Result<IngestReport, GatewayError>>>,
    logins: Mutex<VecDeque<Result<LoginGrant, GatewayError>>>,
    verifications: Mutex<VecDeque<Result<(), GatewayError>>>,
    /// Applied to turn calls only
    reply_delay: Option<Duration>,
    /// Record of all turn requests made
    pub requests: Mutex<Vec<TurnRequest>>,
    deleted: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }

    pub fn queue_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn queue_error(&self, error: GatewayError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_list(&self, result: Result<Vec<ConversationSummary>, GatewayError>) {
        self.lists.lock().unwrap().push_back(result);
    }

    pub fn queue_conversation(&self, result: Result<ConversationDetail, GatewayError>) {
        self.conversations.lock().unwrap().push_back(result);
    }

    pub fn queue_delete(&self, result: Result<(), GatewayError>) {
        self.deletes.lock().unwrap().push_back(result);
    }

    pub fn queue_health(&self, result: Result<(), GatewayError>) {
        self.health.lock().unwrap().push_back(result);
    }

    pub fn queue_ingest(&self, result: Result<IngestReport, GatewayError>) {
        self.ingests.lock().unwrap().push_back(result);
    }

    pub fn queue_login(&self, result: Result<LoginGrant, GatewayError>) {
        self.logins.lock().unwrap().push_back(result);
    }

    pub fn queue_verify(&self, result: Result<(), GatewayError>) {
        self.verifications.lock().unwrap().push_back(result);
    }

    pub fn recorded_requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Identifiers passed to `delete_conversation`, in call order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    async fn turn(&self, request: TurnRequest) -> Result<Reply, GatewayError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.reply_delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::network("No mock reply queued")))
    }
}

fn next<T>(
    queue: &Mutex<VecDeque<Result<T, GatewayError>>>,
    default: impl FnOnce() -> Result<T, GatewayError>,
) -> Result<T, GatewayError> {
    queue.lock().unwrap().pop_front().unwrap_or_else(default)
}

#[async_trait]
impl Gateway for MockGateway {
    async fn send_text(&self, turn: &TextTurn) -> Result<Reply, GatewayError> {
        self.turn(TurnRequest::Text(turn.clone())).await
    }

    async fn send_voice(&self, turn: &VoiceTurn) -> Result<Reply, GatewayError> {
        self.turn(TurnRequest::Voice(turn.clone())).await
    }

    async fn ask_file(&self, ask: &FileAsk) -> Result<Reply, GatewayError> {
        self.turn(TurnRequest::FileAsk(ask.clone())).await
    }

    async fn ingest_pdf(
        &self,
        _attachment: &Attachment,
        _user_key: &str,
    ) -> Result<IngestReport, GatewayError> {
        next(&self.ingests, || {
            Ok(IngestReport {
                chunks: 0,
                doc_id: None,
            })
        })
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, GatewayError> {
        next(&self.lists, || Ok(vec![]))
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, GatewayError> {
        next(&self.conversations, || {
            Err(GatewayError::not_found(format!("Conversation {id} not found")))
        })
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), GatewayError> {
        self.deleted.lock().unwrap().push(id.to_string());
        next(&self.deletes, || Ok(()))
    }

    async fn health(&self) -> Result<(), GatewayError> {
        next(&self.health, || Ok(()))
    }

    async fn login(&self, _passcode: &str) -> Result<LoginGrant, GatewayError> {
        next(&self.logins, || {
            Ok(LoginGrant { expires_at: None })
        })
    }

    async fn verify_auth(&self) -> Result<(), GatewayError> {
        next(&self.verifications, || Ok(()))
    }
}

// ============================================================================
// In-memory cache
// ============================================================================

/// `CacheStore` over a `HashMap`
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Make every save and remove fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> CacheResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(CacheError::Sqlite(rusqlite::Error::InvalidQuery))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn load_raw(&self, key: &CacheKey) -> CacheResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(&key.to_string()).cloned())
    }

    async fn save_raw(&self, key: &CacheKey, value: String) -> CacheResult<()> {
        self.check_writable()?;
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.check_writable()?;
        self.entries.lock().unwrap().remove(&key.to_string());
        Ok(())
    }
}

// ============================================================================
// Mock speech
// ============================================================================

/// Speech that hands out queued transcripts, one per start/stop cycle, and
/// records what it was asked to play
pub struct MockSpeech {
    available: bool,
    transcripts: Mutex<VecDeque<String>>,
    capture: Mutex<Option<mpsc::Sender<String>>>,
    spoken: Mutex<Vec<(Vec<u8>, String)>>,
}

impl MockSpeech {
    pub fn new() -> Self {
        Self {
            available: true,
            transcripts: Mutex::new(VecDeque::new()),
            capture: Mutex::new(None),
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn with_transcript(self, transcript: impl Into<String>) -> Self {
        self.transcripts.lock().unwrap().push_back(transcript.into());
        self
    }

    pub fn spoken(&self) -> Vec<(Vec<u8>, String)> {
        self.spoken.lock().unwrap().clone()
    }
}

impl Default for MockSpeech {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechIo for MockSpeech {
    async fn start_capture(&self) -> Result<mpsc::Receiver<String>, SpeechError> {
        if !self.available {
            return Err(SpeechError::Unavailable("Voice capture".to_string()));
        }
        let (tx, rx) = mpsc::channel(1);
        *self.capture.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop_capture(&self) -> Result<(), SpeechError> {
        if !self.available {
            return Err(SpeechError::Unavailable("Voice capture".to_string()));
        }
        // Dropping the sender ends the capture
        if let Some(tx) = self.capture.lock().unwrap().take() {
            if let Some(transcript) = self.transcripts.lock().unwrap().pop_front() {
                let _ = tx.try_send(transcript);
            }
        }
        Ok(())
    }

    async fn speak(&self, audio: &[u8], mime: &str) -> Result<(), SpeechError> {
        if !self.available {
            return Err(SpeechError::Unavailable("Audio playback".to_string()));
        }
        self.spoken
            .lock()
            .unwrap()
            .push((audio.to_vec(), mime.to_string()));
        Ok(())
    }
}

// ============================================================================
// Test runtime
// ============================================================================

/// A running `SessionRuntime` over mocks, with helpers to drive it
pub struct TestRuntime {
    pub handle: SessionHandle,
    pub events: broadcast::Receiver<UiEvent>,
    pub gateway: Arc<MockGateway>,
    pub cache: Arc<InMemoryCache>,
    pub speech: Arc<MockSpeech>,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder::default()
    }

    /// Start with default mocks
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub async fn send(&self, command: super::Command) {
        assert!(self.handle.send(command).await, "runtime stopped");
    }

    pub async fn submit_text(&self, text: &str) {
        self.send(super::Command::Submit(TurnInput::Text {
            text: text.to_string(),
        }))
        .await;
    }

    /// Next event matching `predicate`, skipping the rest
    pub async fn wait_for(
        &mut self,
        predicate: impl Fn(&UiEvent) -> bool,
        timeout: Duration,
    ) -> Option<UiEvent> {
        let events = &mut self.events;
        tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(event) if predicate(&event) => return Some(event),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn wait_for_turn(&mut self) -> Option<crate::session::TurnOutcome> {
        match self
            .wait_for(
                |e| matches!(e, UiEvent::TurnFinished { .. }),
                Duration::from_secs(2),
            )
            .await
        {
            Some(UiEvent::TurnFinished { outcome }) => Some(outcome),
            _ => None,
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.handle
            .snapshot()
            .await
            .expect("runtime should answer snapshots")
    }
}

#[derive(Default)]
pub struct TestRuntimeBuilder {
    gateway: Option<MockGateway>,
    cache: Option<InMemoryCache>,
    speech: Option<MockSpeech>,
}

impl TestRuntimeBuilder {
    pub fn gateway(mut self, gateway: MockGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn cache(mut self, cache: InMemoryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn speech(mut self, speech: MockSpeech) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Spawn the runtime and wait until startup has finished
    pub async fn start(self) -> TestRuntime {
        let gateway = Arc::new(self.gateway.unwrap_or_default());
        let cache = Arc::new(self.cache.unwrap_or_default());
        let speech = Arc::new(self.speech.unwrap_or_default());

        let preferences = Preferences::load(cache.as_ref()).await;
        let (runtime, handle) = SessionRuntime::new(
            gateway.clone(),
            cache.clone(),
            speech.clone(),
            preferences,
            VoiceOptions::default(),
        );
        let events = handle.subscribe();
        let runtime_handle = tokio::spawn(runtime.run());

        let mut rt = TestRuntime {
            handle,
            events,
            gateway,
            cache,
            speech,
            _runtime_handle: runtime_handle,
        };
        assert!(
            rt.wait_for(|e| matches!(e, UiEvent::Ready), Duration::from_secs(2))
                .await
                .is_some(),
            "runtime did not become ready"
        );
        rt
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::AudioClip;
    use crate::model::{DeliveryStatus, Message, Quality, ReplyMeta, Role, ToolKind};
    use crate::runtime::{BackendHealth, Command};
    use crate::session::TurnOutcome;
    use chrono::Utc;

    const WAIT: Duration = Duration::from_secs(2);

    fn reply(text: &str, conversation_id: &str) -> Reply {
        Reply {
            text: text.to_string(),
            conversation_id: Some(conversation_id.to_string()),
            meta: ReplyMeta {
                model: "m1".to_string(),
                quality: "high".to_string(),
            },
            audio: None,
        }
    }

    fn cached_conversation() -> (InMemoryCache, Vec<Message>) {
        let mut hi = Message::user("hi", Utc::now());
        hi.status = None;
        let messages = vec![hi, Message::assistant("hello", Utc::now())];
        (InMemoryCache::new(), messages)
    }

    #[tokio::test]
    async fn test_mock_gateway_defaults() {
        let gateway = MockGateway::new();
        assert!(gateway.list_conversations().await.unwrap().is_empty());
        assert!(gateway.get_conversation("c1").await.is_err());
        assert!(gateway.delete_conversation("c1").await.is_ok());
        assert_eq!(gateway.deleted(), vec!["c1".to_string()]);

        let turn = TextTurn {
            prompt: "hi".to_string(),
            options: crate::gateway::TurnOptions {
                quality: Quality::Auto,
                conversation_id: None,
                user_key: None,
            },
            tool: None,
        };
        let err = gateway.send_text(&turn).await.unwrap_err();
        assert_eq!(err.kind, crate::gateway::GatewayErrorKind::Network);
        assert_eq!(gateway.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_cache_write_failures() {
        let cache = InMemoryCache::new();
        cache.save_last_active(Some("c1")).await.unwrap();
        cache.set_fail_writes(true);
        assert!(cache.save_last_active(Some("c2")).await.is_err());
        assert_eq!(cache.load_last_active().await.as_deref(), Some("c1"));
    }

    /// Submit "Summarize this" with web search; the backend assigns c2
    #[tokio::test]
    async fn test_first_turn_adopts_server_identifier() {
        let gateway = MockGateway::new();
        gateway.queue_reply(reply("Here is a summary", "c2"));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.send(Command::SetWebSearch(true)).await;
        rt.send(Command::SetQuality(Quality::High)).await;
        rt.submit_text("Summarize this").await;
        assert_eq!(rt.wait_for_turn().await, Some(TurnOutcome::Replied));

        let snap = rt.snapshot().await;
        assert_eq!(snap.active_id.as_deref(), Some("c2"));
        assert_eq!(snap.messages.len(), 2);
        assert_eq!(snap.messages[0].role, Role::User);
        assert_eq!(snap.messages[0].content, "Summarize this");
        assert_eq!(snap.messages[0].status, None);
        assert_eq!(snap.messages[1].role, Role::Assistant);
        assert_eq!(snap.messages[1].content, "Here is a summary");
        assert_eq!(snap.last_meta.as_ref().map(|m| m.model.as_str()), Some("m1"));
        assert!(!snap.busy);

        // Cache snapshot equals memory
        assert_eq!(rt.cache.load_messages("c2").await, snap.messages);
        assert_eq!(rt.cache.load_last_active().await.as_deref(), Some("c2"));

        let requests = rt.gateway.recorded_requests();
        assert_eq!(requests.len(), 1);
        let TurnRequest::Text(turn) = &requests[0] else {
            panic!("expected a text turn, got {:?}", requests[0]);
        };
        let tool = turn.tool.as_ref().unwrap();
        assert_eq!(tool.kind, ToolKind::WebSearch);
        assert_eq!(tool.query, "Summarize this");
        assert_eq!(tool.k, 5);
        assert_eq!(turn.options.quality, Quality::High);
        assert_eq!(turn.options.conversation_id, None);
        assert!(turn.options.user_key.as_deref().unwrap().starts_with("u-"));
    }

    #[tokio::test]
    async fn test_second_submit_while_busy_is_rejected() {
        let gateway = MockGateway::new().with_reply_delay(Duration::from_millis(300));
        gateway.queue_reply(reply("first", "c1"));
        gateway.queue_reply(reply("second", "c1"));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.submit_text("one").await;
        rt.submit_text("two").await;

        let rejected = rt
            .wait_for(|e| matches!(e, UiEvent::Error { .. }), WAIT)
            .await;
        assert!(matches!(rejected, Some(UiEvent::Error { message }) if message.contains("previous reply")));
        assert_eq!(rt.wait_for_turn().await, Some(TurnOutcome::Replied));

        let snap = rt.snapshot().await;
        assert_eq!(snap.messages.len(), 2);
        assert_eq!(snap.messages[0].content, "one");
        assert_eq!(rt.gateway.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_becomes_inline_error() {
        let gateway = MockGateway::new();
        gateway.queue_error(GatewayError::server_error("Model overloaded"));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.submit_text("hello").await;
        assert_eq!(rt.wait_for_turn().await, Some(TurnOutcome::Failed));

        let snap = rt.snapshot().await;
        assert_eq!(snap.active_id, None);
        assert_eq!(snap.messages.len(), 2);
        assert_eq!(snap.messages[0].status, Some(DeliveryStatus::Failed));
        assert_eq!(snap.messages[1].content, "Error: Model overloaded");
    }

    #[tokio::test]
    async fn test_unauthorized_reply_requires_login() {
        let gateway = MockGateway::new();
        gateway.queue_error(GatewayError::unauthorized("Token expired"));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.submit_text("hello").await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::LoginRequired), WAIT)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_rejected_token_at_startup_requires_login() {
        let gateway = MockGateway::new();
        gateway.queue_verify(Err(GatewayError::unauthorized("Session is not valid")));
        let cache = Arc::new(InMemoryCache::new());
        let preferences = Preferences::load(cache.as_ref()).await;
        let (runtime, handle) = SessionRuntime::new(
            Arc::new(gateway),
            cache,
            Arc::new(MockSpeech::new()),
            preferences,
            VoiceOptions::default(),
        );
        let mut events = handle.subscribe();
        tokio::spawn(runtime.run());

        let saw_login = tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Ok(UiEvent::LoginRequired) => return true,
                    Ok(UiEvent::Ready) | Err(_) => return false,
                    Ok(_) => {}
                }
            }
        })
        .await
        .unwrap_or(false);
        assert!(saw_login);
    }

    #[tokio::test]
    async fn test_rejected_token_on_select_requires_login() {
        let (cache, messages) = cached_conversation();
        cache.save_messages("c1", &messages).await.unwrap();
        let gateway = MockGateway::new();
        gateway.queue_conversation(Err(GatewayError::unauthorized("Not authenticated")));
        let mut rt = TestRuntime::builder()
            .gateway(gateway)
            .cache(cache)
            .start()
            .await;

        rt.send(Command::Select {
            id: "c1".to_string(),
        })
        .await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::LoginRequired), WAIT)
            .await
            .is_some());
        // Cached history is still shown
        assert_eq!(rt.snapshot().await.messages, messages);
    }

    #[tokio::test]
    async fn test_rejected_token_on_refresh_requires_login() {
        let gateway = MockGateway::new();
        // Startup refresh succeeds, the next one is rejected
        gateway.queue_list(Ok(vec![]));
        gateway.queue_list(Err(GatewayError::unauthorized("Not authenticated")));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.send(Command::Refresh).await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::LoginRequired), WAIT)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_rejected_token_on_delete_requires_login() {
        let gateway = MockGateway::new();
        gateway.queue_delete(Err(GatewayError::unauthorized("Not authenticated")));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.send(Command::Delete {
            id: "c1".to_string(),
        })
        .await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::LoginRequired), WAIT)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_rejected_turn_prompts_login_once() {
        let gateway = MockGateway::new();
        gateway.queue_error(GatewayError::unauthorized("Token expired"));
        // The list refresh after the failed turn is rejected too
        gateway.queue_list(Ok(vec![]));
        gateway.queue_list(Err(GatewayError::unauthorized("Token expired")));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.submit_text("hello").await;
        let mut prompts = 0;
        loop {
            match rt.events.recv().await.unwrap() {
                UiEvent::LoginRequired => prompts += 1,
                UiEvent::TurnFinished { .. } => break,
                _ => {}
            }
        }
        // Snapshot is answered only after the turn's command has finished
        rt.snapshot().await;
        while let Ok(event) = rt.events.try_recv() {
            if matches!(event, UiEvent::LoginRequired) {
                prompts += 1;
            }
        }
        assert_eq!(prompts, 1);
    }

    #[tokio::test]
    async fn test_rejected_token_on_ingest_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let gateway = MockGateway::new();
        gateway.queue_ingest(Err(GatewayError::unauthorized("Not authenticated")));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.send(Command::Attach { path }).await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::LoginRequired), WAIT)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_login_reports_token_expiry() {
        let gateway = MockGateway::new();
        gateway.queue_login(Ok(LoginGrant {
            expires_at: Some("2026-10-19T12:00:00Z".to_string()),
        }));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.send(Command::Login {
            passcode: "1234".to_string(),
        })
        .await;
        let notice = rt
            .wait_for(|e| matches!(e, UiEvent::Notice { .. }), WAIT)
            .await;
        assert!(matches!(
            notice,
            Some(UiEvent::Notice { message }) if message == "Signed in until 2026-10-19T12:00:00Z"
        ));
    }

    #[tokio::test]
    async fn test_select_falls_back_to_cache() {
        let (cache, messages) = cached_conversation();
        cache.save_messages("c1", &messages).await.unwrap();
        let gateway = MockGateway::new();
        gateway.queue_conversation(Err(GatewayError::network("Request timeout")));
        let mut rt = TestRuntime::builder()
            .gateway(gateway)
            .cache(cache)
            .start()
            .await;

        rt.send(Command::Select {
            id: "c1".to_string(),
        })
        .await;
        let changed = rt
            .wait_for(
                |e| matches!(e, UiEvent::ConversationChanged { id: Some(_), .. }),
                WAIT,
            )
            .await;
        let Some(UiEvent::ConversationChanged { id, messages: shown }) = changed else {
            panic!("no conversation change");
        };
        assert_eq!(id.as_deref(), Some("c1"));
        assert_eq!(shown, messages);
    }

    #[tokio::test]
    async fn test_startup_restores_last_active_conversation() {
        let (cache, messages) = cached_conversation();
        cache.save_messages("c1", &messages).await.unwrap();
        cache.save_last_active(Some("c1")).await.unwrap();

        let rt = TestRuntime::builder().cache(cache).start().await;
        let snap = rt.snapshot().await;
        assert_eq!(snap.active_id.as_deref(), Some("c1"));
        assert_eq!(snap.messages, messages);
    }

    #[tokio::test]
    async fn test_delete_active_conversation_clears_state() {
        let (cache, messages) = cached_conversation();
        cache.save_messages("c1", &messages).await.unwrap();
        cache.save_last_active(Some("c1")).await.unwrap();
        let mut rt = TestRuntime::builder().cache(cache).start().await;

        rt.send(Command::Delete {
            id: "c1".to_string(),
        })
        .await;
        assert!(rt
            .wait_for(
                |e| matches!(e, UiEvent::ConversationChanged { id: None, .. }),
                WAIT
            )
            .await
            .is_some());

        let snap = rt.snapshot().await;
        assert!(snap.messages.is_empty());
        assert!(rt.cache.load_messages("c1").await.is_empty());
        assert_eq!(rt.gateway.deleted(), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_regenerate_resubmits_previous_prompt() {
        let gateway = MockGateway::new();
        gateway.queue_reply(reply("first answer", "c1"));
        gateway.queue_reply(reply("second answer", "c1"));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.submit_text("hello").await;
        assert_eq!(rt.wait_for_turn().await, Some(TurnOutcome::Replied));
        rt.send(Command::Regenerate { at: None }).await;
        assert_eq!(rt.wait_for_turn().await, Some(TurnOutcome::Replied));

        let snap = rt.snapshot().await;
        let contents: Vec<&str> = snap.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "first answer", "second answer"]);

        let requests = rt.gateway.recorded_requests();
        assert_eq!(requests[1].prompt(), Some("hello"));
        let TurnRequest::Text(turn) = &requests[1] else {
            panic!("expected a text turn");
        };
        assert_eq!(turn.options.conversation_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_sending_clears_draft() {
        let gateway = MockGateway::new();
        gateway.queue_reply(reply("ok", "c1"));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.send(Command::SetDraft("half typed".to_string())).await;
        assert_eq!(rt.snapshot().await.preferences.draft, "half typed");

        rt.submit_text("half typed, now finished").await;
        rt.wait_for_turn().await;
        assert!(rt.snapshot().await.preferences.draft.is_empty());
        assert_eq!(rt.cache.load_text(&CacheKey::Draft).await, None);
    }

    #[tokio::test]
    async fn test_turn_survives_cache_write_failure() {
        let gateway = MockGateway::new();
        gateway.queue_reply(reply("still here", "c1"));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;
        rt.cache.set_fail_writes(true);

        rt.submit_text("hello").await;
        assert_eq!(rt.wait_for_turn().await, Some(TurnOutcome::Replied));
        assert_eq!(rt.snapshot().await.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_voice_turn_plays_reply_audio() {
        let gateway = MockGateway::new();
        gateway.queue_reply(Reply {
            audio: Some(AudioClip {
                bytes: vec![1, 2, 3],
                mime: "audio/mpeg".to_string(),
            }),
            ..reply("It is noon", "c1")
        });
        let mut rt = TestRuntime::builder()
            .gateway(gateway)
            .speech(MockSpeech::new().with_transcript("what time is it"))
            .start()
            .await;

        rt.send(Command::SetVoiceReplies(true)).await;
        rt.send(Command::StartVoice).await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::Listening(true)), WAIT)
            .await
            .is_some());
        rt.send(Command::StopVoice).await;
        assert_eq!(rt.wait_for_turn().await, Some(TurnOutcome::Replied));

        let requests = rt.gateway.recorded_requests();
        assert!(matches!(&requests[0], TurnRequest::Voice(v) if v.turn.prompt == "what time is it"));

        let mut spoken = Vec::new();
        for _ in 0..50 {
            spoken = rt.speech.spoken();
            if !spoken.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(spoken, vec![(vec![1, 2, 3], "audio/mpeg".to_string())]);
        assert!(rt.snapshot().await.preferences.voice_replies);
    }

    #[tokio::test]
    async fn test_missing_speech_is_a_notice() {
        let mut rt = TestRuntime::builder()
            .speech(MockSpeech::unavailable())
            .start()
            .await;

        rt.send(Command::StartVoice).await;
        let notice = rt
            .wait_for(|e| matches!(e, UiEvent::Notice { .. }), WAIT)
            .await;
        assert!(matches!(notice, Some(UiEvent::Notice { message }) if message.contains("not available")));
        assert!(!rt.snapshot().await.capturing);
    }

    #[tokio::test]
    async fn test_attached_pdf_is_ingested_and_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let gateway = MockGateway::new();
        gateway.queue_ingest(Ok(IngestReport {
            chunks: 12,
            doc_id: Some("d1".to_string()),
        }));
        gateway.queue_reply(reply("It is about cats", "c3"));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        rt.send(Command::Attach { path: path.clone() }).await;
        let notice = rt
            .wait_for(|e| matches!(e, UiEvent::Notice { .. }), WAIT)
            .await;
        assert!(matches!(notice, Some(UiEvent::Notice { message }) if message.contains("12 chunks")));

        rt.submit_text("").await;
        assert_eq!(rt.wait_for_turn().await, Some(TurnOutcome::Replied));

        let requests = rt.gateway.recorded_requests();
        let TurnRequest::FileAsk(ask) = &requests[0] else {
            panic!("expected a file ask");
        };
        assert_eq!(ask.attachment.path, path);
        assert_eq!(ask.prompt.as_deref(), Some("Summarize this PDF"));

        // The attachment stays for the next turn
        assert!(rt.snapshot().await.attachment.is_some());
    }

    #[tokio::test]
    async fn test_attach_missing_file_is_an_error() {
        let mut rt = TestRuntime::start().await;
        rt.send(Command::Attach {
            path: "/nonexistent/relaychat/file.txt".into(),
        })
        .await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::Error { .. }), WAIT)
            .await
            .is_some());
        assert!(rt.snapshot().await.attachment.is_none());
    }

    #[tokio::test]
    async fn test_health_changes_are_published() {
        let gateway = MockGateway::new();
        gateway.queue_health(Err(GatewayError::network("connection refused")));
        let mut rt = TestRuntime::builder().gateway(gateway).start().await;

        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::BackendStatus(BackendHealth::Down)), WAIT)
            .await
            .is_some());
        rt.send(Command::CheckHealth).await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::BackendStatus(BackendHealth::Up)), WAIT)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_quick_prompts_are_editable() {
        let mut rt = TestRuntime::start().await;
        rt.send(Command::AddQuickPrompt("Explain like I'm five".to_string()))
            .await;
        rt.send(Command::RemoveQuickPrompt(0)).await;
        rt.send(Command::RemoveQuickPrompt(99)).await;
        assert!(rt
            .wait_for(|e| matches!(e, UiEvent::Notice { .. }), WAIT)
            .await
            .is_some());

        let prompts = rt.snapshot().await.preferences.quick_prompts;
        assert_eq!(prompts.first().map(String::as_str), Some("Make bullet points"));
        assert_eq!(prompts.last().map(String::as_str), Some("Explain like I'm five"));
        assert_eq!(rt.cache.load_list(&CacheKey::QuickPrompts).await, Some(prompts));
    }
}
