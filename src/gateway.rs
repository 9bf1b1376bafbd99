//! Remote session gateway
//!
//! The only component that talks to the backend. Each call kind shapes its
//! own request and normalizes its own response.

mod auth;
mod error;
mod http;
mod types;

pub use auth::AuthSession;
pub use error::{GatewayError, GatewayErrorKind};
pub use http::HttpGateway;
pub use types::*;

use crate::model::{Attachment, ConversationSummary};
use async_trait::async_trait;
use std::sync::Arc;

/// Backend operations consumed by the client
#[async_trait]
pub trait Gateway: Send + Sync {
    /// `POST /chat`
    async fn send_text(&self, turn: &TextTurn) -> Result<Reply, GatewayError>;

    /// `POST /chat/voice`; the reply may carry synthesized audio
    async fn send_voice(&self, turn: &VoiceTurn) -> Result<Reply, GatewayError>;

    /// `POST /files/ask` (multipart upload)
    async fn ask_file(&self, ask: &FileAsk) -> Result<Reply, GatewayError>;

    /// `POST /rag/ingest_pdf` (multipart upload)
    async fn ingest_pdf(
        &self,
        attachment: &Attachment,
        user_key: &str,
    ) -> Result<IngestReport, GatewayError>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, GatewayError>;

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, GatewayError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), GatewayError>;

    /// `GET /health`
    async fn health(&self) -> Result<(), GatewayError>;

    /// Exchange a passcode for a bearer token, which is kept for later calls
    async fn login(&self, passcode: &str) -> Result<LoginGrant, GatewayError>;

    /// Check that the current token is still accepted
    async fn verify_auth(&self) -> Result<(), GatewayError>;
}

/// Logging wrapper for gateways
pub struct LoggingGateway {
    inner: Arc<dyn Gateway>,
}

impl LoggingGateway {
    pub fn new(inner: Arc<dyn Gateway>) -> Self {
        Self { inner }
    }

    fn record<T>(call: &'static str, start: std::time::Instant, result: &Result<T, GatewayError>) {
        let duration = start.elapsed();
        match result {
            Ok(_) => {
                tracing::info!(
                    call,
                    duration_ms = %duration.as_millis(),
                    "Gateway call completed"
                );
            }
            Err(e) if e.kind == GatewayErrorKind::Network => {
                tracing::warn!(
                    call,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    "Gateway unreachable"
                );
            }
            Err(e) => {
                tracing::error!(
                    call,
                    duration_ms = %duration.as_millis(),
                    kind = ?e.kind,
                    error = %e.message,
                    "Gateway call failed"
                );
            }
        }
    }
}

#[async_trait]
impl Gateway for LoggingGateway {
    async fn send_text(&self, turn: &TextTurn) -> Result<Reply, GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.send_text(turn).await;
        Self::record("send_text", start, &result);
        result
    }

    async fn send_voice(&self, turn: &VoiceTurn) -> Result<Reply, GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.send_voice(turn).await;
        Self::record("send_voice", start, &result);
        result
    }

    async fn ask_file(&self, ask: &FileAsk) -> Result<Reply, GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.ask_file(ask).await;
        Self::record("ask_file", start, &result);
        result
    }

    async fn ingest_pdf(
        &self,
        attachment: &Attachment,
        user_key: &str,
    ) -> Result<IngestReport, GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.ingest_pdf(attachment, user_key).await;
        Self::record("ingest_pdf", start, &result);
        result
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.list_conversations().await;
        Self::record("list_conversations", start, &result);
        result
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.get_conversation(id).await;
        Self::record("get_conversation", start, &result);
        result
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.delete_conversation(id).await;
        Self::record("delete_conversation", start, &result);
        result
    }

    async fn health(&self) -> Result<(), GatewayError> {
        // Polled on a timer; only failures are interesting
        let result = self.inner.health().await;
        if let Err(e) = &result {
            tracing::debug!(error = %e.message, "Health check failed");
        }
        result
    }

    async fn login(&self, passcode: &str) -> Result<LoginGrant, GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.login(passcode).await;
        Self::record("login", start, &result);
        result
    }

    async fn verify_auth(&self) -> Result<(), GatewayError> {
        let start = std::time::Instant::now();
        let result = self.inner.verify_auth().await;
        Self::record("verify_auth", start, &result);
        result
    }
}

// ============================================================================
// Arc implementation for trait objects
// ============================================================================

#[async_trait]
impl<T: Gateway + ?Sized> Gateway for Arc<T> {
    async fn send_text(&self, turn: &TextTurn) -> Result<Reply, GatewayError> {
        (**self).send_text(turn).await
    }

    async fn send_voice(&self, turn: &VoiceTurn) -> Result<Reply, GatewayError> {
        (**self).send_voice(turn).await
    }

    async fn ask_file(&self, ask: &FileAsk) -> Result<Reply, GatewayError> {
        (**self).ask_file(ask).await
    }

    async fn ingest_pdf(
        &self,
        attachment: &Attachment,
        user_key: &str,
    ) -> Result<IngestReport, GatewayError> {
        (**self).ingest_pdf(attachment, user_key).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, GatewayError> {
        (**self).list_conversations().await
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, GatewayError> {
        (**self).get_conversation(id).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), GatewayError> {
        (**self).delete_conversation(id).await
    }

    async fn health(&self) -> Result<(), GatewayError> {
        (**self).health().await
    }

    async fn login(&self, passcode: &str) -> Result<LoginGrant, GatewayError> {
        (**self).login(passcode).await
    }

    async fn verify_auth(&self) -> Result<(), GatewayError> {
        (**self).verify_auth().await
    }
}
