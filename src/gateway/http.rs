//! HTTP implementation of the gateway

use super::error::{classify_error, from_transport, GatewayError};
use super::types::{
    AudioClip, ChatBody, ChatResponse, ConversationDetail, ConversationListResponse, ConversationResponse,
    FileAsk, FileAskResponse, IngestReport, IngestResponse, LoginBody, LoginGrant, LoginResponse,
    Reply, StatusResponse, TextTurn, VoiceTurn,
};
use super::{AuthSession, Gateway};
use crate::model::{Attachment, ConversationSummary, ReplyMeta};
use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_AUDIO_MIME: &str = "audio/mpeg";

/// Gateway backed by the chat backend's REST API
pub struct HttpGateway {
    client: Client,
    base_url: String,
    auth: Arc<AuthSession>,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        auth: Arc<AuthSession>,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::unknown(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the bearer token, send, and decode a JSON body.
    ///
    /// Any unauthorized response discards the stored token before the error
    /// is returned.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let request = match self.auth.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| from_transport(&e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| from_transport(&e))?;

        if !status.is_success() {
            let err = classify_error(status, &body);
            if err.is_unauthorized() {
                self.auth.clear().await;
            }
            return Err(err);
        }

        serde_json::from_str(&body).map_err(|e| {
            GatewayError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })
    }

    async fn file_part(attachment: &Attachment) -> Result<Part, GatewayError> {
        let bytes = tokio::fs::read(&attachment.path).await.map_err(|e| {
            GatewayError::invalid_request(format!(
                "Cannot read {}: {e}",
                attachment.path.display()
            ))
        })?;
        Part::bytes(bytes)
            .file_name(attachment.file_name.clone())
            .mime_str(&attachment.mime)
            .map_err(|e| GatewayError::invalid_request(format!("Invalid content type: {e}")))
    }

    fn chat_reply(response: ChatResponse) -> Reply {
        let audio = response.audio_base64.as_deref().and_then(|encoded| {
            match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => Some(AudioClip {
                    bytes,
                    mime: response
                        .audio_mime
                        .clone()
                        .unwrap_or_else(|| DEFAULT_AUDIO_MIME.to_string()),
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding undecodable reply audio");
                    None
                }
            }
        });
        Reply {
            text: response.reply,
            conversation_id: response.conversation_id,
            meta: ReplyMeta {
                model: response.model,
                quality: response.quality,
            },
            audio,
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send_text(&self, turn: &TextTurn) -> Result<Reply, GatewayError> {
        let request = self.client.post(self.url("/chat")).json(&ChatBody::text(turn));
        let response: ChatResponse = self.send(request).await?;
        Ok(Self::chat_reply(response))
    }

    async fn send_voice(&self, turn: &VoiceTurn) -> Result<Reply, GatewayError> {
        let request = self
            .client
            .post(self.url("/chat/voice"))
            .json(&ChatBody::voice(turn));
        let response: ChatResponse = self.send(request).await?;
        Ok(Self::chat_reply(response))
    }

    async fn ask_file(&self, ask: &FileAsk) -> Result<Reply, GatewayError> {
        let mut form = Form::new().part("file", Self::file_part(&ask.attachment).await?);
        if let Some(prompt) = &ask.prompt {
            form = form.text("prompt", prompt.clone());
        }
        if let Some(quality) = ask.options.quality.as_param() {
            form = form.text("quality", quality);
        }
        if let Some(id) = &ask.options.conversation_id {
            form = form.text("conversation_id", id.clone());
        }
        if let Some(key) = &ask.options.user_key {
            form = form.text("user_key", key.clone());
        }

        let request = self.client.post(self.url("/files/ask")).multipart(form);
        let response: FileAskResponse = self.send(request).await?;
        Ok(response.into())
    }

    async fn ingest_pdf(
        &self,
        attachment: &Attachment,
        user_key: &str,
    ) -> Result<IngestReport, GatewayError> {
        let form = Form::new()
            .part("file", Self::file_part(attachment).await?)
            .text("user_key", user_key.to_string());
        let request = self.client.post(self.url("/rag/ingest_pdf")).multipart(form);
        let response: IngestResponse = self.send(request).await?;
        if response.ok {
            Ok(IngestReport {
                chunks: response.chunks,
                doc_id: response.doc_id,
            })
        } else {
            Err(GatewayError::server_error(
                response
                    .error
                    .unwrap_or_else(|| "Ingestion failed".to_string()),
            ))
        }
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, GatewayError> {
        let request = self.client.get(self.url("/conversations"));
        let list: ConversationListResponse = self.send(request).await?;
        Ok(list)
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, GatewayError> {
        let request = self.client.get(self.url(&format!("/conversations/{id}")));
        let response: ConversationResponse = self.send(request).await?;
        Ok(response.into())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), GatewayError> {
        let request = self.client.delete(self.url(&format!("/conversations/{id}")));
        let _ack: serde_json::Value = self.send(request).await?;
        Ok(())
    }

    async fn health(&self) -> Result<(), GatewayError> {
        let request = self.client.get(self.url("/health"));
        let response: StatusResponse = self.send(request).await?;
        match response.status.as_deref() {
            Some("ok") => Ok(()),
            other => Err(GatewayError::server_error(format!(
                "Backend reported status {}",
                other.unwrap_or("unknown")
            ))),
        }
    }

    async fn login(&self, passcode: &str) -> Result<LoginGrant, GatewayError> {
        let request = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginBody { passcode });
        let response: LoginResponse = self.send(request).await?;
        self.auth.store(response.token).await;
        Ok(LoginGrant {
            expires_at: response.expires_at,
        })
    }

    async fn verify_auth(&self) -> Result<(), GatewayError> {
        let request = self.client.get(self.url("/auth/verify"));
        let response: StatusResponse = self.send(request).await?;
        if response.ok == Some(true) {
            Ok(())
        } else {
            Err(classify_error(StatusCode::UNAUTHORIZED, "Session is not valid"))
        }
    }
}
