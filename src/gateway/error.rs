//! Gateway error types

use thiserror::Error;

/// Gateway error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Network, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::ServerError, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Forbidden, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::NotFound, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Unknown, message)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == GatewayErrorKind::Unauthorized
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Connection refused, DNS, timeouts
    Network,
    /// 5xx from the backend
    ServerError,
    /// 401; the stored token is discarded
    Unauthorized,
    /// 403; the token is valid but lacks access, so it is kept
    Forbidden,
    /// 400/422
    InvalidRequest,
    NotFound,
    Unknown,
}

/// Turn an error response into a `GatewayError`.
///
/// The backend reports failures as `{"detail": ...}` (or `{"error": ...}` on
/// the ingestion route). When present, that becomes the message; otherwise
/// the raw body is used.
pub fn classify_error(status: reqwest::StatusCode, body: &str) -> GatewayError {
    let message = error_detail(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            trimmed.to_string()
        }
    });
    match status.as_u16() {
        401 => GatewayError::unauthorized(message),
        403 => GatewayError::forbidden(message),
        400 | 422 => GatewayError::invalid_request(message),
        404 => GatewayError::not_found(message),
        500..=599 => GatewayError::server_error(message),
        _ => GatewayError::unknown(format!("HTTP {status}: {message}")),
    }
}

fn error_detail(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    match parsed.get("detail").or_else(|| parsed.get("error"))? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        // Validation errors arrive as a list of objects
        other => Some(other.to_string()),
    }
}

/// Map a transport failure from reqwest
pub fn from_transport(e: &reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        GatewayError::network(format!("Connection failed: {e}"))
    } else if e.is_decode() {
        GatewayError::unknown(format!("Failed to parse response: {e}"))
    } else {
        GatewayError::network(format!("Request failed: {e}"))
    }
}
