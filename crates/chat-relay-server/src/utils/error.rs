use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::chat::ChatOutcome;

/// Failure of a single call to the completion endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream connection failed: {0}")]
    ConnectionFailed(String),

    #[error("upstream returned HTTP {status}")]
    HttpError { status: u16, body: String },

    #[error("upstream call failed: {0}")]
    Unknown(String),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout => "timeout",
            UpstreamError::ConnectionFailed(_) => "connection_failed",
            UpstreamError::HttpError { .. } => "http_error",
            UpstreamError::Unknown(_) => "unknown",
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_connect() {
            UpstreamError::ConnectionFailed(e.to_string())
        } else {
            UpstreamError::Unknown(e.to_string())
        }
    }
}

/// 2xx payload that does not carry an assistant message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("response has no choices")]
    MissingChoices,

    #[error("first choice has no message object")]
    MissingMessage,

    #[error("message has no string content")]
    MissingContent,

    #[error("unexpected message role: {0}")]
    UnexpectedRole(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt history record: {0}")]
    CorruptRecord(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        PersistenceError::Unavailable(e.to_string())
    }
}

/// Every failure a chat exchange can end with
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Upstream(UpstreamError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable text safe to return to the caller
    pub fn public_message(&self) -> String {
        match self {
            RelayError::Validation(msg) => msg.clone(),
            RelayError::Upstream(UpstreamError::Timeout) => {
                "The AI service did not respond in time".to_string()
            }
            RelayError::Upstream(_) => "Failed to get response from AI service".to_string(),
            RelayError::Extraction(_) => "AI service returned an unusable response".to_string(),
            RelayError::Persistence(_) => "Conversation history is unavailable".to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            RelayError::Validation(msg) => {
                tracing::warn!("Validation error: {}", msg);
            }
            RelayError::Upstream(UpstreamError::HttpError { status, body }) => {
                tracing::error!(upstream_status = status, body = %body, "Upstream error");
            }
            RelayError::Upstream(e) => {
                tracing::error!(kind = e.kind(), "Upstream error: {}", e);
            }
            RelayError::Extraction(e) => {
                tracing::error!("Extraction error: {}", e);
            }
            RelayError::Persistence(e) => {
                tracing::error!("Persistence error: {}", e);
            }
        }

        (status, Json(ChatOutcome::error(self.public_message()))).into_response()
    }
}
