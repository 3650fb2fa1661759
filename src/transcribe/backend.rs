//! AI model service seam
//!
//! The orchestrator talks to models only through `ModelBackend`, so the HTTP
//! client can be swapped for a scripted backend in tests.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Token usage and provider-reported cost for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Real cost in USD, when the provider reports it (OpenRouter does)
    pub cost: Option<f64>,
}

/// Image attached to a chat request
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Arc<[u8]>,
    pub content_type: String,
}

/// One chat completion: a system prompt, a user prompt, optionally an image
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub image: Option<ImageInput>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub text: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    Network,
    Server,
    EmptyResponse,
    Authentication,
    InvalidRequest,
    InsufficientCredits,
    ContentRejected,
}

/// A failed model call
#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, when there was a response
    pub status: Option<u16>,
    /// Provider hint for when to retry
    pub retry_after: Option<Duration>,
    /// Usage billed even though the call failed (refusals, empty replies)
    pub usage: Option<Usage>,
}

impl BackendError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
            usage: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout
                | ErrorKind::RateLimited
                | ErrorKind::Network
                | ErrorKind::Server
                | ErrorKind::EmptyResponse
        )
    }
}

/// Error kind for an HTTP status that is not a success
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Authentication,
        402 => ErrorKind::InsufficientCredits,
        408 => ErrorKind::Timeout,
        409 | 500..=599 => ErrorKind::Server,
        429 => ErrorKind::RateLimited,
        _ => ErrorKind::InvalidRequest,
    }
}

/// Chat-completion provider
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, BackendError>;
}
