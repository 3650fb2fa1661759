//! OpenAI-compatible chat completions client
//!
//! Works against OpenAI directly or any compatible gateway such as
//! OpenRouter, which also reports the real cost of each call when asked.
//! Every failure is mapped to a `BackendError` kind so the orchestrator can
//! decide whether a retry makes sense.

use super::backend::{
    classify_status, BackendError, ChatRequest, ChatResponse, ErrorKind, ModelBackend, Usage,
};
use super::http_client::model_client;
use super::prompts::looks_like_refusal;
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatibleBackend {
    client: &'static Client,
    api_key: String,
    base_url: String,
    limiter: Option<Arc<RateLimiter>>,
}

impl OpenAiCompatibleBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            client: model_client(),
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            limiter: None,
        }
    }

    /// Refuse calls locally once a model exceeds its request budget
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatibleBackend {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, BackendError> {
        if let Some(limiter) = &self.limiter {
            if let Err(wait) = limiter.check_and_record(&request.model) {
                return Err(BackendError::new(
                    ErrorKind::RateLimited,
                    format!("client-side limit for {}", request.model),
                )
                .with_retry_after(Some(wait)));
            }
        }

        let body = build_body(&request);
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let message = api_error_message(&text).unwrap_or_else(|| truncate(&text, 300));
            return Err(BackendError::new(classify_status(status.as_u16()), message)
                .with_status(status.as_u16())
                .with_retry_after(retry_after));
        }

        let response = parse_completion(&text)?;
        debug!(
            model = %request.model,
            chars = response.text.len(),
            cost = ?response.usage.and_then(|u| u.cost),
            "Completion received"
        );
        Ok(response)
    }
}

// Wire types

#[derive(Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    /// Ask OpenRouter to include the billed cost; ignored elsewhere
    usage: UsageRequest,
}

#[derive(Serialize)]
struct UsageRequest {
    include: bool,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrlContent },
}

#[derive(Serialize)]
struct ImageUrlContent {
    url: String,
    detail: &'static str,
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    cost: Option<f64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn build_body(request: &ChatRequest) -> ChatBody {
    let user_content = match &request.image {
        Some(image) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes[..]);
            MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.prompt.clone(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrlContent {
                        url: format!("data:{};base64,{}", image.content_type, encoded),
                        detail: "high",
                    },
                },
            ])
        }
        None => MessageContent::Text(request.prompt.clone()),
    };

    ChatBody {
        model: request.model.clone(),
        messages: vec![
            Message {
                role: "system",
                content: MessageContent::Text(request.system.clone()),
            },
            Message {
                role: "user",
                content: user_content,
            },
        ],
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        usage: UsageRequest { include: true },
    }
}

/// Interpret a 2xx body. Empty replies and refusals are failures that may
/// still have been billed.
fn parse_completion(body: &str) -> Result<ChatResponse, BackendError> {
    let parsed: CompletionBody = serde_json::from_str(body).map_err(|e| {
        BackendError::new(ErrorKind::Server, format!("unreadable response: {}", e))
    })?;

    let usage = parsed.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        cost: u.cost,
    });

    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(BackendError::new(ErrorKind::EmptyResponse, "empty reply").with_usage(usage));
    }
    if looks_like_refusal(&text) {
        return Err(
            BackendError::new(ErrorKind::ContentRejected, truncate(&text, 200)).with_usage(usage),
        );
    }

    Ok(ChatResponse { text, usage })
}

fn transport_error(err: reqwest::Error) -> BackendError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Network
    };
    BackendError::new(kind, err.to_string())
}

/// Retry-After in delta-seconds form; HTTP dates are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error.message)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_completion_with_openrouter_cost() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "  Dear diary\nToday  "}}],
            "usage": {"prompt_tokens": 1200, "completion_tokens": 40, "cost": 0.0031}
        }"#;
        let response = parse_completion(body).unwrap();
        assert_eq!(response.text, "Dear diary\nToday");
        assert_eq!(response.usage.unwrap().cost, Some(0.0031));
    }

    #[test]
    fn test_no_text_marker_is_a_success() {
        let body = r#"{"choices": [{"message": {"content": "[no-text]"}}]}"#;
        assert_eq!(parse_completion(body).unwrap().text, "[no-text]");
    }

    #[test]
    fn test_empty_and_refused_replies() {
        let empty = r#"{"choices": [{"message": {"content": null}}], "usage": {"prompt_tokens": 900, "completion_tokens": 0}}"#;
        let err = parse_completion(empty).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyResponse);
        assert!(err.is_recoverable());
        assert_eq!(err.usage.unwrap().prompt_tokens, 900);

        let refused = r#"{"choices": [{"message": {"content": "I'm sorry, I can't help with that."}}]}"#;
        let err = parse_completion(refused).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentRejected);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            system: "sys".to_string(),
            prompt: "read this".to_string(),
            image: Some(super::super::backend::ImageInput {
                bytes: Arc::from(&b"\x89PNG"[..]),
                content_type: "image/png".to_string(),
            }),
            max_tokens: 2048,
            temperature: 0.0,
        };
        let json = serde_json::to_value(build_body(&request)).unwrap();
        assert_eq!(json["messages"][0]["content"], "sys");
        assert_eq!(json["messages"][1]["content"][0]["type"], "text");
        let url = json["messages"][1]["content"][1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(json["usage"]["include"], true);
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_api_error_message_extraction() {
        let body = r#"{"error": {"message": "Invalid model", "type": "invalid_request_error"}}"#;
        assert_eq!(api_error_message(body).as_deref(), Some("Invalid model"));
        assert_eq!(api_error_message("<html>"), None);
    }

    #[tokio::test]
    async fn test_local_rate_limit_refuses_without_network() {
        let limiter = Arc::new(RateLimiter::per_minute(1));
        limiter.check_and_record("gpt-4o").unwrap();
        let backend = OpenAiCompatibleBackend::new("key", Some("http://127.0.0.1:9/v1/"))
            .with_rate_limiter(limiter);
        assert_eq!(backend.endpoint(), "http://127.0.0.1:9/v1/chat/completions");

        let err = backend
            .complete(ChatRequest {
                model: "gpt-4o".to_string(),
                system: String::new(),
                prompt: String::new(),
                image: None,
                max_tokens: 10,
                temperature: 0.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert!(err.retry_after.is_some());
    }
}
