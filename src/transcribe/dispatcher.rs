//! Single model calls with timeout, latency and cost attribution
//!
//! The dispatcher never retries; it turns exactly one backend call into one
//! immutable `ModelCallOutcome`.

use super::backend::{BackendError, ChatRequest, ErrorKind, ImageInput, ModelBackend, Usage};
use super::prompts::{build_merge_prompt, MERGE_SYSTEM, TRANSCRIBE_PROMPT, TRANSCRIBE_SYSTEM};
use super::types::{CallStatus, ModelCallOutcome, ModelConfig, PageImage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Merge replies are longer than a single transcription
const MERGE_MAX_TOKENS: u32 = 3000;
const MERGE_TEMPERATURE: f32 = 0.1;

pub struct ModelDispatcher {
    backend: Arc<dyn ModelBackend>,
}

impl ModelDispatcher {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    /// Transcribe one page with one model
    pub async fn invoke(
        &self,
        page: &PageImage,
        model: &ModelConfig,
        timeout: Duration,
        attempt: u32,
    ) -> ModelCallOutcome {
        let request = ChatRequest {
            model: model.id.clone(),
            system: TRANSCRIBE_SYSTEM.to_string(),
            prompt: TRANSCRIBE_PROMPT.to_string(),
            image: Some(ImageInput {
                bytes: Arc::clone(&page.bytes),
                content_type: page.content_type.clone(),
            }),
            max_tokens: model.max_tokens,
            temperature: model.temperature,
        };
        let outcome = self.call(request, model, timeout, attempt).await;
        debug!(
            page = %page.id,
            model = %model.id,
            attempt,
            status = ?outcome.status,
            latency_ms = outcome.latency.as_millis() as u64,
            "Model call finished"
        );
        outcome
    }

    /// Merge successful transcriptions, given as (model, text) in configured
    /// order, into one text
    pub async fn merge(
        &self,
        transcriptions: &[(String, String)],
        model: &ModelConfig,
        timeout: Duration,
        attempt: u32,
    ) -> ModelCallOutcome {
        let request = ChatRequest {
            model: model.id.clone(),
            system: MERGE_SYSTEM.to_string(),
            prompt: build_merge_prompt(transcriptions),
            image: None,
            max_tokens: model.max_tokens.max(MERGE_MAX_TOKENS),
            temperature: MERGE_TEMPERATURE,
        };
        self.call(request, model, timeout, attempt).await
    }

    async fn call(
        &self,
        request: ChatRequest,
        model: &ModelConfig,
        timeout: Duration,
        attempt: u32,
    ) -> ModelCallOutcome {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.backend.complete(request)).await;
        let latency = started.elapsed();

        let (status, text, usage, failure) = match result {
            Ok(Ok(response)) => (CallStatus::Success, Some(response.text), response.usage, None),
            Ok(Err(err)) => {
                let status = if err.is_recoverable() {
                    CallStatus::Recoverable
                } else {
                    CallStatus::Fatal
                };
                (status, None, err.usage, Some(err))
            }
            Err(_) => (
                CallStatus::Recoverable,
                None,
                None,
                Some(BackendError::new(
                    ErrorKind::Timeout,
                    format!("no reply within {:?}", timeout),
                )),
            ),
        };

        let (cost, cost_is_actual) = attribute_cost(model, usage);
        ModelCallOutcome {
            model: model.id.clone(),
            status,
            text,
            cost,
            cost_is_actual,
            latency,
            attempt,
            failure,
        }
    }
}

/// Provider-reported cost when present, otherwise the model's estimate.
/// No usage at all means nothing was billed.
fn attribute_cost(model: &ModelConfig, usage: Option<Usage>) -> (f64, bool) {
    match usage {
        Some(Usage {
            cost: Some(cost), ..
        }) => (cost, true),
        Some(usage) => (
            model
                .pricing
                .estimate(usage.prompt_tokens, usage.completion_tokens),
            false,
        ),
        None => (0.0, false),
    }
}
