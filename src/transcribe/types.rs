//! Transcription data types

use super::backend::BackendError;
use super::pricing::pricing_for;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One page of one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageId {
    pub document_id: String,
    /// Zero-based page index
    pub page: u32,
}

impl PageId {
    pub fn new(document_id: impl Into<String>, page: u32) -> Self {
        Self {
            document_id: document_id.into(),
            page,
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.page)
    }
}

/// Rendered page ready for a vision model. The bytes are shared, not copied,
/// between concurrent model calls.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub id: PageId,
    pub bytes: Arc<[u8]>,
    pub content_type: String,
}

impl PageImage {
    pub fn new(id: PageId, bytes: impl Into<Arc<[u8]>>, content_type: impl Into<String>) -> Self {
        Self {
            id,
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

/// Pricing metadata used when the provider does not report a cost
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    /// Typical cost of one vision call, when known for this model
    pub per_call: Option<f64>,
    /// Fallback rate over prompt + completion tokens
    pub per_1k_tokens: f64,
    /// Per-page figure used for up-front batch estimates
    pub batch_per_page: f64,
}

impl ModelPricing {
    /// Estimated cost of one call with the given token usage
    pub fn estimate(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        match self.per_call {
            Some(cost) => cost,
            None => (prompt_tokens + completion_tokens) as f64 / 1000.0 * self.per_1k_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub id: String,
    pub pricing: ModelPricing,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ModelConfig {
    /// Model with pricing looked up from the built-in table
    pub fn new(id: impl AsRef<str>) -> Self {
        let id = id.as_ref();
        Self {
            id: id.to_string(),
            pricing: pricing_for(id),
            max_tokens: 2048,
            temperature: 0.0,
        }
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionMode {
    /// One model, retried on recoverable failures
    Single(ModelConfig),
    /// Every model on every page, then a text-only merge
    Cracked {
        models: Vec<ModelConfig>,
        merge_model: ModelConfig,
    },
}

impl TranscriptionMode {
    /// Vision models called for each page
    pub fn models(&self) -> &[ModelConfig] {
        match self {
            TranscriptionMode::Single(model) => std::slice::from_ref(model),
            TranscriptionMode::Cracked { models, .. } => models,
        }
    }

    pub fn is_cracked(&self) -> bool {
        matches!(self, TranscriptionMode::Cracked { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    /// Worth retrying: timeouts, throttling, server errors, empty replies
    Recoverable,
    /// Retrying cannot help: credentials, bad request, refusal
    Fatal,
    /// Abandoned because the batch was cancelled or the page timed out
    Cancelled,
}

/// Result of one model call. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCallOutcome {
    pub model: String,
    pub status: CallStatus,
    pub text: Option<String>,
    /// USD; zero when nothing was billed
    pub cost: f64,
    /// Reported by the provider rather than estimated
    pub cost_is_actual: bool,
    pub latency: Duration,
    /// 1-based attempt number for this model on this page
    pub attempt: u32,
    pub failure: Option<BackendError>,
}

impl ModelCallOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }

    /// Outcome for a call that was still in flight when abandoned
    pub fn cancelled(model: impl Into<String>, attempt: u32) -> Self {
        Self {
            model: model.into(),
            status: CallStatus::Cancelled,
            text: None,
            cost: 0.0,
            cost_is_actual: false,
            latency: Duration::ZERO,
            attempt,
            failure: None,
        }
    }

    /// Provider hint for when to try again
    pub fn retry_after(&self) -> Option<Duration> {
        self.failure.as_ref().and_then(|f| f.retry_after)
    }

    /// Successful, non-blank text
    pub fn usable_text(&self) -> Option<&str> {
        if !self.is_success() {
            return None;
        }
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Terminal state of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Done,
    Failed,
    Cancelled,
}

/// Orchestrator state, reported through `PageEvent`s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Pending,
    Dispatching,
    Retrying,
    Merging,
    Done,
    Failed,
    Cancelled,
}

impl From<PageStatus> for PageState {
    fn from(status: PageStatus) -> Self {
        match status {
            PageStatus::Done => PageState::Done,
            PageStatus::Failed => PageState::Failed,
            PageStatus::Cancelled => PageState::Cancelled,
        }
    }
}

/// Progress notification for one page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEvent {
    pub page: PageId,
    pub state: PageState,
    pub model: Option<String>,
    pub attempt: u32,
    /// Backoff before the next attempt, for `Retrying`
    pub delay: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    pub page_id: PageId,
    pub text: Option<String>,
    pub status: PageStatus,
    /// Every transcription attempt, in completion order
    pub outcomes: Vec<ModelCallOutcome>,
    /// Final merge attempt in cracked mode
    pub merge_outcome: Option<ModelCallOutcome>,
    /// Text came from the merge model rather than a fallback
    pub merged: bool,
    /// Sum of every attempt's cost, merge included
    pub total_cost: f64,
    pub warnings: Vec<String>,
}

impl TranscriptionResult {
    /// A page that never started
    pub fn cancelled(page_id: PageId) -> Self {
        Self {
            page_id,
            text: None,
            status: PageStatus::Cancelled,
            outcomes: Vec::new(),
            merge_outcome: None,
            merged: false,
            total_cost: 0.0,
            warnings: Vec::new(),
        }
    }

    /// A page whose task died before producing a result
    pub fn failed(page_id: PageId, warning: impl Into<String>) -> Self {
        Self {
            status: PageStatus::Failed,
            warnings: vec![warning.into()],
            ..Self::cancelled(page_id)
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == PageStatus::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId::new("abc", 3).to_string(), "abc#3");
    }

    #[test]
    fn test_single_mode_models() {
        let mode = TranscriptionMode::Single(ModelConfig::new("gpt-4o"));
        assert_eq!(mode.models().len(), 1);
        assert!(!mode.is_cracked());
    }

    #[test]
    fn test_pricing_estimate_prefers_per_call() {
        let known = ModelPricing {
            per_call: Some(0.0058),
            per_1k_tokens: 0.002,
            batch_per_page: 0.01,
        };
        assert_eq!(known.estimate(5_000, 5_000), 0.0058);

        let unknown = ModelPricing { per_call: None, ..known };
        assert!((unknown.estimate(1_500, 500) - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_usable_text_ignores_blank_and_failed() {
        let mut outcome = ModelCallOutcome::cancelled("m", 1);
        outcome.text = Some("hello".into());
        assert!(outcome.usable_text().is_none());
        outcome.status = CallStatus::Success;
        assert_eq!(outcome.usable_text(), Some("hello"));
        outcome.text = Some("  \n".into());
        assert!(outcome.usable_text().is_none());
    }
}
