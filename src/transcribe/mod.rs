//! Handwriting transcription
//!
//! Page images go to one vision model (single mode) or to several at once
//! whose outputs are then merged by another model (cracked mode). Every call
//! is retried on recoverable failures, bounded by per-call and per-page
//! deadlines, and billed to a shared cost ledger.

pub mod backend;
pub mod client;
pub mod dispatcher;
pub mod http_client;
pub mod orchestrator;
pub mod pricing;
pub mod prompts;
pub mod render;
pub mod retry;
pub mod types;
pub mod worker_pool;


pub use backend::{BackendError, ChatRequest, ChatResponse, ErrorKind, ModelBackend, Usage};
pub use client::OpenAiCompatibleBackend;
pub use dispatcher::ModelDispatcher;
pub use orchestrator::{EventCallback, Orchestrator, Timeouts};
pub use pricing::{estimate_batch_cost, pricing_for, CostEstimate};
pub use render::{PageRenderer, RenderedImageDir};
pub use retry::RetryPolicy;
pub use types::{
    CallStatus, ModelCallOutcome, ModelConfig, PageEvent, PageId, PageImage, PageState,
    PageStatus, TranscriptionMode, TranscriptionResult,
};
pub use worker_pool::{BatchReport, BatchTotals, WorkerPool};

use crate::config::Config;
use crate::error::{ConfigError, TranscribeError};
use crate::ledger::CostLedger;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;

/// Orchestrator talking to the configured OpenAI-compatible endpoint
pub fn orchestrator_from_config(
    config: &Config,
    ledger: Arc<CostLedger>,
) -> Result<Orchestrator, TranscribeError> {
    let api_key = config
        .openai_api_key
        .as_deref()
        .ok_or(ConfigError::MissingApiKey("OPENAI_API_KEY"))?;

    let limiter = Arc::new(RateLimiter::per_minute(config.rate_limit_per_minute));
    let backend = OpenAiCompatibleBackend::new(api_key, config.openai_base_url.as_deref())
        .with_rate_limiter(limiter);

    let mut orchestrator = Orchestrator::new(
        ModelDispatcher::new(Arc::new(backend)),
        config.transcription_mode(),
        config.retry_policy(),
        ledger,
    )?
    .with_timeouts(Timeouts {
        call: config.call_timeout,
        page: config.page_timeout,
    });
    if let Some(fallback) = config.fallback_model() {
        orchestrator = orchestrator.with_fallback_model(fallback);
    }
    Ok(orchestrator)
}
