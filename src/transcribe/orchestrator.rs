//! Per-page transcription state machine
//!
//! ```text
//! Pending -> Dispatching -> (Retrying <-> Dispatching) -> Merging? -> Done | Failed
//!                                                 (any state) -> Cancelled
//! ```
//!
//! Single mode calls one model and retries recoverable failures, switching to
//! the fallback model (when one is set) from the second attempt on. Cracked mode
//! fans out to every configured model at once, each retrying independently,
//! then asks the merge model to reconcile whatever succeeded. If the merge
//! fails, or the page deadline passes after some model already succeeded, the
//! longest transcription is used instead.
//!
//! Every attempt's cost goes into the shared ledger as soon as the attempt
//! finishes, so abandoned pages still account for what they spent.

use super::dispatcher::ModelDispatcher;
use super::retry::RetryPolicy;
use super::types::{
    CallStatus, ModelCallOutcome, ModelConfig, PageEvent, PageId, PageImage, PageState,
    PageStatus, TranscriptionMode, TranscriptionResult,
};
use crate::error::TranscribeError;
use crate::ledger::CostLedger;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Receives every state transition of every page
pub type EventCallback = Box<dyn Fn(&PageEvent) + Send + Sync>;

/// Deadlines for one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// One model call
    pub call: Duration,
    /// Everything for one page, retries and merge included
    pub page: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            call: Duration::from_secs(90),
            page: Duration::from_secs(600),
        }
    }
}

/// Mutable state of one page while it is being worked on. Shared by the
/// concurrent model loops of that page, so it sits behind a mutex that is
/// never held across an await.
#[derive(Default)]
struct PageProgress {
    outcomes: Vec<ModelCallOutcome>,
    merge_outcome: Option<ModelCallOutcome>,
    warnings: Vec<String>,
    /// Slot index -> (model, text) of every transcription that succeeded
    successes: BTreeMap<usize, (String, String)>,
    /// (model, attempt) currently awaiting a reply
    in_flight: BTreeMap<CallSlot, (String, u32)>,
}

struct PageContext {
    page_id: PageId,
    progress: Mutex<PageProgress>,
}

impl PageContext {
    fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            progress: Mutex::new(PageProgress::default()),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut PageProgress) -> R) -> R {
        let mut guard = self.progress.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    fn warn(&self, message: String) {
        warn!(page = %self.page_id, "{}", message);
        self.with(|p| p.warnings.push(message));
    }
}

/// Which call a retry loop is driving. Transcriptions are numbered by their
/// position in the configured model list, so a model listed twice still gets
/// two slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CallSlot {
    Transcribe(usize),
    Merge,
}

/// Text and how it was obtained, once the page finished normally
struct Verdict {
    status: PageStatus,
    text: Option<String>,
    merged: bool,
}

enum Interrupt {
    Finished(Verdict),
    TimedOut,
    Cancelled,
}

pub struct Orchestrator {
    dispatcher: ModelDispatcher,
    mode: TranscriptionMode,
    policy: RetryPolicy,
    timeouts: Timeouts,
    ledger: Arc<CostLedger>,
    events: Option<EventCallback>,
    fallback: Option<ModelConfig>,
}

impl Orchestrator {
    pub fn new(
        dispatcher: ModelDispatcher,
        mode: TranscriptionMode,
        policy: RetryPolicy,
        ledger: Arc<CostLedger>,
    ) -> Result<Self, TranscribeError> {
        if mode.models().is_empty() {
            return Err(TranscribeError::NoModels);
        }
        Ok(Self {
            dispatcher,
            mode,
            policy,
            timeouts: Timeouts::default(),
            ledger,
            events: None,
            fallback: None,
        })
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Model used for single-mode retries. Ignored in cracked mode, and when
    /// it is the configured model itself.
    pub fn with_fallback_model(mut self, model: ModelConfig) -> Self {
        self.fallback = Some(model);
        self
    }

    pub fn on_event(mut self, callback: EventCallback) -> Self {
        self.events = Some(callback);
        self
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn mode(&self) -> &TranscriptionMode {
        &self.mode
    }

    fn emit(&self, page: &PageId, state: PageState, model: Option<&str>, attempt: u32, delay: Option<Duration>) {
        if let Some(callback) = &self.events {
            callback(&PageEvent {
                page: page.clone(),
                state,
                model: model.map(str::to_string),
                attempt,
                delay,
            });
        }
    }

    /// Transcribe one page to a terminal result. Never fails as a whole:
    /// model errors, timeouts and cancellation all end up in the result.
    pub async fn transcribe(&self, page: &PageImage, cancel: &CancellationToken) -> TranscriptionResult {
        let ctx = PageContext::new(page.id.clone());
        self.emit(&page.id, PageState::Pending, None, 0, None);

        let interrupt = tokio::select! {
            biased;
            _ = cancel.cancelled() => Interrupt::Cancelled,
            finished = tokio::time::timeout(self.timeouts.page, self.run_page(page, &ctx)) => {
                match finished {
                    Ok(verdict) => Interrupt::Finished(verdict),
                    Err(_) => Interrupt::TimedOut,
                }
            }
        };

        let verdict = match interrupt {
            Interrupt::Finished(verdict) => verdict,
            Interrupt::TimedOut => {
                ctx.warn(format!(
                    "page timed out after {}s",
                    self.timeouts.page.as_secs_f64()
                ));
                self.abandon_in_flight(&ctx);
                let successes: Vec<(String, String)> =
                    ctx.with(|p| p.successes.values().cloned().collect());
                match longest(&successes) {
                    Some(text) => {
                        ctx.warn(format!(
                            "using the longest of {} finished transcription(s)",
                            successes.len()
                        ));
                        Verdict {
                            status: PageStatus::Done,
                            text: Some(text.to_string()),
                            merged: false,
                        }
                    }
                    None => Verdict {
                        status: PageStatus::Failed,
                        text: None,
                        merged: false,
                    },
                }
            }
            Interrupt::Cancelled => {
                self.abandon_in_flight(&ctx);
                Verdict {
                    status: PageStatus::Cancelled,
                    text: None,
                    merged: false,
                }
            }
        };

        self.emit(&page.id, verdict.status.into(), None, 0, None);
        let progress = ctx.progress.into_inner().unwrap_or_else(|p| p.into_inner());

        let total_cost: f64 = progress
            .outcomes
            .iter()
            .chain(progress.merge_outcome.iter())
            .map(|o| o.cost)
            .sum();

        TranscriptionResult {
            page_id: page.id.clone(),
            text: verdict.text,
            status: verdict.status,
            outcomes: progress.outcomes,
            merge_outcome: progress.merge_outcome,
            merged: verdict.merged,
            total_cost,
            warnings: progress.warnings,
        }
    }

    /// Calls still awaiting a reply become Cancelled outcomes
    fn abandon_in_flight(&self, ctx: &PageContext) {
        ctx.with(|p| {
            let abandoned: Vec<_> = std::mem::take(&mut p.in_flight).into_iter().collect();
            for (_, (model, attempt)) in abandoned {
                p.outcomes.push(ModelCallOutcome::cancelled(model, attempt));
            }
        });
    }

    async fn run_page(&self, page: &PageImage, ctx: &PageContext) -> Verdict {
        match &self.mode {
            TranscriptionMode::Single(model) => {
                let fallback = self.fallback.as_ref().filter(|f| f.id != model.id);
                let outcome = self
                    .transcribe_with_retry(page, 0, model, fallback, ctx)
                    .await;
                match outcome.usable_text() {
                    Some(text) => Verdict {
                        status: PageStatus::Done,
                        text: Some(text.to_string()),
                        merged: false,
                    },
                    None => {
                        ctx.warn(format!("{} failed after {} attempt(s)", outcome.model, outcome.attempt));
                        Verdict {
                            status: PageStatus::Failed,
                            text: None,
                            merged: false,
                        }
                    }
                }
            }
            TranscriptionMode::Cracked { models, merge_model } => {
                self.run_cracked(page, models, merge_model, ctx).await
            }
        }
    }

    async fn run_cracked(
        &self,
        page: &PageImage,
        models: &[ModelConfig],
        merge_model: &ModelConfig,
        ctx: &PageContext,
    ) -> Verdict {
        let finals = join_all(
            models
                .iter()
                .enumerate()
                .map(|(index, model)| self.transcribe_with_retry(page, index, model, None, ctx)),
        )
        .await;

        // Keyed by slot, so this is configured model order
        let successes: Vec<(String, String)> =
            ctx.with(|p| p.successes.values().cloned().collect());

        for outcome in finals.iter().filter(|o| !o.is_success()) {
            ctx.warn(format!("{} gave no transcription", outcome.model));
        }

        if successes.is_empty() {
            ctx.warn("no model produced a transcription".to_string());
            return Verdict {
                status: PageStatus::Failed,
                text: None,
                merged: false,
            };
        }

        self.emit(&ctx.page_id, PageState::Merging, Some(merge_model.id.as_str()), 0, None);
        let merge = self
            .retry_loop(ctx, CallSlot::Merge, merge_model, None, |model, attempt| {
                self.dispatcher
                    .merge(&successes, model, self.timeouts.call, attempt)
            })
            .await;

        if let Some(text) = merge.usable_text() {
            return Verdict {
                status: PageStatus::Done,
                text: Some(text.to_string()),
                merged: true,
            };
        }

        ctx.warn(format!(
            "merge with {} failed, using the longest transcription",
            merge_model.id
        ));
        Verdict {
            status: PageStatus::Done,
            text: longest(&successes).map(str::to_string),
            merged: false,
        }
    }

    async fn transcribe_with_retry(
        &self,
        page: &PageImage,
        index: usize,
        model: &ModelConfig,
        fallback: Option<&ModelConfig>,
        ctx: &PageContext,
    ) -> ModelCallOutcome {
        self.retry_loop(ctx, CallSlot::Transcribe(index), model, fallback, |model, attempt| {
            self.dispatcher
                .invoke(page, model, self.timeouts.call, attempt)
        })
        .await
    }

    /// Call until success, a fatal error, or attempts run out. Returns the
    /// last outcome; every outcome is recorded in the page context and its
    /// cost in the ledger. Attempts after the first go to `fallback` if set.
    async fn retry_loop<'m, F, Fut>(
        &self,
        ctx: &PageContext,
        slot: CallSlot,
        model: &'m ModelConfig,
        fallback: Option<&'m ModelConfig>,
        mut call: F,
    ) -> ModelCallOutcome
    where
        F: FnMut(&'m ModelConfig, u32) -> Fut,
        Fut: Future<Output = ModelCallOutcome>,
    {
        let mut attempt = 1;
        loop {
            let current = match fallback {
                Some(fallback) if attempt > 1 => fallback,
                _ => model,
            };
            if slot != CallSlot::Merge {
                self.emit(&ctx.page_id, PageState::Dispatching, Some(current.id.as_str()), attempt, None);
            }
            ctx.with(|p| p.in_flight.insert(slot, (current.id.clone(), attempt)));
            let outcome = call(current, attempt).await;
            ctx.with(|p| p.in_flight.remove(&slot));

            self.record(ctx, &outcome, slot);

            let retry = outcome.status == CallStatus::Recoverable && self.policy.allows_retry(attempt);
            if !retry {
                if outcome.status == CallStatus::Fatal {
                    if let Some(failure) = &outcome.failure {
                        ctx.warn(format!("{}: {}", current.id, failure));
                    }
                }
                return outcome;
            }

            let delay = self.policy.backoff(attempt, outcome.retry_after());
            self.emit(&ctx.page_id, PageState::Retrying, Some(current.id.as_str()), attempt, Some(delay));
            warn!(
                page = %ctx.page_id,
                model = %current.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Recoverable model failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn record(&self, ctx: &PageContext, outcome: &ModelCallOutcome, slot: CallSlot) {
        if outcome.cost > 0.0 {
            let total = self.ledger.record_for(&outcome.model, outcome.cost);
            info!(
                page = %ctx.page_id,
                model = %outcome.model,
                cost = outcome.cost,
                actual = outcome.cost_is_actual,
                running_total = total,
                "Model call billed"
            );
        }
        ctx.with(|p| match slot {
            CallSlot::Transcribe(index) => {
                if let Some(text) = outcome.usable_text() {
                    p.successes
                        .insert(index, (outcome.model.clone(), text.to_string()));
                }
                p.outcomes.push(outcome.clone());
            }
            // Earlier merge attempts are still kept among the outcomes
            CallSlot::Merge => {
                if let Some(previous) = p.merge_outcome.replace(outcome.clone()) {
                    p.outcomes.push(previous);
                }
            }
        });
    }
}

/// Longest non-blank text; ties go to the earliest entry
fn longest(transcriptions: &[(String, String)]) -> Option<&str> {
    let mut best: Option<&str> = None;
    for (_, text) in transcriptions {
        let len = text.trim().chars().count();
        if len == 0 {
            continue;
        }
        match best {
            Some(current) if current.trim().chars().count() >= len => {}
            _ => best = Some(text.as_str()),
        }
    }
    best
}
