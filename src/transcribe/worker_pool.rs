//! Bounded parallel transcription of a batch of pages
//!
//! One spawned task per page, at most `concurrency` of them past the
//! semaphore at a time. Results are collected as they complete and put back
//! in submission order.

use super::orchestrator::Orchestrator;
use super::types::{PageId, PageImage, PageStatus, TranscriptionResult};
use crate::error::TranscribeError;
use crate::ledger::format_cost;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// Progress callback: (pages finished, pages submitted)
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTotals {
    pub pages: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_cost: f64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// One result per submitted page, in submission order
    pub per_page: Vec<TranscriptionResult>,
    pub totals: BatchTotals,
    #[serde(skip)]
    positions: HashMap<PageId, usize>,
}

impl BatchReport {
    fn new(batch_id: Uuid, per_page: Vec<TranscriptionResult>, elapsed: Duration) -> Self {
        let mut totals = BatchTotals {
            pages: per_page.len(),
            elapsed,
            ..BatchTotals::default()
        };
        for result in &per_page {
            match result.status {
                PageStatus::Done => totals.done += 1,
                PageStatus::Failed => totals.failed += 1,
                PageStatus::Cancelled => totals.cancelled += 1,
            }
            totals.total_cost += result.total_cost;
        }
        // First occurrence wins if a page was submitted twice
        let mut positions = HashMap::with_capacity(per_page.len());
        for (idx, result) in per_page.iter().enumerate() {
            positions.entry(result.page_id.clone()).or_insert(idx);
        }
        Self {
            batch_id,
            per_page,
            totals,
            positions,
        }
    }

    pub fn get(&self, id: &PageId) -> Option<&TranscriptionResult> {
        self.positions.get(id).map(|&idx| &self.per_page[idx])
    }

    pub fn summary(&self) -> String {
        format!(
            "{} pages: {} done, {} failed, {} cancelled, {} in {:.1}s",
            self.totals.pages,
            self.totals.done,
            self.totals.failed,
            self.totals.cancelled,
            format_cost(self.totals.total_cost),
            self.totals.elapsed.as_secs_f64()
        )
    }
}

pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Use an externally owned token, e.g. one tied to Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Token that stops the batch: no new pages start, in-flight calls are
    /// abandoned, finished results are kept
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(
        &self,
        pages: Vec<PageImage>,
        concurrency: usize,
    ) -> Result<BatchReport, TranscribeError> {
        if concurrency == 0 {
            return Err(TranscribeError::InvalidConcurrency(concurrency));
        }

        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        let total = pages.len();
        info!(%batch_id, pages = total, concurrency, "Starting transcription batch");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let ids: Vec<PageId> = pages.iter().map(|p| p.id.clone()).collect();
        let mut futures = FuturesUnordered::new();

        for (idx, page) in pages.into_iter().enumerate() {
            let sem = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&self.orchestrator);
            let cancel = self.cancel.clone();

            futures.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = sem.acquire_owned() => permit.ok(),
                };
                let result = match permit {
                    Some(_permit) if !cancel.is_cancelled() => {
                        orchestrator.transcribe(&page, &cancel).await
                    }
                    _ => TranscriptionResult::cancelled(page.id.clone()),
                };
                (idx, result)
            }));
        }

        let mut results: Vec<Option<TranscriptionResult>> = vec![None; total];
        let mut finished = 0;

        while let Some(joined) = futures.next().await {
            finished += 1;
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                // The slot stays empty and is reported as failed below
                Err(e) => error!(%batch_id, error = %e, "Page task failed"),
            }
            if let Some(ref callback) = self.progress {
                callback(finished, total);
            }
        }

        let per_page: Vec<TranscriptionResult> = results
            .into_iter()
            .zip(ids)
            .map(|(result, id)| {
                result.unwrap_or_else(|| TranscriptionResult::failed(id, "page task panicked"))
            })
            .collect();

        let report = BatchReport::new(batch_id, per_page, started.elapsed());
        info!(%batch_id, ledger_total = self.orchestrator.ledger().snapshot(), "{}", report.summary());
        Ok(report)
    }
}
