//! Model price table and up-front batch estimates
//!
//! Figures are USD and come from observed OpenRouter billing. They are only
//! used when the provider does not report the real cost of a call.

use super::types::{ModelPricing, TranscriptionMode};
use serde::Serialize;
use std::collections::BTreeMap;

/// Fallback for models missing from the table
const DEFAULT_PER_1K_TOKENS: f64 = 0.002;
const DEFAULT_BATCH_PER_PAGE: f64 = 0.005;
/// Text-only merge costs roughly a tenth of a vision call
const MERGE_FRACTION: f64 = 0.1;
const DEFAULT_MERGE_BASE: f64 = 0.002;

/// Typical cost of a single vision call
const PER_CALL: &[(&str, f64)] = &[
    ("gpt-4o", 0.0058),
    ("anthropic/claude-3.5-sonnet", 0.0105),
    ("anthropic/claude-3-5-sonnet:beta", 0.0105),
    ("qwen/qwen2.5-vl-32b-instruct", 0.0015),
    ("qwen/qwen2.5-vl-7b-instruct", 0.0008),
    ("qwen/qwen2.5-vl-3b-instruct", 0.0005),
    ("qwen/qwen2-vl-7b-instruct", 0.0006),
];

/// Per-page planning figures
const PER_PAGE: &[(&str, f64)] = &[
    ("gpt-4o", 0.01),
    ("anthropic/claude-3-5-sonnet:beta", 0.008),
    ("qwen/qwen2.5-vl-32b-instruct", 0.002),
    ("qwen/qwen2.5-vl-7b-instruct", 0.001),
];

fn lookup(table: &[(&str, f64)], model: &str) -> Option<f64> {
    table
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, cost)| *cost)
}

/// Pricing for a model id, falling back to the token rate for unknown models
pub fn pricing_for(model: &str) -> ModelPricing {
    ModelPricing {
        per_call: lookup(PER_CALL, model),
        per_1k_tokens: DEFAULT_PER_1K_TOKENS,
        batch_per_page: lookup(PER_PAGE, model).unwrap_or(DEFAULT_BATCH_PER_PAGE),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub pages: usize,
    pub per_model: BTreeMap<String, f64>,
    pub merge: f64,
    pub total: f64,
}

/// Rough cost of transcribing `pages` pages before starting
pub fn estimate_batch_cost(pages: usize, mode: &TranscriptionMode) -> CostEstimate {
    let mut estimate = CostEstimate {
        pages,
        ..CostEstimate::default()
    };

    for model in mode.models() {
        let cost = pages as f64 * model.pricing.batch_per_page;
        *estimate.per_model.entry(model.id.clone()).or_insert(0.0) += cost;
        estimate.total += cost;
    }

    if let TranscriptionMode::Cracked { merge_model, .. } = mode {
        let base = lookup(PER_PAGE, &merge_model.id).unwrap_or(DEFAULT_MERGE_BASE);
        estimate.merge = pages as f64 * base * MERGE_FRACTION;
        estimate.total += estimate.merge;
    }

    estimate
}
