//! Running API spend for one process run
//!
//! One ledger per run, shared by `Arc` across every page task. All mutation
//! goes through a single mutex so concurrent `record` calls serialize.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct LedgerInner {
    total: f64,
    calls: u64,
    by_model: BTreeMap<String, f64>,
}

/// Point-in-time copy of the ledger for display
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub total: f64,
    pub calls: u64,
    pub by_model: BTreeMap<String, f64>,
}

/// Thread-safe cost accumulator (USD)
#[derive(Debug, Default)]
pub struct CostLedger {
    inner: Mutex<LedgerInner>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an amount not attributed to a model; returns the running total
    pub fn record(&self, amount: f64) -> f64 {
        self.record_entry(None, amount)
    }

    /// Add an amount for a model; returns the running total
    pub fn record_for(&self, model: &str, amount: f64) -> f64 {
        self.record_entry(Some(model), amount)
    }

    fn record_entry(&self, model: Option<&str>, amount: f64) -> f64 {
        // A poisoned lock still holds a valid running total
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());

        if !amount.is_finite() || amount < 0.0 {
            warn!(amount, model = model.unwrap_or("-"), "Ignoring invalid ledger amount");
            return inner.total;
        }

        inner.total += amount;
        inner.calls += 1;
        if let Some(model) = model {
            *inner.by_model.entry(model.to_string()).or_insert(0.0) += amount;
        }

        debug!(amount, total = inner.total, "Recorded cost");
        inner.total
    }

    /// Current running total
    pub fn snapshot(&self) -> f64 {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).total
    }

    /// Running total plus per-model breakdown
    pub fn detailed_snapshot(&self) -> LedgerSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        LedgerSnapshot {
            total: inner.total,
            calls: inner.calls,
            by_model: inner.by_model.clone(),
        }
    }
}

/// Format a USD amount the way progress output shows it
pub fn format_cost(amount: f64) -> String {
    format!("${:.4}", amount)
}
