pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod rate_limit;
pub mod sync;
pub mod transcribe;

pub use config::Config;
pub use error::{CatalogError, ConfigError, SyncError, TranscribeError};
pub use ledger::{format_cost, CostLedger, LedgerSnapshot};

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the RUST_LOG env filter.
///
/// Default: warn for most crates, info for ours (sync and batch summaries
/// visible). Use RUST_LOG=debug for per-call logs. Calling this twice is
/// harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,rem3_lib=info")),
        )
        .try_init();
}
