//! Shared HTTP client for model API calls
//!
//! One lazily built client for the whole process so that concurrent page
//! tasks reuse pooled connections and TLS sessions.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Global client for OpenAI-compatible endpoints.
///
/// The per-call deadline is enforced by the dispatcher; this timeout is only
/// a backstop for calls made outside it.
pub static MODEL_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .build()
        .expect("Failed to create model HTTP client")
});

#[inline]
pub fn model_client() -> &'static Client {
    &MODEL_CLIENT
}
