//! Shared HTTP plumbing for the upstream clients.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::resilience::RetryPolicy;
use crate::{Error, Result};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Transport settings shared by every upstream call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Per-attempt timeout for a single upstream call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Longer timeout for text generation calls.
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_generation_timeout_ms() -> u64 {
    90_000
}

fn default_pool_max_idle_per_host() -> usize {
    8
}

fn default_user_agent() -> String {
    concat!("lessonforge/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            generation_timeout_ms: default_generation_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            user_agent: default_user_agent(),
            retry: RetryPolicy::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

/// Build the shared `reqwest::Client`.
///
/// The client carries no timeout of its own; each upstream client bounds
/// its calls with [`super::with_deadline`] or [`super::call_upstream`].
pub fn build_http_client(config: &UpstreamConfig) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
    if config.pool_max_idle_per_host > 0 {
        builder = builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
    }

    builder
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))
}

/// Map a transport-level failure.
pub(crate) fn request_error(call: &str, err: reqwest::Error) -> Error {
    Error::upstream(call, err.to_string())
}

/// Map a non-success HTTP response. `429` is always quota exhaustion.
pub(crate) fn status_error(service: &str, call: &str, status: StatusCode, body: &str) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Error::quota_exceeded(service, format!("{call} returned 429"));
    }
    Error::upstream(call, format!("HTTP {status}: {}", snippet(body)))
}

fn snippet(body: &str) -> &str {
    const MAX: usize = 256;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
