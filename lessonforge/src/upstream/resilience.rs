//! Timeouts and bounded retries at the external-call boundary.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Bounded exponential backoff for transient upstream failures.
///
/// Missing fields deserialize to the defaults: two retries, 500 ms doubling
/// up to 5 s, with jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Stretch each delay by up to a quarter so concurrent callers spread out.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sleep before retry `retry` (0-indexed): the base delay doubled per
    /// retry, capped at `max_delay_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let capped = self
            .base_delay_ms
            .saturating_mul(1u64 << retry.min(20))
            .min(self.max_delay_ms);
        let extra = if self.jitter {
            rand::rng().random_range(0..=capped / 4)
        } else {
            0
        };
        Duration::from_millis(capped + extra)
    }

    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }
}

/// Run an upstream call with a per-attempt timeout and bounded retries.
///
/// Only transient failures (upstream errors and timeouts) are retried.
/// Quota exhaustion and every other error return immediately.
pub async fn call_upstream<T, F, Fut>(
    call: &'static str,
    timeout: Duration,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0u32;
    loop {
        let err = match with_deadline(call, timeout, op()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_transient() || !policy.allows_retry(retries) {
            warn!(call, attempts = retries + 1, error = %err, "upstream call failed");
            return Err(err);
        }
        let pause = policy.backoff(retries);
        retries += 1;
        debug!(call, retries, pause_ms = pause.as_millis() as u64, error = %err, "retrying upstream call");
        tokio::time::sleep(pause).await;
    }
}

/// Bound a single collaborator call by `timeout` without retrying.
pub async fn with_deadline<T, Fut>(call: &'static str, timeout: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::UpstreamTimeout {
            call: call.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
