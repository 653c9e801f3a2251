//! Scheduled daily quota reset.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::QuotaGovernor;

/// Default interval between boundary checks (1 minute).
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that resets a governor when the daily window rolls over.
///
/// The governor's reset is idempotent, so a check interval shorter than the
/// window is harmless.
pub struct QuotaResetScheduler {
    governor: Arc<QuotaGovernor>,
    check_interval: Duration,
}

impl QuotaResetScheduler {
    pub fn new(governor: Arc<QuotaGovernor>) -> Self {
        Self::with_interval(governor, DEFAULT_CHECK_INTERVAL)
    }

    pub fn with_interval(governor: Arc<QuotaGovernor>, check_interval: Duration) -> Self {
        Self {
            governor,
            check_interval,
        }
    }

    /// Run one boundary check now.
    pub fn check_now(&self) -> bool {
        self.governor.reset_if_new_window(Utc::now())
    }

    /// Start the scheduler loop until `cancel_token` is cancelled.
    pub fn start(self, cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Quota reset scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.check_now();
                    }
                }
            }
        })
    }
}
