//! Periodic eviction of expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A cache whose expired entries can be swept.
pub trait Sweepable: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Remove expired entries, returning how many were removed.
    fn sweep(&self) -> usize;
}

/// Background task that sweeps a set of caches on a fixed interval.
pub struct CacheSweeper {
    targets: Vec<Arc<dyn Sweepable>>,
    interval: Duration,
}

impl CacheSweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            targets: Vec::new(),
            interval,
        }
    }

    /// Add a cache to sweep.
    pub fn with_target(mut self, target: Arc<dyn Sweepable>) -> Self {
        self.targets.push(target);
        self
    }

    /// Sweep every target once, returning the total number of evictions.
    pub fn sweep_once(&self) -> usize {
        let mut total = 0;
        for target in &self.targets {
            let removed = target.sweep();
            if removed > 0 {
                debug!(cache = target.name(), removed, "Evicted expired cache entries");
            }
            total += removed;
        }
        total
    }

    /// Start the sweep loop until `cancel_token` is cancelled.
    pub fn start(self, cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                targets = self.targets.len(),
                interval = ?self.interval,
                "Cache sweeper started"
            );
            let mut interval = tokio::time::interval(self.interval);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Cache sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.sweep_once();
                    }
                }
            }
        })
    }
}
