//! Quota governance for the metered video-search API.
//!
//! - Daily call budget with a soft limit and a hard-disable cooldown
//! - Content-addressed memoization of search results
//! - Scheduled, idempotent daily reset

mod governor;
mod scheduler;

pub use governor::{QuotaConfig, QuotaGovernor, QuotaStatus};
pub use scheduler::QuotaResetScheduler;
