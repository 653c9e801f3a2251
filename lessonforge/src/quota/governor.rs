//! Daily quota ledger and result memoization for a metered API.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::Sweepable;
use crate::domain::text::normalize_query;

/// Configuration for a quota governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Name of the metered service, used in logs and errors.
    #[serde(default = "default_service")]
    pub service: String,
    /// Maximum calls per daily window.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// Fraction of `daily_limit` at which the soft limit engages.
    #[serde(default = "default_soft_limit_ratio")]
    pub soft_limit_ratio: f64,
    /// How long calls stay disabled once the limit is hit, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// TTL of memoized results, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// UTC hour at which the daily window starts.
    #[serde(default)]
    pub reset_hour_utc: u32,
}

fn default_service() -> String {
    "video_search".to_string()
}

fn default_daily_limit() -> u32 {
    100
}

fn default_soft_limit_ratio() -> f64 {
    0.8
}

fn default_cooldown_ms() -> u64 {
    12 * 60 * 60 * 1000
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            daily_limit: default_daily_limit(),
            soft_limit_ratio: default_soft_limit_ratio(),
            cooldown_ms: default_cooldown_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            reset_hour_utc: 0,
        }
    }
}

impl QuotaConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.daily_limit == 0 {
            return Err(crate::Error::config("quota daily_limit must be positive"));
        }
        if !self.soft_limit_ratio.is_finite()
            || self.soft_limit_ratio <= 0.0
            || self.soft_limit_ratio > 1.0
        {
            return Err(crate::Error::config(format!(
                "quota soft_limit_ratio must be in (0, 1], got {}",
                self.soft_limit_ratio
            )));
        }
        if self.reset_hour_utc > 23 {
            return Err(crate::Error::config(format!(
                "quota reset_hour_utc must be 0-23, got {}",
                self.reset_hour_utc
            )));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Snapshot of the ledger, suitable for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub service: String,
    pub request_count: u32,
    pub daily_limit: u32,
    pub soft_limited: bool,
    pub available: bool,
    pub disabled_until: Option<DateTime<Utc>>,
    pub window_start: DateTime<Utc>,
}

#[derive(Debug)]
struct QuotaLedger {
    request_count: u32,
    window_start: DateTime<Utc>,
    disabled_until: Option<DateTime<Utc>>,
    soft_limit_logged: bool,
}

/// A memoized result.
#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    expires_at: Instant,
}

/// Tracks the daily budget of a metered API.
///
/// State is in-memory and advisory: a restart starts from zero, so callers
/// must also report remote quota errors through [`QuotaGovernor::mark_exhausted`].
#[derive(Debug)]
pub struct QuotaGovernor {
    config: QuotaConfig,
    ledger: Mutex<QuotaLedger>,
    cache: DashMap<String, CachedValue>,
}

impl QuotaGovernor {
    /// Create a new governor with the given configuration.
    pub fn new(config: QuotaConfig) -> Self {
        let window_start = window_start_for(Utc::now(), config.reset_hour_utc);
        Self {
            config,
            ledger: Mutex::new(QuotaLedger {
                request_count: 0,
                window_start,
                disabled_until: None,
                soft_limit_logged: false,
            }),
            cache: DashMap::new(),
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Record a call that was made against the metered API.
    ///
    /// Reaching `daily_limit` disables further calls for the cooldown. The
    /// count saturates at `daily_limit + 1`.
    pub fn record_call(&self) {
        let now = Utc::now();
        let mut ledger = self.ledger.lock();
        self.roll_window(&mut ledger, now);
        ledger.request_count = ledger
            .request_count
            .saturating_add(1)
            .min(self.config.daily_limit.saturating_add(1));
        self.after_increment(&mut ledger, now);
    }

    /// Atomically check availability and record a call.
    ///
    /// Returns `false` without recording when the quota is unavailable, so
    /// concurrent callers can never push the count past `daily_limit`.
    pub fn try_acquire(&self) -> bool {
        let now = Utc::now();
        let mut ledger = self.ledger.lock();
        self.roll_window(&mut ledger, now);
        if !self.available_locked(&mut ledger, now) {
            return false;
        }
        ledger.request_count += 1;
        self.after_increment(&mut ledger, now);
        true
    }

    /// Whether quota-gated calls may proceed.
    pub fn is_available(&self) -> bool {
        let now = Utc::now();
        let mut ledger = self.ledger.lock();
        self.roll_window(&mut ledger, now);
        self.available_locked(&mut ledger, now)
    }

    /// Whether usage has crossed the soft-limit threshold.
    pub fn is_soft_limited(&self) -> bool {
        let ledger = self.ledger.lock();
        self.over_soft_limit(ledger.request_count)
    }

    /// Disable calls immediately after the provider reported exhaustion.
    pub fn mark_exhausted(&self, reason: &str) {
        let now = Utc::now();
        let mut ledger = self.ledger.lock();
        let until = now + self.cooldown();
        let already_disabled = ledger.disabled_until.is_some_and(|t| t > now);
        ledger.disabled_until = Some(until);
        if !already_disabled {
            warn!(
                service = %self.config.service,
                reason,
                disabled_until = %until,
                "Provider reported quota exhaustion, disabling calls"
            );
        }
    }

    /// Reset the ledger if `now` falls in a later daily window than the
    /// current one. Running it again within the same window is a no-op.
    pub fn reset_if_new_window(&self, now: DateTime<Utc>) -> bool {
        let mut ledger = self.ledger.lock();
        self.roll_window(&mut ledger, now)
    }

    /// Get a memoized result for a query.
    pub fn cache_get(&self, query: &str) -> Option<String> {
        let key = cache_key(query);
        let entry = self.cache.get(&key)?;
        if Instant::now() >= entry.expires_at {
            drop(entry);
            self.cache
                .remove_if(&key, |_, entry| Instant::now() >= entry.expires_at);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Memoize a result for a query.
    pub fn cache_set(&self, query: &str, value: impl Into<String>) {
        self.cache.insert(
            cache_key(query),
            CachedValue {
                value: value.into(),
                expires_at: Instant::now() + self.config.cache_ttl(),
            },
        );
    }

    /// Remove expired memoized results.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.cache.len();
        let now = Instant::now();
        self.cache.retain(|_, entry| now < entry.expires_at);
        before.saturating_sub(self.cache.len())
    }

    /// Get a snapshot of the ledger.
    pub fn status(&self) -> QuotaStatus {
        let now = Utc::now();
        let mut ledger = self.ledger.lock();
        self.roll_window(&mut ledger, now);
        let available = self.available_locked(&mut ledger, now);
        QuotaStatus {
            service: self.config.service.clone(),
            request_count: ledger.request_count,
            daily_limit: self.config.daily_limit,
            soft_limited: self.over_soft_limit(ledger.request_count),
            available,
            disabled_until: ledger.disabled_until,
            window_start: ledger.window_start,
        }
    }

    fn cooldown(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.config.cooldown()).unwrap_or(ChronoDuration::hours(12))
    }

    fn over_soft_limit(&self, count: u32) -> bool {
        count as f64 >= self.config.daily_limit as f64 * self.config.soft_limit_ratio
    }

    fn available_locked(&self, ledger: &mut QuotaLedger, now: DateTime<Utc>) -> bool {
        if let Some(until) = ledger.disabled_until {
            if now < until {
                return false;
            }
            // The count only resets with the daily window, so a spent
            // budget stays spent after the cooldown.
            ledger.disabled_until = None;
            info!(
                service = %self.config.service,
                count = ledger.request_count,
                "Quota cooldown elapsed"
            );
        }
        ledger.request_count < self.config.daily_limit
    }

    fn after_increment(&self, ledger: &mut QuotaLedger, now: DateTime<Utc>) {
        let count = ledger.request_count;
        let limit = self.config.daily_limit;

        if !ledger.soft_limit_logged && self.over_soft_limit(count) {
            ledger.soft_limit_logged = true;
            info!(
                service = %self.config.service,
                count,
                limit,
                "Quota soft limit reached, preferring cached results"
            );
        }

        if count >= limit && ledger.disabled_until.is_none() {
            let until = now + self.cooldown();
            ledger.disabled_until = Some(until);
            warn!(
                service = %self.config.service,
                count,
                limit,
                disabled_until = %until,
                "Daily quota reached, disabling calls"
            );
        } else {
            debug!(service = %self.config.service, count, limit, "Quota call recorded");
        }
    }

    fn roll_window(&self, ledger: &mut QuotaLedger, now: DateTime<Utc>) -> bool {
        let start = window_start_for(now, self.config.reset_hour_utc);
        if start <= ledger.window_start {
            return false;
        }
        info!(
            service = %self.config.service,
            previous_count = ledger.request_count,
            window_start = %start,
            "Daily quota window reset"
        );
        ledger.window_start = start;
        ledger.request_count = 0;
        ledger.disabled_until = None;
        ledger.soft_limit_logged = false;
        true
    }
}

impl Sweepable for QuotaGovernor {
    fn name(&self) -> &'static str {
        "quota_results"
    }

    fn sweep(&self) -> usize {
        self.cleanup_expired()
    }
}

/// SHA-256 of the normalized query, hex encoded.
pub(crate) fn cache_key(query: &str) -> String {
    hex::encode(Sha256::digest(normalize_query(query).as_bytes()))
}

/// Start of the daily window containing `now`.
fn window_start_for(now: DateTime<Utc>, reset_hour_utc: u32) -> DateTime<Utc> {
    let reset_time =
        NaiveTime::from_hms_opt(reset_hour_utc.min(23), 0, 0).unwrap_or_default();
    let today = now.date_naive().and_time(reset_time).and_utc();
    if now >= today {
        today
    } else {
        today - ChronoDuration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn governor(limit: u32, cooldown_ms: u64) -> QuotaGovernor {
        QuotaGovernor::new(QuotaConfig {
            daily_limit: limit,
            cooldown_ms,
            ..Default::default()
        })
    }

    #[test]
    fn test_config_validation() {
        assert!(QuotaConfig::default().validate().is_ok());
        assert!(
            QuotaConfig {
                daily_limit: 0,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            QuotaConfig {
                soft_limit_ratio: 1.5,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            QuotaConfig {
                reset_hour_utc: 24,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_unavailable_after_limit() {
        let governor = governor(3, 60_000);
        for _ in 0..3 {
            assert!(governor.is_available());
            governor.record_call();
        }
        assert!(!governor.is_available());
        assert!(governor.status().disabled_until.is_some());
    }

    #[test]
    fn test_count_never_exceeds_limit_plus_one() {
        let governor = governor(2, 60_000);
        for _ in 0..10 {
            governor.record_call();
        }
        assert_eq!(governor.status().request_count, 3);
    }

    #[test]
    fn test_try_acquire_stops_at_limit() {
        let governor = governor(3, 60_000);
        let granted = (0..10).filter(|_| governor.try_acquire()).count();
        assert_eq!(granted, 3);
        assert_eq!(governor.status().request_count, 3);
    }

    #[test]
    fn test_try_acquire_concurrent() {
        let governor = Arc::new(governor(50, 60_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let governor = governor.clone();
                std::thread::spawn(move || (0..20).filter(|_| governor.try_acquire()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert!(!governor.is_available());
    }

    #[test]
    fn test_remote_exhaustion_reenabled_after_cooldown() {
        let governor = governor(10, 20);
        assert!(governor.try_acquire());
        governor.mark_exhausted("quotaExceeded");
        assert!(!governor.is_available());

        std::thread::sleep(Duration::from_millis(40));

        assert!(governor.is_available());
        assert_eq!(governor.status().request_count, 1);
        assert!(governor.status().disabled_until.is_none());
    }

    #[test]
    fn test_cooldown_does_not_refill_spent_budget() {
        let governor = governor(3, 20);
        let granted = (0..10).filter(|_| governor.try_acquire()).count();
        assert_eq!(granted, 3);

        for _ in 0..2 {
            std::thread::sleep(Duration::from_millis(40));
            assert_eq!((0..10).filter(|_| governor.try_acquire()).count(), 0);
            assert!(!governor.is_available());
        }
        assert_eq!(governor.status().request_count, 3);

        let tomorrow = Utc::now() + ChronoDuration::days(1);
        assert!(governor.reset_if_new_window(tomorrow));
        assert!(governor.try_acquire());
    }

    #[test]
    fn test_soft_limit() {
        let governor = QuotaGovernor::new(QuotaConfig {
            daily_limit: 10,
            soft_limit_ratio: 0.5,
            ..Default::default()
        });
        for _ in 0..4 {
            governor.record_call();
        }
        assert!(!governor.is_soft_limited());
        governor.record_call();
        assert!(governor.is_soft_limited());
        assert!(governor.is_available());
    }

    #[test]
    fn test_mark_exhausted_disables_immediately() {
        let governor = governor(100, 60_000);
        assert!(governor.is_available());
        governor.mark_exhausted("HTTP 429");
        assert!(!governor.is_available());
        assert!(!governor.try_acquire());
        assert_eq!(governor.status().request_count, 0);
    }

    #[test]
    fn test_reset_is_idempotent_per_window() {
        let governor = governor(2, 60_000);
        governor.record_call();
        governor.record_call();
        assert!(!governor.is_available());

        let tomorrow = Utc::now() + ChronoDuration::days(1);
        assert!(governor.reset_if_new_window(tomorrow));
        assert!(!governor.reset_if_new_window(tomorrow));
        assert!(!governor.reset_if_new_window(tomorrow + ChronoDuration::minutes(5)));

        let status = governor.status();
        assert_eq!(status.request_count, 0);
        assert!(status.disabled_until.is_none());
    }

    #[test]
    fn test_window_start_respects_reset_hour() {
        let at = Utc.with_ymd_and_hms(2026, 3, 10, 5, 30, 0).unwrap();
        assert_eq!(
            window_start_for(at, 0),
            Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(
            window_start_for(at, 8),
            Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_result_cache_normalizes_queries() {
        let governor = QuotaGovernor::new(QuotaConfig::default());
        governor.cache_set("Binary Search Trees", "vid-1");
        assert_eq!(
            governor.cache_get("  binary   search trees").as_deref(),
            Some("vid-1")
        );
        assert!(governor.cache_get("graphs").is_none());
        assert_eq!(cache_key("A  b"), cache_key("a b"));
        assert_eq!(cache_key("a b").len(), 64);
    }

    #[test]
    fn test_result_cache_expires() {
        let governor = QuotaGovernor::new(QuotaConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        });
        governor.cache_set("q", "v");
        assert!(governor.cache_get("q").is_none());
        governor.cache_set("q", "v");
        assert_eq!(governor.cleanup_expired(), 1);
    }
}
