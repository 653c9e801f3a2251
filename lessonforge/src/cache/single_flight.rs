//! Single-flight cache implementation.
//!
//! A thread-safe key/value cache with TTL-based eviction and request
//! deduplication: for a given key only one computation runs at a time, and
//! every concurrent caller receives the outcome of that computation.
//!
//! The lock is process-local. Cross-process duplicate work is prevented by
//! the persisted generation status, not by this cache.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, trace};

use super::sweeper::Sweepable;

/// Default TTL for cached values (1 hour).
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// A cached value with expiration time.
#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Shared slot that the running computation fills and waiters read.
struct InFlightState<V, E> {
    result: OnceCell<Result<V, E>>,
    notify: Notify,
}

impl<V: Clone, E: Clone> InFlightState<V, E> {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn set_result(&self, result: Result<V, E>) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> Result<V, E> {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

type InFlightRequest<V, E> = Arc<InFlightState<V, E>>;

/// Thread-safe TTL cache with single-flight computation.
///
/// Uses DashMap for concurrent access. Only successful computations populate
/// the cache; errors are handed to every waiter and then forgotten.
pub struct SingleFlightCache<V, E = crate::Error> {
    /// Cached values.
    entries: Arc<DashMap<String, CacheEntry<V>>>,
    /// In-flight computations for deduplication.
    in_flight: Arc<DashMap<String, InFlightRequest<V, E>>>,
    /// Default TTL for cache entries.
    ttl: Duration,
    /// Name used in logs and stats.
    name: &'static str,
}

impl<V, E> Clone for SingleFlightCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            in_flight: self.in_flight.clone(),
            ttl: self.ttl,
            name: self.name,
        }
    }
}

impl<V, E> SingleFlightCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a new cache with default TTL.
    pub fn new(name: &'static str) -> Self {
        Self::with_ttl(name, DEFAULT_TTL)
    }

    /// Create a new cache with specified TTL.
    pub fn with_ttl(name: &'static str, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            ttl,
            name,
        }
    }

    /// Get a cached value.
    ///
    /// Returns None if not cached or expired. Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;

        if entry.is_expired() {
            drop(entry); // Release the lock before removing
            self.entries
                .remove_if(key, |_, entry| entry.is_expired());
            return None;
        }

        Some(entry.value.clone())
    }

    /// Insert a value with the cache's default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.ttl);
    }

    /// Insert a value with an explicit TTL.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(key.into(), CacheEntry::new(value, ttl));
    }

    /// Run `compute` for `key` unless a value is cached or another caller is
    /// already computing it.
    ///
    /// The computation runs on a spawned task, so it keeps going even if
    /// every caller stops waiting. A successful result is cached with the
    /// default TTL before any waiter is woken; an error (including a panic
    /// in `compute`) is delivered to every waiter and not cached.
    pub async fn with_lock<F, Fut>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: From<tokio::task::JoinError>,
    {
        if let Some(value) = self.get(key) {
            trace!(cache = self.name, key, "single-flight cache hit");
            return Ok(value);
        }

        let (request, is_new) = self.get_or_create_in_flight(key);
        if !is_new {
            debug!(cache = self.name, key, "joining in-flight computation");
            return request.wait().await;
        }

        // A previous leader may have finished between our lookup and claim.
        if let Some(value) = self.get(key) {
            self.finish_in_flight(key, &request, Ok(value.clone()), false);
            return Ok(value);
        }

        let task = tokio::spawn(compute());
        let cache = self.clone();
        let owned_key = key.to_string();
        let leader = request.clone();
        tokio::spawn(async move {
            let result = match task.await {
                Ok(result) => result,
                Err(join_err) => Err(E::from(join_err)),
            };
            cache.finish_in_flight(&owned_key, &leader, result, true);
        });

        request.wait().await
    }

    /// Remove a cached value.
    ///
    /// An in-flight computation for the key is detached: its current waiters
    /// still receive its result, but the result is not cached.
    pub fn invalidate(&self, key: &str) {
        self.in_flight.remove(key);
        self.entries.remove(key);
    }

    /// Invalidate values whose keys match a predicate.
    pub fn invalidate_where<F>(&self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.in_flight.retain(|key, _| !predicate(key));
        self.entries.retain(|key, _| !predicate(key));
    }

    /// Get the number of cached entries (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries from the cache.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.len())
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entry_count: self.len(),
            in_flight_count: self.in_flight.len(),
            ttl: self.ttl,
        }
    }

    /// Check if there's an in-flight computation for a key.
    pub fn has_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Get or create an in-flight request for a key.
    ///
    /// Returns (request, is_new) where is_new indicates the caller owns the
    /// computation.
    fn get_or_create_in_flight(&self, key: &str) -> (InFlightRequest<V, E>, bool) {
        if let Some(existing) = self.in_flight.get(key) {
            return (existing.clone(), false);
        }

        let request = Arc::new(InFlightState::new());

        // Use entry API to handle race condition
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(request.clone());
                (request, true)
            }
        }
    }

    /// Publish the result of an in-flight request.
    ///
    /// The value is cached only while the request is still the registered
    /// one for `key`; an invalidation in the meantime detaches it.
    fn finish_in_flight(
        &self,
        key: &str,
        request: &InFlightRequest<V, E>,
        result: Result<V, E>,
        cache_success: bool,
    ) {
        if cache_success && let Ok(value) = &result {
            // Hold the in-flight guard while caching so a concurrent
            // invalidation cannot interleave between the check and the insert.
            if let Some(current) = self.in_flight.get(key)
                && Arc::ptr_eq(&current, request)
            {
                self.entries
                    .insert(key.to_string(), CacheEntry::new(value.clone(), self.ttl));
            }
        }

        self.in_flight
            .remove_if(key, |_, current| Arc::ptr_eq(current, request));
        request.set_result(result);
    }
}

impl<V, E> Sweepable for SingleFlightCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn sweep(&self) -> usize {
        self.cleanup_expired()
    }
}

/// Statistics about a single-flight cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Cache name.
    pub name: &'static str,
    /// Number of entries in the cache.
    pub entry_count: usize,
    /// Number of in-flight computations.
    pub in_flight_count: usize,
    /// TTL for cache entries.
    pub ttl: Duration,
}
