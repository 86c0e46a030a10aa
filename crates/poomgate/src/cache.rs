//! TTL cache with per-key single-flight fetches.
//!
//! Lookups and in-flight registration share one synchronous lock that is
//! never held across an await. Fetches run as their own tasks so a caller
//! dropping its future neither cancels the fetch for other waiters nor skips
//! the in-flight cleanup.
//!
//! Expiry is lazy: an expired entry is bypassed and overwritten by the next
//! successful fetch, never actively evicted.

use futures::future::{BoxFuture, FutureExt, Shared};
use poomproto::ToolError;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Time source for expiry decisions.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

type PendingFetch<V> = Shared<BoxFuture<'static, Result<V, ToolError>>>;

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    in_flight: HashMap<K, PendingFetch<V>>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
}

/// Snapshot of cache activity for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub joins: u64,
}

pub struct TtlCache<K, V> {
    state: Arc<Mutex<CacheState<K, V>>>,
    counters: Counters,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            })),
            counters: Counters::default(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the live value for `key`, join an outstanding fetch, or start
    /// one with `fetch`. At most one fetch per key is outstanding at a time.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V, ToolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ToolError>> + Send + 'static,
    {
        let pending = {
            let mut state = lock(&self.state);
            let now = self.clock.now();

            if let Some(entry) = state.entries.get(&key) {
                if entry.expires_at > now {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key = ?key, "cache hit");
                    return Ok(entry.value.clone());
                }
            }

            if let Some(pending) = state.in_flight.get(&key) {
                self.counters.joins.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?key, "joining in-flight fetch");
                pending.clone()
            } else {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?key, "cache miss, fetching");
                let pending = self.spawn_fetch(key.clone(), fetch());
                state.in_flight.insert(key, pending.clone());
                pending
            }
        };

        pending.await
    }

    fn spawn_fetch<Fut>(&self, key: K, fut: Fut) -> PendingFetch<V>
    where
        Fut: Future<Output = Result<V, ToolError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let ttl = self.ttl;

        // The task blocks on the state lock until the caller has registered
        // it, so the removal below always sees its own registration.
        let handle = tokio::spawn(async move {
            let result = fut.await;

            let mut state = lock(&state);
            state.in_flight.remove(&key);
            if let Ok(value) = &result {
                let expires_at = clock.now() + ttl;
                state.entries.insert(
                    key,
                    CacheEntry {
                        value: value.clone(),
                        expires_at,
                    },
                );
            }
            result
        });

        handle
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(ToolError::internal(format!("fetch task failed: {}", e))))
            })
            .boxed()
            .shared()
    }

    /// Drop the cached value for `key`. An outstanding fetch still completes
    /// and stores its result.
    pub fn invalidate(&self, key: &K) {
        lock(&self.state).entries.remove(key);
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        CacheStats {
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
        }
    }
}

fn lock<K, V>(state: &Mutex<CacheState<K, V>>) -> MutexGuard<'_, CacheState<K, V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Hand-advanced clock for expiry tests.
    pub(crate) struct ManualClock {
        start: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            })
        }

        pub(crate) fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock().unwrap()
        }
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<String, ToolError>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(value.to_string())
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_gets_share_one_fetch() {
        let cache: Arc<TtlCache<String, String>> =
            Arc::new(TtlCache::new(Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let gets = (0..10).map(|_| {
            let cache = Arc::clone(&cache);
            let fetch = counting_fetch(&calls, "manifest");
            async move { cache.get_or_fetch("r1".to_string(), fetch).await }
        });
        let results = futures::future::join_all(gets).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref() == Ok("manifest")));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.joins, 9);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refetches_only_after_ttl() {
        let clock = ManualClock::new();
        let cache: TtlCache<String, String> =
            TtlCache::with_clock(Duration::from_secs(30), clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("r1".into(), counting_fetch(&calls, "v1"))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(29));
        let value = cache
            .get_or_fetch("r1".into(), counting_fetch(&calls, "v2"))
            .await
            .unwrap();
        assert_eq!(value, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(2));
        let value = cache
            .get_or_fetch("r1".into(), counting_fetch(&calls, "v2"))
            .await
            .unwrap();
        assert_eq!(value, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: TtlCache<String, String> = TtlCache::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ToolError::upstream_timeout("boom", true))
            }
        };
        let err = cache.get_or_fetch("r1".into(), failing).await.unwrap_err();
        assert!(err.retryable);

        let value = cache
            .get_or_fetch("r1".into(), counting_fetch(&calls, "ok"))
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_does_not_cancel_fetch() {
        let cache: Arc<TtlCache<String, String>> =
            Arc::new(TtlCache::new(Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = Arc::clone(&cache);
            let fetch = counting_fetch(&calls, "v1");
            tokio::spawn(async move { cache.get_or_fetch("r1".into(), fetch).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        let value = cache
            .get_or_fetch("r1".into(), counting_fetch(&calls, "v2"))
            .await
            .unwrap();
        assert_eq!(value, "v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache: TtlCache<String, String> = TtlCache::new(Duration::from_secs(30));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("r1".into(), counting_fetch(&calls, "v1"))
            .await
            .unwrap();
        cache.invalidate(&"r1".to_string());
        cache
            .get_or_fetch("r1".into(), counting_fetch(&calls, "v2"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
