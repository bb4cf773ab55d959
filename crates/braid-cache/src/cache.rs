//! Capability cache with TTL expiry, LRU eviction, and single-flight misses.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use braid_capability::{CancellationToken, Capability, CapabilityError, Completion};
use braid_types::TokenUsage;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{RwLock, watch};
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::fingerprint::Fingerprint;
use crate::ttl::TtlTracker;

type FlightResult = Result<Completion, CapabilityError>;
type InFlight = Arc<Mutex<HashMap<Fingerprint, watch::Sender<Option<FlightResult>>>>>;

/// Where a cached lookup's completion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Served from a stored entry; the capability was not invoked.
    Hit,
    /// This caller invoked the capability.
    Miss,
    /// Another caller's in-flight invocation produced the completion.
    Coalesced,
}

/// Completion returned by [`CapabilityCache::get_or_invoke`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCompletion {
    pub completion: Completion,
    pub source: CacheSource,
}

impl CachedCompletion {
    /// Whether the capability was invoked by this caller (and so must be
    /// charged).
    pub fn is_fresh(&self) -> bool {
        self.source == CacheSource::Miss
    }
}

/// Inner state protected by RwLock.
struct CacheInner {
    lru: LruCache<Fingerprint, Completion>,
    ttl: TtlTracker,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// Process-wide memo of capability calls.
///
/// This cache provides:
/// - TTL expiry per capability (from [`CacheConfig::ttl_for`])
/// - LRU eviction when `max_entries` is reached
/// - At most one concurrent invocation per fingerprint; identical requests
///   that arrive during a miss await the same result
/// - Failures are shared with waiting callers but never stored
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct CapabilityCache {
    inner: Arc<RwLock<CacheInner>>,
    in_flight: InFlight,
    counters: Arc<Counters>,
    config: CacheConfig,
}

impl CapabilityCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);

        let inner = CacheInner {
            lru: LruCache::new(cap),
            ttl: TtlTracker::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            config,
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether calls to `capability` should go through the cache.
    pub fn applies_to(&self, capability: &dyn Capability) -> bool {
        self.config.cache_nondeterministic || capability.kind().is_deterministic()
    }

    /// Get the number of stored completions (including expired ones not yet
    /// cleaned up).
    pub async fn len(&self) -> usize {
        self.inner.read().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.lru.is_empty()
    }

    /// Look up a live entry, dropping it if it has expired.
    pub async fn get(&self, key: &Fingerprint) -> Option<Completion> {
        let mut inner = self.inner.write().await;
        if inner.ttl.is_expired(key) {
            if inner.lru.pop(key).is_some() {
                debug!(fingerprint = %key, "Cache entry expired");
            }
            inner.ttl.remove(key);
            return None;
        }
        inner.lru.get(key).cloned()
    }

    /// Store a completion under `key` for `ttl`.
    pub async fn insert(&self, key: Fingerprint, completion: Completion, ttl: std::time::Duration) {
        let mut inner = self.inner.write().await;
        if let Some((evicted, _)) = inner.lru.push(key.clone(), completion)
            && evicted != key
        {
            trace!(fingerprint = %evicted, "Evicting LRU cache entry");
            inner.ttl.remove(&evicted);
        }
        inner.ttl.insert(key, ttl);
    }

    /// Check if a live entry exists (without touching LRU order).
    pub async fn contains(&self, key: &Fingerprint) -> bool {
        let inner = self.inner.read().await;
        inner.lru.contains(key) && !inner.ttl.is_expired(key)
    }

    /// Remove one entry.
    pub async fn invalidate(&self, key: &Fingerprint) -> bool {
        let mut inner = self.inner.write().await;
        inner.ttl.remove(key);
        inner.lru.pop(key).is_some()
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.lru.clear();
        inner.ttl.clear();
    }

    /// Drop expired entries and return how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let expired = inner.ttl.drain_expired();
        let mut count = 0;
        for key in expired {
            if inner.lru.pop(&key).is_some() {
                count += 1;
            }
        }
        if count > 0 {
            debug!(count = count, "Cleaned up expired cache entries");
        }
        count
    }

    /// Return the cached completion for this call, invoking the capability
    /// on a miss.
    ///
    /// When another caller is already computing the same fingerprint, this
    /// call waits for that result instead of invoking again. A waiter whose
    /// own `signal` fires stops waiting and reports a cancellation; if the
    /// computing caller was cancelled, a waiter that was not takes over.
    pub async fn get_or_invoke(
        &self,
        capability: &dyn Capability,
        input: Value,
        signal: &CancellationToken,
    ) -> Result<CachedCompletion, CapabilityError> {
        let key = Fingerprint::compute(capability, &input);

        loop {
            if let Some(completion) = self.get(&key).await {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(capability = %capability.name(), fingerprint = %key, "Cache hit");
                return Ok(CachedCompletion {
                    completion,
                    source: CacheSource::Hit,
                });
            }

            let mut waiter = match self.join_flight(&key) {
                Flight::Leader(guard) => {
                    return self.lead(guard, &key, capability, input, signal).await;
                }
                Flight::Follower(rx) => rx,
            };

            let shared = tokio::select! {
                landed = waiter.wait_for(Option::is_some) => match landed {
                    Ok(value) => value.clone(),
                    // Leader went away without an answer; try again.
                    Err(_) => None,
                },
                _ = signal.cancelled() => return Err(CapabilityError::cancelled()),
            };

            match shared {
                Some(Ok(completion)) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(capability = %capability.name(), fingerprint = %key, "Cache coalesced");
                    return Ok(CachedCompletion {
                        completion,
                        source: CacheSource::Coalesced,
                    });
                }
                Some(Err(err)) if !err.is_cancelled() => {
                    // The spend belongs to the caller that invoked.
                    return Err(err.with_spend(0.0, TokenUsage::default()));
                }
                _ => continue,
            }
        }
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            size: inner.lru.len(),
            capacity: self.config.max_entries,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            in_flight: self.in_flight.lock().len(),
        }
    }

    /// Compute `key` as the in-flight leader.
    ///
    /// The store is checked again first: a previous leader may have stored
    /// its completion between this caller's miss and its taking the slot.
    async fn lead(
        &self,
        guard: FlightGuard,
        key: &Fingerprint,
        capability: &dyn Capability,
        input: Value,
        signal: &CancellationToken,
    ) -> Result<CachedCompletion, CapabilityError> {
        if let Some(completion) = self.get(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(capability = %capability.name(), fingerprint = %key, "Cache hit");
            guard.complete(Ok(completion.clone()));
            return Ok(CachedCompletion {
                completion,
                source: CacheSource::Hit,
            });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(capability = %capability.name(), fingerprint = %key, "Cache miss");

        let result = capability.invoke(input, signal).await;
        if let Ok(completion) = &result {
            let ttl = self.config.ttl_for(capability.name());
            self.insert(key.clone(), completion.clone(), ttl).await;
        }
        guard.complete(result.clone());

        result.map(|completion| CachedCompletion {
            completion,
            source: CacheSource::Miss,
        })
    }

    fn join_flight(&self, key: &Fingerprint) -> Flight {
        let mut in_flight = self.in_flight.lock();
        if let Some(tx) = in_flight.get(key) {
            return Flight::Follower(tx.subscribe());
        }
        let (tx, _rx) = watch::channel(None);
        in_flight.insert(key.clone(), tx);
        Flight::Leader(FlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
            done: false,
        })
    }
}

impl std::fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum Flight {
    Leader(FlightGuard),
    Follower(watch::Receiver<Option<FlightResult>>),
}

/// Owns the in-flight slot for one fingerprint.
///
/// Dropping it without completing (the leader's future was dropped) clears
/// the slot so waiters retry.
struct FlightGuard {
    in_flight: InFlight,
    key: Fingerprint,
    done: bool,
}

impl FlightGuard {
    fn complete(mut self, result: FlightResult) {
        if let Some(tx) = self.in_flight.lock().remove(&self.key) {
            tx.send_replace(Some(result));
        }
        self.done = true;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.done {
            self.in_flight.lock().remove(&self.key);
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of stored completions.
    pub size: usize,
    /// Maximum capacity.
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Calls answered by another caller's in-flight invocation.
    pub coalesced: u64,
    /// Fingerprints currently being computed.
    pub in_flight: usize,
}
