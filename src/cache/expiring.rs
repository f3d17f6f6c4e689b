// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TTL + LRU in-process cache.
//!
//! Entries expire `ttl` after they were written and are treated as absent
//! from then on. When the entry count exceeds `capacity`, the least recently
//! accessed entries are evicted. There is no background sweeper: expired
//! entries are dropped when `get` finds them, and a full sweep runs inline on
//! whichever call notices the cleanup interval has elapsed.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use utoipa::ToSchema;

use crate::clock::{Clock, SystemClock};

/// A cached value with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
}

/// Hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed because they expired or the cache was over capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, `0.0` before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Inner<K: Hash + Eq, V> {
    // Unbounded: the capacity bound is enforced by hand so evictions can be
    // counted.
    entries: LruCache<K, CacheEntry<V>>,
    stats: CacheStats,
    last_cleanup: Instant,
}

pub struct ExpiringCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    capacity: usize,
    cleanup_interval: Duration,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache on the system clock. The cleanup interval defaults to
    /// the TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                stats: CacheStats::default(),
                last_cleanup: now,
            }),
            clock,
            ttl,
            capacity: capacity.max(1),
            cleanup_interval: ttl,
        }
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // A panic while holding the lock cannot leave the map half-updated
        // in a way that matters for a cache; keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a fresh value.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_with_age(key).map(|(value, _)| value)
    }

    /// Look up a fresh value together with its age.
    pub fn get_with_age<Q>(&self, key: &Q) -> Option<(V, Duration)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.cleanup_if_due(&mut inner, now);

        let Some(created_at) = inner.entries.peek(key).map(|entry| entry.created_at) else {
            inner.stats.misses += 1;
            return None;
        };

        let age = now.saturating_duration_since(created_at);
        if age >= self.ttl {
            inner.entries.pop(key);
            inner.stats.evictions += 1;
            inner.stats.misses += 1;
            return None;
        }

        let value = inner.entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = now;
            entry.value.clone()
        });
        inner.stats.hits += 1;
        value.map(|v| (v, age))
    }

    /// Insert or replace a value. Replacing resets the entry's age.
    pub fn put(&self, key: K, value: V) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.entries.put(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_accessed_at: now,
            },
        );

        if inner.entries.len() > self.capacity {
            // Expired entries go first, then least recently accessed ones.
            self.sweep(&mut inner, now);
            while inner.entries.len() > self.capacity {
                if inner.entries.pop_lru().is_none() {
                    break;
                }
                inner.stats.evictions += 1;
            }
        } else {
            self.cleanup_if_due(&mut inner, now);
        }
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().entries.pop(key).map(|entry| entry.value)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.sweep(&mut inner, now)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cleanup_if_due(&self, inner: &mut Inner<K, V>, now: Instant) {
        if now.saturating_duration_since(inner.last_cleanup) >= self.cleanup_interval {
            self.sweep(inner, now);
        }
    }

    fn sweep(&self, inner: &mut Inner<K, V>, now: Instant) -> usize {
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.created_at) >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.entries.pop(key);
        }
        inner.stats.evictions += expired.len() as u64;
        inner.last_cleanup = now;
        expired.len()
    }
}
