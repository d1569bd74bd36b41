//! Cache layer (C3): per-number verdict cache with TTL, negative caching,
//! and an optional bloom-filter miss shortcut.
//!
//! Grounded on the `CarrierCache` pattern (DashMap + TTL-at-read,
//! lazy/explicit eviction) used by the voice-switch service in this
//! codebase's lineage, generalized to verdicts and given a trait boundary so
//! a distributed backend can stand in without touching the orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bloomfilter::Bloom;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::domain::{ListSource, PhoneNumber};
use crate::model::{CacheEntry, DNCCheckResult};

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub valid_entries: u64,
    pub expired_entries: u64,
    pub evictions: u64,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, phone: &PhoneNumber) -> Option<DNCCheckResult>;
    async fn set(&self, verdict: DNCCheckResult, ttl_seconds: i64);
    async fn invalidate_phone(&self, phone: &PhoneNumber);
    async fn invalidate_source(&self, source: ListSource);
    async fn invalidate_provider(&self, provider_id: uuid::Uuid);
    async fn clear(&self, pattern: Option<&str>);
    async fn stats(&self) -> CacheStats;
}

/// A membership test that never false-negatives but may false-positive;
/// every positive hit must still be confirmed against the store.
pub trait BloomMembership: Send + Sync {
    fn might_contain(&self, phone: &PhoneNumber) -> bool;
    fn insert(&self, phone: &PhoneNumber);
}

pub struct PhoneBloomFilter {
    inner: Mutex<Bloom<str>>,
}

impl PhoneBloomFilter {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        Self {
            inner: Mutex::new(Bloom::new_for_fp_rate(expected_items, false_positive_rate)),
        }
    }
}

impl BloomMembership for PhoneBloomFilter {
    fn might_contain(&self, phone: &PhoneNumber) -> bool {
        self.inner.lock().check(phone.e164().as_str())
    }

    fn insert(&self, phone: &PhoneNumber) {
        self.inner.lock().set(phone.e164().as_str());
    }
}

struct Slot {
    entry: CacheEntry,
    inserted: Instant,
}

/// In-memory reference `CacheBackend`. TTL is evaluated against the
/// verdict's own `stored_at`/`ttl_seconds`, matching spec.md §4.3; `Instant`
/// is kept alongside only to drive the eviction/stats bookkeeping cheaply.
pub struct InMemoryCache {
    entries: DashMap<String, Slot>,
    bloom: Option<Box<dyn BloomMembership>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            bloom: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_bloom(bloom: Box<dyn BloomMembership>) -> Self {
        Self {
            entries: DashMap::new(),
            bloom: Some(bloom),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Drop every entry whose sitting time exceeds the passed bound,
    /// independent of the read-time TTL check; an admin maintenance sweep.
    pub fn prune_older_than(&self, max_age: Duration) {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.inserted.elapsed() < max_age);
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, phone: &PhoneNumber) -> Option<DNCCheckResult> {
        let key = phone.e164();

        if let Some(bloom) = &self.bloom {
            if !bloom.might_contain(phone) && !self.entries.contains_key(&key) {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let now = chrono::Utc::now();
        match self.entries.get(&key) {
            Some(slot) if slot.entry.is_valid(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(slot.entry.verdict.clone())
            }
            Some(_) => {
                drop(self.entries.remove(&key));
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, verdict: DNCCheckResult, ttl_seconds: i64) {
        let key = verdict.phone.e164();
        if let Some(bloom) = &self.bloom {
            if verdict.is_blocked {
                bloom.insert(&verdict.phone);
            }
        }
        self.entries.insert(
            key,
            Slot {
                entry: CacheEntry {
                    stored_at: chrono::Utc::now(),
                    ttl_seconds,
                    verdict,
                },
                inserted: Instant::now(),
            },
        );
    }

    async fn invalidate_phone(&self, phone: &PhoneNumber) {
        self.entries.remove(&phone.e164());
    }

    async fn invalidate_source(&self, source: ListSource) {
        self.entries
            .retain(|_, slot| !slot.entry.verdict.sources_checked.contains(&source));
    }

    async fn invalidate_provider(&self, provider_id: uuid::Uuid) {
        let tag = provider_id.to_string();
        self.entries.retain(|_, slot| {
            slot.entry
                .verdict
                .metadata
                .get("provider_id")
                .map(|v| v != &tag)
                .unwrap_or(true)
        });
    }

    async fn clear(&self, pattern: Option<&str>) {
        match pattern {
            None => self.entries.clear(),
            Some(p) => self.entries.retain(|k, _| !k.contains(p)),
        }
    }

    async fn stats(&self) -> CacheStats {
        let now = chrono::Utc::now();
        let mut valid = 0u64;
        let mut expired = 0u64;
        for slot in self.entries.iter() {
            if slot.entry.is_valid(now) {
                valid += 1;
            } else {
                expired += 1;
            }
        }
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            valid_entries: valid,
            expired_entries: expired,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
