//! Provider client abstraction (C4): the uniform contract every federal,
//! state, internal, or custom source implements, plus the shared
//! token-bucket rate limiter each client instance owns.
//!
//! The bucket bookkeeping mirrors the fixed-window `RateLimiter` used by the
//! gateway's `security::rate_limiter` in this codebase's lineage, adapted to
//! true token-bucket refill semantics since the contract specifically calls
//! for a refill rate and burst, not a reset window.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::domain::{ListSource, PhoneNumber};
use crate::model::DNCEntry;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid provider config: {0}")]
    InvalidConfig(String),

    #[error("provider protocol error: {0}")]
    Protocol(String),

    #[error("request timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderQuota {
    pub requests_today: u64,
    pub daily_limit: Option<u64>,
}

/// Result of querying a provider for one or many phones; tagged with the
/// provider's own identity so the sync engine can attribute rows and
/// failures without guessing from `provider.name`.
#[derive(Debug, Clone)]
pub struct ProviderCheckResult {
    pub phone: PhoneNumber,
    pub listed: bool,
    pub entry: Option<DNCEntry>,
}

#[derive(Debug, Clone)]
pub struct IncrementalUpdate {
    pub entries: Vec<DNCEntry>,
    pub next_checkpoint: chrono::DateTime<chrono::Utc>,
}

/// Every federal/state/internal/custom client satisfies this same
/// operation list; differences in rate limit, auth, and
/// incremental-vs-snapshot behavior are per-instance data, not per-type
/// behavior (spec.md §9).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The `ListSource` this client represents, used to tag rows.
    fn kind(&self) -> ListSource;

    fn name(&self) -> &str;

    async fn health(&self) -> ProviderResult<ProviderHealth>;

    async fn check(&self, phone: &PhoneNumber) -> ProviderResult<ProviderCheckResult>;

    async fn batch_check(&self, phones: &[PhoneNumber]) -> ProviderResult<Vec<ProviderCheckResult>>;

    async fn incremental_updates(
        &self,
        since: chrono::DateTime<chrono::Utc>,
    ) -> ProviderResult<IncrementalUpdate>;

    async fn full_snapshot(&self) -> ProviderResult<Vec<DNCEntry>>;

    fn validate_config(&self) -> ProviderResult<()>;

    /// Declared requests-per-second; refill rate for this client's bucket.
    fn rate_limit_rps(&self) -> f64;

    async fn quota(&self) -> ProviderResult<ProviderQuota>;

    async fn connect(&self) -> ProviderResult<()>;

    async fn disconnect(&self) -> ProviderResult<()>;
}

/// Token-bucket rate limiter: refills at `rps` tokens/second up to a burst
/// of `2*rps` (spec.md §4.4). Shared by one `ProviderClient` instance.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: Mutex<f64>,
    last_refill: Mutex<Instant>,
    last_refill_nanos: AtomicI64,
}

impl TokenBucket {
    pub fn new(rps: f64) -> Self {
        let capacity = rps * 2.0;
        Self {
            capacity,
            refill_per_sec: rps,
            tokens: Mutex::new(capacity),
            last_refill: Mutex::new(Instant::now()),
            last_refill_nanos: AtomicI64::new(0),
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock();
        let elapsed = last.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let mut tokens = self.tokens.lock();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
        *last = Instant::now();
        self.last_refill_nanos.store(0, Ordering::Relaxed);
    }

    /// Attempt to take one token. Returns `true` if allowed.
    pub fn try_acquire(&self) -> bool {
        self.refill();
        let mut tokens = self.tokens.lock();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Seconds to wait before a token is likely available; used to fail
    /// fast when that wait would blow the caller's deadline.
    pub fn estimated_wait_secs(&self) -> f64 {
        self.refill();
        let tokens = *self.tokens.lock();
        if tokens >= 1.0 {
            0.0
        } else {
            (1.0 - tokens) / self.refill_per_sec
        }
    }

    /// Fails fast with `RATE_LIMIT_EXCEEDED` if acquiring would block past
    /// `deadline_secs` remaining on the caller's budget.
    pub fn acquire_or_fail(&self, deadline_secs: f64) -> ProviderResult<()> {
        if self.try_acquire() {
            return Ok(());
        }
        let wait = self.estimated_wait_secs();
        if wait > deadline_secs {
            Err(ProviderError::RateLimitExceeded(format!(
                "would wait {wait:.3}s, deadline allows {deadline_secs:.3}s"
            )))
        } else {
            Err(ProviderError::RateLimitExceeded("bucket empty".into()))
        }
    }
}
