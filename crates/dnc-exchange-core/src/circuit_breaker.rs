//! Circuit breaker (C5): per-provider three-state breaker with
//! failure-count, failure-rate, and cooldown thresholds.
//!
//! Grounded on the `CircuitBreaker`/`CircuitBreakerManager` pair from the
//! voice-switch carrier-failover module in this codebase's lineage, with
//! state held in a single atomic word (CAS-guarded transitions, per
//! spec.md §5) instead of an `RwLock<CircuitState>`, and extended with the
//! failure-rate/`MinRequests` threshold and half-open probe cap spec.md §4.5
//! adds on top of the original carrier breaker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use uuid::Uuid;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl From<CircuitState> for u8 {
    fn from(s: CircuitState) -> Self {
        match s {
            CircuitState::Closed => STATE_CLOSED,
            CircuitState::Open => STATE_OPEN,
            CircuitState::HalfOpen => STATE_HALF_OPEN,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub failure_rate_threshold: f64,
    pub min_requests: u32,
    pub max_half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            min_requests: 10,
            max_half_open_requests: 10,
        }
    }
}

/// Fired exactly once per successful state transition, on a background
/// task so a slow callback cannot stall the caller that tripped it.
pub type TransitionCallback = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    half_open_probes: AtomicU32,
    config: BreakerConfig,
    last_failure: RwLock<Option<Instant>>,
    opened_at: RwLock<Option<Instant>>,
    on_transition: RwLock<Option<TransitionCallback>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            half_open_probes: AtomicU32::new(0),
            config,
            last_failure: RwLock::new(None),
            opened_at: RwLock::new(None),
            on_transition: RwLock::new(None),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Registers the transition callback. Replaces any previously set one.
    pub fn set_on_transition(&self, callback: TransitionCallback) {
        *self.on_transition.write() = Some(callback);
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        let ok = self
            .state
            .compare_exchange(from.into(), to.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if ok {
            if let Some(callback) = self.on_transition.read().clone() {
                tokio::spawn(async move { callback(from, to) });
            }
        }
        ok
    }

    /// Whether a request may proceed. Also performs the Open -> HalfOpen
    /// timeout transition and caps half-open concurrent probes.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let ready = self
                    .opened_at
                    .read()
                    .map(|t| t.elapsed() >= self.config.open_timeout)
                    .unwrap_or(false);
                if ready && self.transition(CircuitState::Open, CircuitState::HalfOpen) {
                    self.half_open_probes.store(0, Ordering::Relaxed);
                    tracing::info!("circuit breaker transitioning to half-open");
                    self.half_open_probes.fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                let probes = self.half_open_probes.fetch_add(1, Ordering::AcqRel) + 1;
                probes <= self.config.max_half_open_requests
            }
        }
    }

    pub fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;

        if self.state() == CircuitState::HalfOpen && successes >= self.config.success_threshold {
            if self.transition(CircuitState::HalfOpen, CircuitState::Closed) {
                self.consecutive_successes.store(0, Ordering::Relaxed);
                self.total_requests.store(0, Ordering::Relaxed);
                self.total_failures.store(0, Ordering::Relaxed);
                *self.opened_at.write() = None;
                tracing::info!("circuit breaker closed after recovery");
            }
        }
    }

    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.consecutive_successes.store(0, Ordering::Relaxed);
        *self.last_failure.write() = Some(Instant::now());

        match self.state() {
            CircuitState::HalfOpen => {
                if self.transition(CircuitState::HalfOpen, CircuitState::Open) {
                    *self.opened_at.write() = Some(Instant::now());
                    tracing::warn!("circuit breaker re-opened after half-open failure");
                }
            }
            CircuitState::Closed => {
                let total = self.total_requests.load(Ordering::Relaxed);
                let rate_tripped = total >= self.config.min_requests as u64
                    && self.total_failures.load(Ordering::Relaxed) as f64 / total as f64
                        >= self.config.failure_rate_threshold;
                if failures >= self.config.failure_threshold || rate_tripped {
                    if self.transition(CircuitState::Closed, CircuitState::Open) {
                        *self.opened_at.write() = Some(Instant::now());
                        tracing::warn!(failures, rate_tripped, "circuit breaker opened");
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn failure_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.total_failures.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    pub fn reset(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_failures.store(0, Ordering::Relaxed);
        *self.last_failure.write() = None;
        *self.opened_at.write() = None;
    }
}

/// Per-provider variant of [`TransitionCallback`], told which provider
/// transitioned alongside the `from`/`to` states.
pub type ProviderTransitionCallback = Arc<dyn Fn(Uuid, CircuitState, CircuitState) + Send + Sync>;

/// Owns one breaker per provider, created on first use. The slow path
/// (creation) takes a write lock with a double-checked read immediately
/// before insertion so concurrent first-callers never create duplicates.
pub struct MultiProviderBreaker {
    breakers: RwLock<HashMap<Uuid, Arc<CircuitBreaker>>>,
    default_config: BreakerConfig,
    transition_callback: Arc<RwLock<Option<ProviderTransitionCallback>>>,
}

impl MultiProviderBreaker {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
            transition_callback: Arc::new(RwLock::new(None)),
        }
    }

    /// Registers a callback invoked whenever any provider's breaker
    /// transitions state. Must be called before the providers it should
    /// cover first go through `get_or_create` (typically at engine
    /// construction time, before any provider is registered).
    pub fn set_on_transition(&self, callback: ProviderTransitionCallback) {
        *self.transition_callback.write() = Some(callback);
    }

    pub fn get_or_create(&self, provider_id: Uuid) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(&provider_id) {
            return existing.clone();
        }
        let mut write = self.breakers.write();
        if let Some(existing) = write.get(&provider_id) {
            return existing.clone();
        }
        let breaker = Arc::new(CircuitBreaker::new(self.default_config));
        if self.transition_callback.read().is_some() {
            let callback_store = self.transition_callback.clone();
            breaker.set_on_transition(Arc::new(move |from, to| {
                if let Some(callback) = callback_store.read().clone() {
                    callback(provider_id, from, to);
                }
            }));
        }
        write.insert(provider_id, breaker.clone());
        breaker
    }

    pub fn allow(&self, provider_id: Uuid) -> bool {
        self.get_or_create(provider_id).allow_request()
    }

    pub fn record_success(&self, provider_id: Uuid) {
        self.get_or_create(provider_id).record_success();
    }

    pub fn record_failure(&self, provider_id: Uuid) {
        self.get_or_create(provider_id).record_failure();
    }

    pub fn state_of(&self, provider_id: Uuid) -> Option<CircuitState> {
        self.breakers.read().get(&provider_id).map(|b| b.state())
    }

    pub fn unhealthy_providers(&self) -> Vec<(Uuid, CircuitState)> {
        self.breakers
            .read()
            .iter()
            .filter_map(|(id, b)| {
                let state = b.state();
                (state != CircuitState::Closed).then_some((*id, state))
            })
            .collect()
    }
}

impl Default for MultiProviderBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failure_threshold() {
        let cb = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        assert!(cb.allow_request());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_failure();
        assert!(!cb.allow_request());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn opens_on_failure_rate_once_min_requests_met() {
        let cb = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 100,
            min_requests: 4,
            failure_rate_threshold: 0.5,
            ..Default::default()
        });
        cb.record_success();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            open_timeout: Duration::from_millis(5),
            ..Default::default()
        });
        cb.record_failure();
        assert!(!cb.allow_request());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(5),
            ..Default::default()
        });
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn transition_callback_fires_once_per_transition() {
        use std::sync::atomic::AtomicUsize;
        let cb = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let fires = Arc::new(AtomicUsize::new(0));
        let counted = fires.clone();
        cb.set_on_transition(Arc::new(move |_from, _to| {
            counted.fetch_add(1, Ordering::Relaxed);
        }));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // Let the spawned callback task run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fires.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn multi_provider_breaker_forwards_transitions_with_provider_id() {
        use std::sync::atomic::AtomicUsize;
        let mgr = MultiProviderBreaker::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counted = seen.clone();
        let target = Uuid::new_v4();
        mgr.set_on_transition(Arc::new(move |provider_id, _from, _to| {
            if provider_id == target {
                counted.fetch_add(1, Ordering::Relaxed);
            }
        }));
        for _ in 0..5 {
            mgr.record_failure(target);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn multi_provider_breaker_is_per_provider() {
        let mgr = MultiProviderBreaker::default();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        for _ in 0..5 {
            mgr.record_failure(p1);
        }
        assert_eq!(mgr.state_of(p1), Some(CircuitState::Open));
        assert!(mgr.allow(p2));
    }
}
