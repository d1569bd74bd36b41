//! Engine tunables (spec.md §6 environment-level knobs).
//!
//! This is deliberately separate from `exchange_support::config::ServiceConfig`:
//! that struct covers a binary's bootstrap concerns (ports, store URL,
//! telemetry toggle); this one covers only the compliance engine's own
//! dials. File-format config parsing stays out of scope (spec.md §1) — this
//! is a plain struct with an `from_env()` constructor, the same convention
//! `ServiceConfig` uses.

use std::env;

use crate::circuit_breaker::BreakerConfig;
use crate::resolver::ResolverConfig;
use crate::risk::PenaltyConfig;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub check_timeout_ms: u64,
    pub bulk_check_timeout_ms: u64,
    pub bulk_check_concurrency: usize,
    pub cache_default_ttl_seconds: i64,
    pub cache_degraded_ttl_seconds: i64,
    pub sync_tick_seconds: u64,
    pub sync_concurrency: usize,
    pub max_retry_attempts: u32,
    pub retry_backoff_seconds: u64,
    pub circuit: BreakerConfig,
    pub conflict: ResolverConfig,
    pub retention_default_days: i64,
    pub penalty: PenaltyConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: 10,
            bulk_check_timeout_ms: 50,
            bulk_check_concurrency: 10,
            cache_default_ttl_seconds: 6 * 3600,
            cache_degraded_ttl_seconds: 5 * 60,
            sync_tick_seconds: 30,
            sync_concurrency: 4,
            max_retry_attempts: 3,
            retry_backoff_seconds: 30,
            circuit: BreakerConfig::default(),
            conflict: ResolverConfig::default(),
            retention_default_days: 365,
            penalty: PenaltyConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            check_timeout_ms: env_parse("CHECK_TIMEOUT_MS", defaults.check_timeout_ms),
            bulk_check_timeout_ms: env_parse("BULK_CHECK_TIMEOUT_MS", defaults.bulk_check_timeout_ms),
            bulk_check_concurrency: env_parse("BULK_CHECK_CONCURRENCY", defaults.bulk_check_concurrency),
            cache_default_ttl_seconds: env_parse("CACHE_DEFAULT_TTL_SECONDS", defaults.cache_default_ttl_seconds),
            cache_degraded_ttl_seconds: env_parse(
                "CACHE_DEGRADED_TTL_SECONDS",
                defaults.cache_degraded_ttl_seconds,
            ),
            sync_tick_seconds: env_parse("SYNC_TICK_S", defaults.sync_tick_seconds),
            sync_concurrency: env_parse("SYNC_CONCURRENCY", defaults.sync_concurrency),
            max_retry_attempts: env_parse("MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts),
            retry_backoff_seconds: env_parse("RETRY_BACKOFF_S", defaults.retry_backoff_seconds),
            circuit: BreakerConfig {
                failure_threshold: env_parse("CIRCUIT_FAILURE_THRESHOLD", defaults.circuit.failure_threshold),
                success_threshold: env_parse("CIRCUIT_SUCCESS_THRESHOLD", defaults.circuit.success_threshold),
                open_timeout: std::time::Duration::from_secs(env_parse(
                    "CIRCUIT_OPEN_TIMEOUT_S",
                    defaults.circuit.open_timeout.as_secs(),
                )),
                failure_rate_threshold: env_parse(
                    "CIRCUIT_FAILURE_RATE_THRESHOLD",
                    defaults.circuit.failure_rate_threshold,
                ),
                min_requests: env_parse("CIRCUIT_MIN_REQUESTS", defaults.circuit.min_requests),
                max_half_open_requests: defaults.circuit.max_half_open_requests,
            },
            conflict: ResolverConfig {
                prefer_recent: env_parse("CONFLICT_PREFER_RECENT", defaults.conflict.prefer_recent),
                merge_compatible_enabled: env_parse(
                    "CONFLICT_MERGE_COMPATIBLE",
                    defaults.conflict.merge_compatible_enabled,
                ),
                auto_resolution_threshold: env_parse(
                    "CONFLICT_AUTO_RESOLUTION_THRESHOLD",
                    defaults.conflict.auto_resolution_threshold,
                ),
                max_data_age_hours: env_parse("CONFLICT_MAX_DATA_AGE_H", defaults.conflict.max_data_age_hours),
            },
            retention_default_days: env_parse("RETENTION_DEFAULT_DAYS", defaults.retention_default_days),
            penalty: defaults.penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.check_timeout_ms, 10);
        assert_eq!(cfg.bulk_check_timeout_ms, 50);
        assert_eq!(cfg.sync_tick_seconds, 30);
        assert_eq!(cfg.circuit.failure_threshold, 5);
        assert_eq!(cfg.conflict.auto_resolution_threshold, 0.7);
    }
}
