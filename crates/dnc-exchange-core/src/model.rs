//! Shared data model (spec §3): entries, verdicts, providers, and their
//! append-only sync history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ListSource, PhoneNumber, SuppressReason};

/// One suppression fact from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DNCEntry {
    pub id: Uuid,
    pub phone: PhoneNumber,
    pub source: ListSource,
    pub reason: SuppressReason,
    pub added_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source_reference: Option<String>,
    pub notes: Option<String>,
    pub metadata: HashMap<String, String>,
    pub added_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
}

impl DNCEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }

    /// `consent_type = "express_written"` recorded in metadata. Kept as a
    /// fallback read; see the injected `ConsentLookup` capability in
    /// `evaluator.rs` for the authoritative path (spec.md §9 open question).
    pub fn has_express_written_consent(&self) -> bool {
        self.metadata
            .get("consent_type")
            .map(|v| v == "express_written")
            .unwrap_or(false)
    }
}

/// One line item in a verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockReason {
    pub source: ListSource,
    pub reason: SuppressReason,
    pub description: String,
    pub provider_name: Option<String>,
    pub provider_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub severity: &'static str,
    pub compliance_code: &'static str,
}

impl BlockReason {
    pub fn from_entry(entry: &DNCEntry, description: impl Into<String>, provider_name: Option<String>) -> Self {
        Self {
            source: entry.source,
            reason: entry.reason,
            description: description.into(),
            provider_name,
            provider_id: None,
            expires_at: entry.expires_at,
            severity: entry.reason.severity_bucket(),
            compliance_code: entry.reason.compliance_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLevel {
    Strict,
    Standard,
    Relaxed,
}

impl Default for ComplianceLevel {
    fn default() -> Self {
        Self::Standard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceRecommendation {
    OkToCall,
    DoNotCallRegulatory,
    DoNotCallFraudRisk,
    DoNotCallConsumerRequest,
    DoNotCallPolicy,
}

/// Aggregated answer for one phone at one instant (spec.md §3, the "verdict").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DNCCheckResult {
    pub id: Uuid,
    pub phone: PhoneNumber,
    pub is_blocked: bool,
    pub reasons: Vec<BlockReason>,
    pub checked_at: DateTime<Utc>,
    pub sources_checked: Vec<ListSource>,
    pub ttl_seconds: i64,
    pub check_duration_us: u64,
    pub compliance_level: ComplianceLevel,
    pub risk_score: f64,
    pub compliance_recommendation: ComplianceRecommendation,
    pub cached: bool,
    pub metadata: HashMap<String, String>,
}

impl DNCCheckResult {
    pub const MIN_TTL_SECONDS: i64 = 60;
    pub const MAX_TTL_SECONDS: i64 = 7 * 24 * 3600;
    pub const DEFAULT_TTL_SECONDS: i64 = 24 * 3600;
    pub const DEGRADED_TTL_SECONDS: i64 = 5 * 60;

    pub fn invariant_is_blocked_matches_reasons(&self) -> bool {
        self.is_blocked == !self.reasons.is_empty()
    }

    /// Dedupe sources in-place, preserving first-seen order.
    pub fn dedupe_sources(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.sources_checked.retain(|s| seen.insert(*s));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Active,
    Inactive,
    Error,
    Syncing,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub kind: ListSource,
    pub url: String,
    pub auth_type: String,
    pub update_frequency_seconds: i64,
    pub priority: i32,
    pub status: ProviderStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub config: HashMap<String, String>,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl Provider {
    pub fn needs_sync(&self, now: DateTime<Utc>) -> bool {
        self.status == ProviderStatus::Active
            && self.next_sync_at.map(|t| now >= t).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAttemptStatus {
    Started,
    Completed,
    Partial,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSyncAttempt {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SyncAttemptStatus,
    pub records_read: u64,
    pub records_added: u64,
    pub records_updated: u64,
    pub records_skipped: u64,
    pub duration_ms: Option<u64>,
    pub error_msg: Option<String>,
    pub error_code: Option<String>,
    pub trigger: SyncTrigger,
}

impl ProviderSyncAttempt {
    pub fn new(provider_id: Uuid, started_at: DateTime<Utc>, trigger: SyncTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            started_at,
            completed_at: None,
            status: SyncAttemptStatus::Started,
            records_read: 0,
            records_added: 0,
            records_updated: 0,
            records_skipped: 0,
            duration_ms: None,
            error_msg: None,
            error_code: None,
            trigger,
        }
    }
}

/// `(phone -> verdict)` cache record with TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub verdict: DNCCheckResult,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl CacheEntry {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        (now - self.stored_at).num_seconds() < self.ttl_seconds
    }
}
