//! Entry store contract (C2) and an in-memory reference implementation.
//!
//! Persistence is an out-of-scope collaborator concern (spec.md §1); the
//! core only ever talks to this trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ListSource, PhoneNumber};
use crate::model::DNCEntry;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("duplicate entry: {0}")]
    Duplicate(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn save(&self, entry: DNCEntry) -> StoreResult<DNCEntry>;

    /// Atomic per batch, idempotent on `(phone, source, source_reference)`.
    async fn bulk_upsert(&self, entries: Vec<DNCEntry>) -> StoreResult<BulkUpsertOutcome>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<DNCEntry>>;

    /// All entries (active and expired/deleted) for one phone.
    async fn find_by_phone(&self, phone: &PhoneNumber) -> StoreResult<Vec<DNCEntry>>;

    /// Active-only entries; used on the hot path.
    async fn find_active_by_phone(&self, phone: &PhoneNumber) -> StoreResult<Vec<DNCEntry>>;

    /// Sub-millisecond existence probe, used to confirm a bloom-filter hit.
    async fn exists(&self, phone: &PhoneNumber) -> StoreResult<bool>;

    async fn find_modified_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<DNCEntry>>;

    async fn cleanup_expired(&self, retention_days: i64) -> StoreResult<u64>;

    async fn count_by_source(&self, source: ListSource) -> StoreResult<u64>;

    async fn checksum(&self, provider_id: Uuid) -> StoreResult<String>;

    async fn soft_delete(&self, id: Uuid, deleted_by: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct BulkUpsertOutcome {
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// In-memory reference `EntryStore`, keyed by `(phone, source, source_reference)`
/// for idempotency and indexed by phone for the hot-path reads.
pub struct InMemoryEntryStore {
    by_id: DashMap<Uuid, DNCEntry>,
    by_phone: DashMap<String, Vec<Uuid>>,
    natural_key: DashMap<(String, ListSource, Option<String>), Uuid>,
    provider_rows: DashMap<Uuid, Vec<Uuid>>,
    writes: AtomicU64,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_phone: DashMap::new(),
            natural_key: DashMap::new(),
            provider_rows: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    fn index_phone(&self, phone_key: &str, id: Uuid) {
        self.by_phone.entry(phone_key.to_string()).or_default().push(id);
    }

    fn upsert_one(&self, entry: DNCEntry) -> bool {
        let key = (
            entry.phone.e164(),
            entry.source,
            entry.source_reference.clone(),
        );
        if let Some(existing_id) = self.natural_key.get(&key).map(|r| *r) {
            let mut merged = entry;
            merged.id = existing_id;
            self.by_id.insert(existing_id, merged);
            false
        } else {
            let id = entry.id;
            let phone_key = entry.phone.e164();
            self.natural_key.insert(key, id);
            self.by_id.insert(id, entry);
            self.index_phone(&phone_key, id);
            true
        }
    }
}

impl Default for InMemoryEntryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn save(&self, entry: DNCEntry) -> StoreResult<DNCEntry> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let is_new = self.upsert_one(entry.clone());
        if !is_new {
            return Err(StoreError::Duplicate(format!(
                "entry for {} from {:?} already exists",
                entry.phone.e164(),
                entry.source
            )));
        }
        Ok(entry)
    }

    async fn bulk_upsert(&self, entries: Vec<DNCEntry>) -> StoreResult<BulkUpsertOutcome> {
        let mut outcome = BulkUpsertOutcome::default();
        for entry in entries {
            if let Some(provider_key) = entry
                .metadata
                .get("provider_id")
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                self.provider_rows.entry(provider_key).or_default().push(entry.id);
            }
            if self.upsert_one(entry) {
                outcome.added += 1;
            } else {
                outcome.updated += 1;
            }
        }
        self.writes.fetch_add(outcome.added + outcome.updated, Ordering::Relaxed);
        Ok(outcome)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<DNCEntry>> {
        Ok(self.by_id.get(&id).map(|r| r.clone()))
    }

    async fn find_by_phone(&self, phone: &PhoneNumber) -> StoreResult<Vec<DNCEntry>> {
        let ids = self.by_phone.get(&phone.e164()).map(|r| r.clone()).unwrap_or_default();
        Ok(ids.into_iter().filter_map(|id| self.by_id.get(&id).map(|r| r.clone())).collect())
    }

    async fn find_active_by_phone(&self, phone: &PhoneNumber) -> StoreResult<Vec<DNCEntry>> {
        let now = Utc::now();
        let all = self.find_by_phone(phone).await?;
        Ok(all.into_iter().filter(|e| e.is_active(now)).collect())
    }

    async fn exists(&self, phone: &PhoneNumber) -> StoreResult<bool> {
        Ok(self.by_phone.contains_key(&phone.e164()))
    }

    async fn find_modified_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<DNCEntry>> {
        Ok(self
            .by_id
            .iter()
            .filter(|r| r.updated_at >= since)
            .map(|r| r.clone())
            .collect())
    }

    async fn cleanup_expired(&self, retention_days: i64) -> StoreResult<u64> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::days(retention_days);
        let mut removed = 0u64;
        let doomed: Vec<Uuid> = self
            .by_id
            .iter()
            .filter(|r| {
                let expired_past_retention = r.expires_at.map(|e| e <= cutoff).unwrap_or(false);
                let deleted_past_retention = r.deleted_at.map(|d| d <= cutoff).unwrap_or(false);
                expired_past_retention || deleted_past_retention
            })
            .map(|r| *r.key())
            .collect();
        for id in doomed {
            if self.by_id.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn count_by_source(&self, source: ListSource) -> StoreResult<u64> {
        Ok(self.by_id.iter().filter(|r| r.source == source).count() as u64)
    }

    async fn checksum(&self, provider_id: Uuid) -> StoreResult<String> {
        let mut ids: Vec<Uuid> = self.provider_rows.get(&provider_id).map(|r| r.clone()).unwrap_or_default();
        ids.sort();
        let joined = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        Ok(format!("{:x}", md5_like_hash(&joined)))
    }

    async fn soft_delete(&self, id: Uuid, deleted_by: &str) -> StoreResult<()> {
        let mut entry = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.deleted_at = Some(Utc::now());
        entry.deleted_by = Some(deleted_by.to_string());
        Ok(())
    }
}

/// Cheap, deterministic, non-cryptographic digest used for the reference
/// store's reconciliation checksum; real stores compute this in SQL.
fn md5_like_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in s.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
