//! Admin operations (C11): the write path a back-office tool drives.
//!
//! Every mutation here goes through `EntryStore`, then invalidates the
//! affected cache entries and emits a `DomainEvent` — the same
//! write-then-invalidate-then-emit shape `CheckOrchestrator` uses on the
//! hot path, just synchronous instead of fire-and-forget since admin
//! operations are not latency-sensitive.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{phone_tail, AuditRecord, AuditSink, DomainEvent, EventPublisher};
use crate::cache::CacheBackend;
use crate::domain::{ListSource, PhoneNumber, SuppressReason};
use crate::error::{CoreError, Result};
use crate::model::DNCEntry;
use crate::store::EntryStore;

use std::sync::Arc;

pub struct AdminOperations {
    store: Arc<dyn EntryStore>,
    cache: Arc<dyn CacheBackend>,
    audit: Arc<dyn AuditSink>,
    events: Arc<dyn EventPublisher>,
}

#[derive(Debug, Default, Clone)]
pub struct SuppressionUpdate {
    pub reason: Option<SuppressReason>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl SuppressionUpdate {
    pub fn is_empty(&self) -> bool {
        self.reason.is_none() && self.expires_at.is_none() && self.notes.is_none() && self.metadata.is_none()
    }
}

impl AdminOperations {
    pub fn new(
        store: Arc<dyn EntryStore>,
        cache: Arc<dyn CacheBackend>,
        audit: Arc<dyn AuditSink>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { store, cache, audit, events }
    }

    #[instrument(skip(self, notes, metadata), fields(phone.tail = %phone_tail(&phone)))]
    #[allow(clippy::too_many_arguments)]
    pub async fn add_suppression(
        &self,
        phone: PhoneNumber,
        source: ListSource,
        reason: SuppressReason,
        added_by: String,
        expires_at: Option<DateTime<Utc>>,
        notes: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<DNCEntry> {
        if added_by.trim().is_empty() {
            return Err(CoreError::Validation("added_by must not be empty".into()));
        }

        let now = Utc::now();
        let entry = DNCEntry {
            id: Uuid::new_v4(),
            phone: phone.clone(),
            source,
            reason,
            added_at: now,
            expires_at,
            source_reference: None,
            notes,
            metadata,
            added_by: added_by.clone(),
            updated_at: now,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        };

        let saved = self.store.save(entry).await?;

        self.cache.invalidate_phone(&phone).await;
        self.cache.invalidate_source(source).await;

        self.audit
            .record(AuditRecord {
                id: Uuid::new_v4(),
                occurred_at: now,
                actor: added_by.clone(),
                action: "add_suppression".to_string(),
                detail: format!("phone={} source={source} reason={reason}", phone_tail(&phone)),
            })
            .await;
        self.events
            .publish(DomainEvent::NumberSuppressed { phone_tail: phone_tail(&phone), source, added_by })
            .await;

        Ok(saved)
    }

    /// Soft-deletes every active entry for `phone` that originated from the
    /// `Internal` list. Regulatory sources (federal, state, litigation) are
    /// never removable through this path — those records only disappear
    /// when the upstream authority stops listing the number.
    #[instrument(skip(self), fields(phone.tail = %phone_tail(&phone)))]
    pub async fn remove_suppression(&self, phone: &PhoneNumber, removed_by: &str, reason: &str) -> Result<u64> {
        let entries = self.store.find_active_by_phone(phone).await?;
        let removable: Vec<_> = entries.into_iter().filter(|e| e.source == ListSource::Internal).collect();
        if removable.is_empty() {
            return Err(CoreError::NotFound("no removable active entries for phone".into()));
        }

        let mut removed = 0u64;
        for entry in &removable {
            self.store.soft_delete(entry.id, removed_by).await?;
            removed += 1;
        }

        self.cache.invalidate_phone(phone).await;

        self.audit
            .record(AuditRecord {
                id: Uuid::new_v4(),
                occurred_at: Utc::now(),
                actor: removed_by.to_string(),
                action: "remove_suppression".to_string(),
                detail: format!("phone={} reason={reason} removed={removed}", phone_tail(phone)),
            })
            .await;
        self.events
            .publish(DomainEvent::NumberReleased { phone_tail: phone_tail(phone), removed_by: removed_by.to_string() })
            .await;

        Ok(removed)
    }

    #[instrument(skip(self, update))]
    pub async fn update_suppression(&self, id: Uuid, updated_by: &str, update: SuppressionUpdate) -> Result<DNCEntry> {
        if update.is_empty() {
            return Err(CoreError::Validation("update must change at least one field".into()));
        }

        let mut entry = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("entry {id} not found")))?;
        let before = format!("reason={} expires_at={:?}", entry.reason, entry.expires_at);

        if let Some(reason) = update.reason {
            entry.reason = reason;
        }
        if let Some(expires_at) = update.expires_at {
            entry.expires_at = Some(expires_at);
        }
        if let Some(notes) = update.notes {
            entry.notes = Some(notes);
        }
        if let Some(metadata) = update.metadata {
            entry.metadata = metadata;
        }
        entry.updated_at = Utc::now();
        entry.updated_by = Some(updated_by.to_string());

        let phone = entry.phone.clone();
        let after = format!("reason={} expires_at={:?}", entry.reason, entry.expires_at);
        let saved = self.store.save(entry).await.or_else(|err| match err {
            crate::store::StoreError::Duplicate(_) => Err(CoreError::Conflict(
                "update_suppression must target an existing entry by id".into(),
            )),
            other => Err(other.into()),
        })?;

        self.cache.invalidate_phone(&phone).await;

        self.audit
            .record(AuditRecord {
                id: Uuid::new_v4(),
                occurred_at: Utc::now(),
                actor: updated_by.to_string(),
                action: "update_suppression".to_string(),
                detail: format!("before[{before}] after[{after}]"),
            })
            .await;

        Ok(saved)
    }

    /// Read-side convenience: every entry (active or not) recorded for a phone.
    pub async fn list_by_phone(&self, phone: &PhoneNumber) -> Result<Vec<DNCEntry>> {
        Ok(self.store.find_by_phone(phone).await?)
    }

    /// Read-side convenience: the most recently modified entries, for an
    /// admin activity feed. `limit` bounds the response size.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<DNCEntry>> {
        let since = Utc::now() - chrono::Duration::days(365 * 10);
        let mut entries = self.store.find_modified_since(since).await?;
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{BoundedMemoryPublisher, BoundedMemorySink};
    use crate::cache::InMemoryCache;
    use crate::store::InMemoryEntryStore;

    fn build_ops() -> AdminOperations {
        AdminOperations::new(
            Arc::new(InMemoryEntryStore::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(BoundedMemorySink::new(100)),
            Arc::new(BoundedMemoryPublisher::new(100)),
        )
    }

    #[tokio::test]
    async fn add_then_remove_internal_suppression() {
        let ops = build_ops();
        let phone = PhoneNumber::parse("+14155550123").unwrap();
        ops.add_suppression(
            phone.clone(),
            ListSource::Internal,
            SuppressReason::CompanyPolicy,
            "admin".into(),
            None,
            None,
            HashMap::new(),
        )
        .await
        .unwrap();

        let removed = ops.remove_suppression(&phone, "admin", "customer requested removal").await.unwrap();
        assert_eq!(removed, 1);

        let remaining = ops.list_by_phone(&phone).await.unwrap();
        assert!(remaining.iter().all(|e| e.deleted_at.is_some()));
    }

    #[tokio::test]
    async fn remove_suppression_refuses_federal_entries() {
        let ops = build_ops();
        let phone = PhoneNumber::parse("+14155550199").unwrap();
        ops.add_suppression(
            phone.clone(),
            ListSource::Federal,
            SuppressReason::RegulatoryConsumerRequest,
            "federal-sync".into(),
            None,
            None,
            HashMap::new(),
        )
        .await
        .unwrap();

        let result = ops.remove_suppression(&phone, "admin", "mistaken request").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn update_suppression_rejects_empty_diff() {
        let ops = build_ops();
        let phone = PhoneNumber::parse("+14155550111").unwrap();
        let entry = ops
            .add_suppression(
                phone,
                ListSource::Internal,
                SuppressReason::CompanyPolicy,
                "admin".into(),
                None,
                None,
                HashMap::new(),
            )
            .await
            .unwrap();

        let result = ops.update_suppression(entry.id, "admin", SuppressionUpdate::default()).await;
        assert!(result.is_err());
    }
}
