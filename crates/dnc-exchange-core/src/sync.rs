//! Sync engine (C10): schedules, runs, and reconciles provider pulls.
//!
//! The worker pool follows the semaphore-bounded job executor pattern used
//! elsewhere in this codebase's lineage (`jobs::executor::JobExecutor`):
//! a fixed-size `Semaphore` caps in-flight provider syncs, a permit is held
//! for the lifetime of one provider's run, and the scheduler tick drives a
//! `tokio::select!` loop that can be shut down cooperatively.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, DomainEvent, EventPublisher};
use crate::cache::CacheBackend;
use crate::circuit_breaker::MultiProviderBreaker;
use crate::config::CoreConfig;
use crate::model::{Provider, ProviderStatus, ProviderSyncAttempt, SyncAttemptStatus, SyncTrigger};
use crate::provider::ProviderClient;
use crate::store::EntryStore;

#[derive(Debug, Clone, Default)]
pub struct SyncRunOutcome {
    pub provider_id: Uuid,
    pub attempt: Option<ProviderSyncAttemptSummary>,
    pub circuit_open: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderSyncAttemptSummary {
    pub status: SyncAttemptStatus,
    pub records_added: u64,
    pub records_updated: u64,
}

pub struct SyncEngine {
    store: Arc<dyn EntryStore>,
    cache: Arc<dyn CacheBackend>,
    clients: RwLock<HashMap<Uuid, Arc<dyn ProviderClient>>>,
    providers: RwLock<HashMap<Uuid, Provider>>,
    breaker: Arc<MultiProviderBreaker>,
    audit: Arc<dyn AuditSink>,
    events: Arc<dyn EventPublisher>,
    config: CoreConfig,
    semaphore: Arc<Semaphore>,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn EntryStore>,
        cache: Arc<dyn CacheBackend>,
        breaker: Arc<MultiProviderBreaker>,
        audit: Arc<dyn AuditSink>,
        events: Arc<dyn EventPublisher>,
        config: CoreConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.sync_concurrency));
        let events_for_breaker = events.clone();
        breaker.set_on_transition(Arc::new(move |provider_id, from, to| {
            let events = events_for_breaker.clone();
            tokio::spawn(async move {
                events
                    .publish(DomainEvent::ProviderCircuitStateChanged {
                        provider_id,
                        from: format!("{from:?}"),
                        to: format!("{to:?}"),
                    })
                    .await;
            });
        }));
        Self {
            store,
            cache,
            clients: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            breaker,
            audit,
            events,
            config,
            semaphore,
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn register_provider(&self, provider: Provider, client: Arc<dyn ProviderClient>) {
        self.clients.write().insert(provider.id, client);
        self.providers.write().insert(provider.id, provider);
    }

    pub fn provider(&self, id: Uuid) -> Option<Provider> {
        self.providers.read().get(&id).cloned()
    }

    fn providers_needing_sync(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.providers
            .read()
            .values()
            .filter(|p| p.needs_sync(now))
            .map(|p| p.id)
            .collect()
    }

    /// Drive a single scheduler tick synchronously: enqueue every due
    /// provider and run each sync, bounded by `sync_concurrency`. Exposed
    /// so tests (and a future cron façade) can drive one tick
    /// deterministically instead of the background loop.
    pub async fn run_once(&self, trigger: SyncTrigger) -> Vec<SyncRunOutcome> {
        let now = Utc::now();
        let due = self.providers_needing_sync(now);
        let mut outcomes = Vec::with_capacity(due.len());
        for provider_id in due {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore not closed");
            let outcome = self.sync_one(provider_id, trigger).await;
            drop(permit);
            outcomes.push(outcome);
        }
        outcomes
    }

    pub async fn sync_all(&self) -> Vec<SyncRunOutcome> {
        self.run_once(SyncTrigger::Manual).await
    }

    pub async fn sync_one(&self, provider_id: Uuid, trigger: SyncTrigger) -> SyncRunOutcome {
        if !self.breaker.allow(provider_id) {
            tracing::warn!(%provider_id, "circuit open, skipping provider sync");
            return SyncRunOutcome {
                provider_id,
                attempt: Some(ProviderSyncAttemptSummary {
                    status: SyncAttemptStatus::Failed,
                    records_added: 0,
                    records_updated: 0,
                }),
                circuit_open: true,
            };
        }

        let started_at = Utc::now();
        let mut attempt = ProviderSyncAttempt::new(provider_id, started_at, trigger);
        self.set_provider_status(provider_id, ProviderStatus::Syncing);

        let Some(client) = self.clients.read().get(&provider_id).cloned() else {
            return SyncRunOutcome { provider_id, attempt: None, circuit_open: false };
        };
        let Some(provider) = self.providers.read().get(&provider_id).cloned() else {
            return SyncRunOutcome { provider_id, attempt: None, circuit_open: false };
        };

        let since = provider.last_sync_at;
        let result = match since {
            Some(checkpoint) => client.incremental_updates(checkpoint).await.map(|u| u.entries),
            None => client.full_snapshot().await,
        };

        match result {
            Ok(entries) => {
                attempt.records_read = entries.len() as u64;
                match self.store.bulk_upsert(entries).await {
                    Ok(outcome) => {
                        attempt.records_added = outcome.added;
                        attempt.records_updated = outcome.updated;
                        attempt.records_skipped = outcome.skipped;
                        attempt.status = SyncAttemptStatus::Completed;
                        attempt.completed_at = Some(Utc::now());
                        self.breaker.record_success(provider_id);
                        self.on_sync_success(provider_id, started_at, provider.kind, attempt.records_added, attempt.records_updated)
                            .await;
                    }
                    Err(err) => {
                        attempt.status = SyncAttemptStatus::Failed;
                        attempt.error_msg = Some(err.to_string());
                        attempt.completed_at = Some(Utc::now());
                        self.breaker.record_failure(provider_id);
                        self.on_sync_failure(provider_id, err.to_string()).await;
                    }
                }
            }
            Err(err) => {
                attempt.status = SyncAttemptStatus::Failed;
                attempt.error_msg = Some(err.to_string());
                attempt.error_code = Some("PROVIDER_ERROR".to_string());
                attempt.completed_at = Some(Utc::now());
                self.breaker.record_failure(provider_id);
                self.on_sync_failure(provider_id, err.to_string()).await;
            }
        }

        self.audit
            .record(AuditRecord {
                id: Uuid::new_v4(),
                occurred_at: Utc::now(),
                actor: "sync-engine".to_string(),
                action: "provider_sync_attempt".to_string(),
                detail: format!("provider={provider_id} status={:?}", attempt.status),
            })
            .await;

        SyncRunOutcome {
            provider_id,
            attempt: Some(ProviderSyncAttemptSummary {
                status: attempt.status,
                records_added: attempt.records_added,
                records_updated: attempt.records_updated,
            }),
            circuit_open: false,
        }
    }

    async fn on_sync_success(
        &self,
        provider_id: Uuid,
        started_at: DateTime<Utc>,
        kind: crate::domain::ListSource,
        records_added: u64,
        records_updated: u64,
    ) {
        let snapshot = self.providers.read().get(&provider_id).cloned();
        if let Some(mut provider) = snapshot {
            let update_frequency = Duration::from_secs(provider.update_frequency_seconds.max(1) as u64);
            provider.last_sync_at = Some(started_at);
            provider.next_sync_at = Some(started_at + chrono::Duration::from_std(update_frequency).unwrap());
            provider.error_count = 0;
            provider.status = ProviderStatus::Active;
            self.providers.write().insert(provider_id, provider);
        }
        self.cache.invalidate_provider(provider_id).await;
        self.events
            .publish(DomainEvent::DNCListSynced {
                provider_id,
                source: kind,
                records_added,
                records_updated,
            })
            .await;
        self.reconcile_checksum(provider_id).await;
    }

    async fn on_sync_failure(&self, provider_id: Uuid, error: String) {
        let mut should_mark_error = false;
        let snapshot = self.providers.read().get(&provider_id).cloned();
        if let Some(mut provider) = snapshot {
            provider.error_count += 1;
            provider.last_error = Some(error);
            if provider.error_count >= self.config.circuit.failure_threshold {
                provider.status = ProviderStatus::Error;
                should_mark_error = true;
            }
            let backoff = self.config.retry_backoff_seconds * 2u64.saturating_pow(provider.error_count.saturating_sub(1));
            let capped = backoff.min(provider.update_frequency_seconds.max(1) as u64);
            provider.next_sync_at = Some(Utc::now() + chrono::Duration::seconds(capped as i64));
            self.providers.write().insert(provider_id, provider);
        }
        if should_mark_error {
            tracing::error!(%provider_id, "provider marked error after repeated sync failures");
        }
    }

    fn set_provider_status(&self, provider_id: Uuid, status: ProviderStatus) {
        let snapshot = self.providers.read().get(&provider_id).cloned();
        if let Some(mut provider) = snapshot {
            provider.status = status;
            self.providers.write().insert(provider_id, provider);
        }
    }

    /// Reconcile the store's checksum against the provider's last-known
    /// checksum; a mismatch schedules a full-snapshot resync next tick.
    pub async fn reconcile_checksum(&self, provider_id: Uuid) -> bool {
        let stored_checksum = self.providers.read().get(&provider_id).and_then(|p| p.checksum.clone());
        let Ok(actual) = self.store.checksum(provider_id).await else {
            return false;
        };
        let matches = stored_checksum.as_deref() == Some(actual.as_str());
        if !matches {
            let snapshot = self.providers.read().get(&provider_id).cloned();
            if let Some(mut provider) = snapshot {
                provider.next_sync_at = Some(Utc::now());
                provider.checksum = Some(actual);
                self.providers.write().insert(provider_id, provider);
            }
        }
        matches
    }

    /// Start the background scheduler loop (wakes every `sync_tick_s`).
    /// Returns a handle whose `stop()` requests cooperative shutdown.
    pub fn start(self: Arc<Self>) -> SyncEngineHandle {
        let (tx, mut rx) = mpsc::channel(1);
        *self.shutdown_tx.write() = Some(tx);
        let engine = self.clone();
        let tick = Duration::from_secs(self.config.sync_tick_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = rx.recv() => {
                        tracing::info!("sync engine scheduler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let outcomes = engine.run_once(SyncTrigger::Scheduled).await;
                        tracing::debug!(count = outcomes.len(), "scheduled sync tick complete");
                    }
                }
            }
        });
        SyncEngineHandle { engine: self }
    }
}

pub struct SyncEngineHandle {
    engine: Arc<SyncEngine>,
}

impl SyncEngineHandle {
    pub async fn stop(&self) {
        if let Some(tx) = self.engine.shutdown_tx.write().take() {
            let _ = tx.send(()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{BoundedMemoryPublisher, BoundedMemorySink};
    use crate::cache::InMemoryCache;
    use crate::domain::{ListSource, PhoneNumber, SuppressReason};
    use crate::model::DNCEntry;
    use crate::provider::{IncrementalUpdate, ProviderCheckResult, ProviderHealth, ProviderQuota, ProviderResult};
    use crate::store::InMemoryEntryStore;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubProvider {
        fail_count: AtomicU32,
        fail_until: u32,
    }

    #[async_trait]
    impl ProviderClient for StubProvider {
        fn kind(&self) -> ListSource {
            ListSource::Federal
        }
        fn name(&self) -> &str {
            "stub-federal"
        }
        async fn health(&self) -> ProviderResult<ProviderHealth> {
            Ok(ProviderHealth { healthy: true, latency_ms: 1, detail: None })
        }
        async fn check(&self, phone: &PhoneNumber) -> ProviderResult<ProviderCheckResult> {
            Ok(ProviderCheckResult { phone: phone.clone(), listed: false, entry: None })
        }
        async fn batch_check(&self, phones: &[PhoneNumber]) -> ProviderResult<Vec<ProviderCheckResult>> {
            Ok(phones.iter().map(|p| ProviderCheckResult { phone: p.clone(), listed: false, entry: None }).collect())
        }
        async fn incremental_updates(&self, _since: DateTime<Utc>) -> ProviderResult<IncrementalUpdate> {
            self.maybe_fail()?;
            Ok(IncrementalUpdate { entries: vec![], next_checkpoint: Utc::now() })
        }
        async fn full_snapshot(&self) -> ProviderResult<Vec<DNCEntry>> {
            self.maybe_fail()?;
            let now = Utc::now();
            Ok(vec![DNCEntry {
                id: Uuid::new_v4(),
                phone: PhoneNumber::parse("+14155550123").unwrap(),
                source: ListSource::Federal,
                reason: SuppressReason::RegulatoryConsumerRequest,
                added_at: now,
                expires_at: None,
                source_reference: None,
                notes: None,
                metadata: Map::new(),
                added_by: "federal-sync".into(),
                updated_at: now,
                updated_by: None,
                deleted_at: None,
                deleted_by: None,
            }])
        }
        fn validate_config(&self) -> ProviderResult<()> {
            Ok(())
        }
        fn rate_limit_rps(&self) -> f64 {
            10.0
        }
        async fn quota(&self) -> ProviderResult<ProviderQuota> {
            Ok(ProviderQuota::default())
        }
        async fn connect(&self) -> ProviderResult<()> {
            Ok(())
        }
        async fn disconnect(&self) -> ProviderResult<()> {
            Ok(())
        }
    }

    impl StubProvider {
        fn maybe_fail(&self) -> ProviderResult<()> {
            let n = self.fail_count.fetch_add(1, Ordering::Relaxed);
            if n < self.fail_until {
                Err(crate::provider::ProviderError::Unavailable("stub failure".into()))
            } else {
                Ok(())
            }
        }
    }

    fn sample_provider() -> Provider {
        let now = Utc::now();
        Provider {
            id: Uuid::new_v4(),
            name: "federal".into(),
            kind: ListSource::Federal,
            url: "https://example.test".into(),
            auth_type: "api_key".into(),
            update_frequency_seconds: 3600,
            priority: 1,
            status: ProviderStatus::Active,
            last_sync_at: None,
            next_sync_at: Some(now - chrono::Duration::seconds(1)),
            error_count: 0,
            last_error: None,
            config: Map::new(),
            checksum: None,
            created_at: now,
            created_by: "system".into(),
            updated_at: now,
            updated_by: None,
        }
    }

    fn build_engine() -> (Arc<SyncEngine>, Provider) {
        let store = Arc::new(InMemoryEntryStore::new());
        let engine = Arc::new(SyncEngine::new(
            store,
            Arc::new(InMemoryCache::new()),
            Arc::new(MultiProviderBreaker::default()),
            Arc::new(BoundedMemorySink::new(100)),
            Arc::new(BoundedMemoryPublisher::new(100)),
            CoreConfig::default(),
        ));
        let provider = sample_provider();
        (engine, provider)
    }

    #[tokio::test]
    async fn full_snapshot_sync_adds_entries_and_updates_provider() {
        let (engine, provider) = build_engine();
        let provider_id = provider.id;
        engine.register_provider(provider, Arc::new(StubProvider { fail_count: AtomicU32::new(0), fail_until: 0 }));
        let outcome = engine.sync_one(provider_id, SyncTrigger::Manual).await;
        let attempt = outcome.attempt.unwrap();
        assert_eq!(attempt.status, SyncAttemptStatus::Completed);
        assert_eq!(attempt.records_added, 1);
        assert_eq!(engine.provider(provider_id).unwrap().status, ProviderStatus::Active);
    }

    #[tokio::test]
    async fn circuit_open_skips_sync_without_touching_breaker() {
        let (engine, provider) = build_engine();
        let provider_id = provider.id;
        engine.register_provider(provider, Arc::new(StubProvider { fail_count: AtomicU32::new(0), fail_until: 100 }));
        for _ in 0..6 {
            engine.sync_one(provider_id, SyncTrigger::Manual).await;
        }
        let outcome = engine.sync_one(provider_id, SyncTrigger::Manual).await;
        assert!(outcome.circuit_open);
    }

    #[tokio::test]
    async fn run_once_only_syncs_due_providers() {
        let (engine, provider) = build_engine();
        let provider_id = provider.id;
        engine.register_provider(provider, Arc::new(StubProvider { fail_count: AtomicU32::new(0), fail_until: 0 }));
        let outcomes = engine.run_once(SyncTrigger::Scheduled).await;
        assert_eq!(outcomes.len(), 1);
        // Freshly synced provider now has a future next_sync_at; a second
        // tick should find nothing due.
        let outcomes2 = engine.run_once(SyncTrigger::Scheduled).await;
        assert!(outcomes2.is_empty());
    }
}
