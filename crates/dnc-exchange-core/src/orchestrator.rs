//! Check orchestrator (C9): the hot path. `check()` and `check_many()` are
//! the only two operations that must fit inside the request deadline; every
//! other collaborator call here is a suspension point bounded by it
//! (spec.md §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{check_performed_event, AuditRecord, AuditSink, EventPublisher};
use crate::cache::CacheBackend;
use crate::config::CoreConfig;
use crate::domain::PhoneNumber;
use crate::error::{CoreError, Result};
use crate::evaluator::{ComplianceEvaluator, EvaluationInput};
use crate::model::{ComplianceLevel, ComplianceRecommendation, DNCCheckResult};
use crate::resolver::{self};
use crate::risk::RiskScorer;
use crate::store::EntryStore;

pub struct CheckOrchestrator {
    store: Arc<dyn EntryStore>,
    cache: Arc<dyn CacheBackend>,
    evaluator: Arc<ComplianceEvaluator>,
    risk_scorer: Arc<RiskScorer>,
    audit: Arc<dyn AuditSink>,
    events: Arc<dyn EventPublisher>,
    config: CoreConfig,
}

impl CheckOrchestrator {
    pub fn new(
        store: Arc<dyn EntryStore>,
        cache: Arc<dyn CacheBackend>,
        evaluator: Arc<ComplianceEvaluator>,
        risk_scorer: Arc<RiskScorer>,
        audit: Arc<dyn AuditSink>,
        events: Arc<dyn EventPublisher>,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            cache,
            evaluator,
            risk_scorer,
            audit,
            events,
            config,
        }
    }

    #[instrument(skip(self), fields(phone.tail = %crate::audit::phone_tail(phone)))]
    pub async fn check(
        &self,
        phone: &PhoneNumber,
        call_time: DateTime<Utc>,
        compliance_level: ComplianceLevel,
    ) -> Result<DNCCheckResult> {
        let deadline = Duration::from_millis(self.config.check_timeout_ms);
        match tokio::time::timeout(deadline, self.check_inner(phone, call_time, compliance_level)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("check exceeded CheckTimeoutMs");
                Err(CoreError::Timeout("check exceeded CheckTimeoutMs".into()))
            }
        }
    }

    async fn check_inner(
        &self,
        phone: &PhoneNumber,
        call_time: DateTime<Utc>,
        compliance_level: ComplianceLevel,
    ) -> Result<DNCCheckResult> {
        if let Some(mut verdict) = self.cache.get(phone).await {
            verdict.cached = true;
            tracing::debug!("cache hit");
            return Ok(verdict);
        }
        tracing::debug!("cache miss");

        // A retryable store error gets one immediate retry (spec.md §5:
        // "dependency failures below the budget are retried"). If the retry
        // also fails we fail safe with a conservative verdict; if it
        // recovers, the verdict still goes out but with a short TTL so a
        // cached miss doesn't outlive the underlying instability.
        let (entries, degraded) = match self.store.find_active_by_phone(phone).await {
            Ok(entries) => (entries, false),
            Err(err) if err.retryable() => match self.store.find_active_by_phone(phone).await {
                Ok(entries) => (entries, true),
                Err(_) => return Ok(self.conservative_verdict(phone, "dependency unavailable")),
            },
            Err(err) => return Err(CoreError::Internal(err.to_string())),
        };

        let resolved = resolver::resolve(&entries, &self.config.conflict, call_time);
        let outcome = self
            .evaluator
            .evaluate(EvaluationInput {
                phone,
                call_time,
                resolved: &resolved,
            })
            .await;
        let risk_score = self.risk_scorer.score(&outcome.reasons);

        let mut sources_checked: Vec<_> = resolved.resolved.iter().map(|e| e.source).collect();
        let mut verdict = DNCCheckResult {
            id: Uuid::new_v4(),
            phone: phone.clone(),
            is_blocked: outcome.is_blocked,
            reasons: outcome.reasons,
            checked_at: Utc::now(),
            sources_checked: std::mem::take(&mut sources_checked),
            ttl_seconds: if degraded { DNCCheckResult::DEGRADED_TTL_SECONDS } else { DNCCheckResult::DEFAULT_TTL_SECONDS },
            check_duration_us: 0,
            compliance_level,
            risk_score,
            compliance_recommendation: outcome.compliance_recommendation,
            cached: false,
            metadata: HashMap::new(),
        };
        verdict.dedupe_sources();

        self.spawn_write_back(verdict.clone(), verdict.ttl_seconds);
        self.spawn_audit_emit(verdict.clone());

        Ok(verdict)
    }

    fn conservative_verdict(&self, phone: &PhoneNumber, detail: &str) -> DNCCheckResult {
        let mut metadata = HashMap::new();
        metadata.insert("system_unavailable".to_string(), detail.to_string());
        DNCCheckResult {
            id: Uuid::new_v4(),
            phone: phone.clone(),
            is_blocked: true,
            reasons: vec![crate::model::BlockReason {
                source: crate::domain::ListSource::Internal,
                reason: crate::domain::SuppressReason::CompanyPolicy,
                description: format!("SYSTEM_UNAVAILABLE: {detail}"),
                provider_name: None,
                provider_id: None,
                expires_at: None,
                severity: "high",
                compliance_code: "SYSTEM_UNAVAILABLE",
            }],
            checked_at: Utc::now(),
            sources_checked: vec![],
            ttl_seconds: DNCCheckResult::DEGRADED_TTL_SECONDS,
            check_duration_us: 0,
            compliance_level: ComplianceLevel::Strict,
            risk_score: 1.0,
            compliance_recommendation: ComplianceRecommendation::DoNotCallPolicy,
            cached: false,
            metadata,
        }
    }

    fn spawn_write_back(&self, verdict: DNCCheckResult, ttl_seconds: i64) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let _ = tokio::time::timeout(Duration::from_secs(5), cache.set(verdict, ttl_seconds)).await;
        });
    }

    fn spawn_audit_emit(&self, verdict: DNCCheckResult) {
        let audit = self.audit.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = check_performed_event(&verdict);
            let record = AuditRecord {
                id: Uuid::new_v4(),
                occurred_at: Utc::now(),
                actor: "orchestrator".to_string(),
                action: "dnc_check_performed".to_string(),
                detail: format!("blocked={} risk={:.2}", verdict.is_blocked, verdict.risk_score),
            };
            let _ = tokio::time::timeout(Duration::from_secs(5), async {
                audit.record(record).await;
                events.publish(event).await;
            })
            .await;
        });
    }

    /// Bounded-concurrency bulk check, preserving input order, honoring a
    /// bulk-wide deadline (default 50 ms). Per-item failures surface as
    /// conservative verdicts rather than aborting the batch.
    pub async fn check_many(&self, phones: &[PhoneNumber], call_time: DateTime<Utc>) -> Vec<DNCCheckResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.bulk_check_concurrency));
        let deadline = Duration::from_millis(self.config.bulk_check_timeout_ms);

        let tasks: Vec<_> = phones
            .iter()
            .cloned()
            .map(|phone| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                    match tokio::time::timeout(deadline, self.check(&phone, call_time, ComplianceLevel::Standard)).await
                    {
                        Ok(Ok(verdict)) => verdict,
                        Ok(Err(_)) | Err(_) => self.conservative_verdict(&phone, "bulk deadline exceeded"),
                    }
                }
            })
            .collect();

        futures_util::future::join_all(tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::domain::SuppressReason;
    use crate::evaluator::{AreaCodeTimeZoneLookup, MetadataConsentLookup};
    use crate::model::DNCEntry;
    use crate::risk::PenaltyConfig;
    use crate::store::InMemoryEntryStore;
    use crate::audit::{BoundedMemoryPublisher, BoundedMemorySink};

    fn build_orchestrator(store: Arc<dyn EntryStore>) -> CheckOrchestrator {
        CheckOrchestrator::new(
            store,
            Arc::new(InMemoryCache::new()),
            Arc::new(ComplianceEvaluator::new(Box::new(AreaCodeTimeZoneLookup), Box::new(MetadataConsentLookup))),
            Arc::new(RiskScorer::new(PenaltyConfig::default())),
            Arc::new(BoundedMemorySink::new(100)),
            Arc::new(BoundedMemoryPublisher::new(100)),
            CoreConfig::default(),
        )
    }

    #[tokio::test]
    async fn clean_number_is_not_blocked() {
        let orchestrator = build_orchestrator(Arc::new(InMemoryEntryStore::new()));
        let phone = PhoneNumber::parse("+18005550123").unwrap();
        let call_time = Utc::now();
        let verdict = orchestrator.check(&phone, call_time, ComplianceLevel::Standard).await.unwrap();
        assert!(verdict.invariant_is_blocked_matches_reasons());
    }

    #[tokio::test]
    async fn federal_entry_produces_blocked_verdict() {
        let store = InMemoryEntryStore::new();
        let phone = PhoneNumber::parse("+14155550123").unwrap();
        let now = Utc::now();
        store
            .save(DNCEntry {
                id: Uuid::new_v4(),
                phone: phone.clone(),
                source: crate::domain::ListSource::Federal,
                reason: SuppressReason::RegulatoryConsumerRequest,
                added_at: now,
                expires_at: None,
                source_reference: None,
                notes: None,
                metadata: HashMap::new(),
                added_by: "test".into(),
                updated_at: now,
                updated_by: None,
                deleted_at: None,
                deleted_by: None,
            })
            .await
            .unwrap();

        let orchestrator = build_orchestrator(Arc::new(store));
        let verdict = orchestrator.check(&phone, now, ComplianceLevel::Standard).await.unwrap();
        assert!(verdict.is_blocked);
        assert!(verdict.risk_score >= 0.4);
        assert_eq!(verdict.compliance_recommendation, ComplianceRecommendation::DoNotCallRegulatory);
    }

    #[tokio::test]
    async fn check_many_preserves_order() {
        let orchestrator = build_orchestrator(Arc::new(InMemoryEntryStore::new()));
        let phones = vec![
            PhoneNumber::parse("+18005550101").unwrap(),
            PhoneNumber::parse("+18005550102").unwrap(),
            PhoneNumber::parse("+18005550103").unwrap(),
        ];
        let results = orchestrator.check_many(&phones, Utc::now()).await;
        assert_eq!(results.len(), 3);
        for (verdict, phone) in results.iter().zip(phones.iter()) {
            assert_eq!(&verdict.phone, phone);
        }
    }
}
