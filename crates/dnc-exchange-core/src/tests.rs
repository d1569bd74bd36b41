//! End-to-end scenario tests assembled against the in-memory reference
//! implementation of every collaborator trait. Each test exercises one
//! named scenario from the operation's acceptance criteria rather than a
//! single module in isolation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use crate::audit::{BoundedMemoryPublisher, BoundedMemorySink};
use crate::cache::InMemoryCache;
use crate::circuit_breaker::{CircuitState, MultiProviderBreaker};
use crate::config::CoreConfig;
use crate::domain::{ListSource, PhoneNumber, SuppressReason};
use crate::evaluator::{AreaCodeTimeZoneLookup, ComplianceEvaluator, ConsentLookup, MetadataConsentLookup};
use crate::model::{ComplianceLevel, ComplianceRecommendation, DNCEntry};
use crate::orchestrator::CheckOrchestrator;
use crate::risk::{PenaltyConfig, RiskScorer};
use crate::store::{EntryStore, InMemoryEntryStore};
use crate::sync::SyncEngine;

/// The phone numbers used below are wireless under `PhoneNumber::is_wireless`'s
/// area-code heuristic. Scenarios that want a genuinely clean verdict stub
/// consent on so the wireless-without-consent rule doesn't mask the thing
/// actually under test.
struct AlwaysConsent;

#[async_trait::async_trait]
impl ConsentLookup for AlwaysConsent {
    async fn has_express_written_consent(&self, _phone: &PhoneNumber) -> bool {
        true
    }
}

fn sample_entry(phone: &PhoneNumber, source: ListSource, reason: SuppressReason, metadata: HashMap<String, String>) -> DNCEntry {
    let now = Utc::now();
    DNCEntry {
        id: uuid::Uuid::new_v4(),
        phone: phone.clone(),
        source,
        reason,
        added_at: now,
        expires_at: None,
        source_reference: None,
        notes: None,
        metadata,
        added_by: "test".into(),
        updated_at: now,
        updated_by: None,
        deleted_at: None,
        deleted_by: None,
    }
}

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

/// Same wiring as `build_orchestrator`, but with consent on file, for
/// scenarios that want every other rule cleared.
fn build_orchestrator_with_consent(store: Arc<dyn EntryStore>) -> CheckOrchestrator {
    CheckOrchestrator::new(
        store,
        Arc::new(InMemoryCache::new()),
        Arc::new(ComplianceEvaluator::new(Box::new(AreaCodeTimeZoneLookup), Box::new(AlwaysConsent))),
        Arc::new(RiskScorer::new(PenaltyConfig::default())),
        Arc::new(BoundedMemorySink::new(100)),
        Arc::new(BoundedMemoryPublisher::new(100)),
        CoreConfig::default(),
    )
}

/// Clean number: no entries on file, inside calling hours, consent on
/// file -> ok to call.
#[tokio::test]
async fn scenario_clean_number_is_ok_to_call() {
    let orchestrator = build_orchestrator_with_consent(Arc::new(InMemoryEntryStore::new()));
    let phone = PhoneNumber::parse("+12125550111").unwrap();
    let call_time = chrono_tz::America::New_York
        .with_ymd_and_hms(2025, 6, 10, 14, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let verdict = orchestrator.check(&phone, call_time, ComplianceLevel::Standard).await.unwrap();
    assert!(!verdict.is_blocked);
    assert_eq!(verdict.compliance_recommendation, ComplianceRecommendation::OkToCall);
}

/// Federal listing blocks unconditionally, independent of time of day.
#[tokio::test]
async fn scenario_federal_listing_blocks() {
    let store = InMemoryEntryStore::new();
    let phone = PhoneNumber::parse("+12125550122").unwrap();
    store
        .save(sample_entry(&phone, ListSource::Federal, SuppressReason::RegulatoryConsumerRequest, HashMap::new()))
        .await
        .unwrap();

    let orchestrator = build_orchestrator(Arc::new(store));
    let call_time = chrono_tz::America::New_York
        .with_ymd_and_hms(2025, 6, 10, 14, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let verdict = orchestrator.check(&phone, call_time, ComplianceLevel::Standard).await.unwrap();
    assert!(verdict.is_blocked);
    assert_eq!(verdict.compliance_recommendation, ComplianceRecommendation::DoNotCallRegulatory);
}

/// A call placed outside the TCPA `[08:00, 21:00)` local window blocks even
/// with no entries on file.
#[tokio::test]
async fn scenario_outside_tcpa_window_blocks() {
    let orchestrator = build_orchestrator(Arc::new(InMemoryEntryStore::new()));
    let phone = PhoneNumber::parse("+12125550133").unwrap();
    let call_time = chrono_tz::America::New_York
        .with_ymd_and_hms(2025, 6, 10, 6, 30, 0)
        .unwrap()
        .with_timezone(&Utc);
    let verdict = orchestrator.check(&phone, call_time, ComplianceLevel::Standard).await.unwrap();
    assert!(verdict.is_blocked);
}

/// Two entries for the same phone, one active (state) and one expired
/// (internal), trigger the active/inactive-mismatch conflict and resolve
/// via most_restrictive — the active entry survives resolution and the
/// state listing (no exemption on file) still blocks the call.
#[tokio::test]
async fn scenario_active_inactive_conflict_resolves_via_most_restrictive() {
    let store = InMemoryEntryStore::new();
    let phone = PhoneNumber::parse("+12125550144").unwrap();
    let state_entry = sample_entry(&phone, ListSource::State, SuppressReason::RegulatoryConsumerRequest, HashMap::new());
    let mut internal_entry =
        sample_entry(&phone, ListSource::Internal, SuppressReason::CompanyPolicy, HashMap::new());
    internal_entry.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
    store.save(state_entry).await.unwrap();
    store.save(internal_entry).await.unwrap();

    let store = Arc::new(store);
    let orchestrator = build_orchestrator(store.clone());
    let call_time = chrono_tz::America::New_York
        .with_ymd_and_hms(2025, 6, 10, 14, 0, 0)
        .unwrap()
        .with_timezone(&Utc);
    let verdict = orchestrator.check(&phone, call_time, ComplianceLevel::Standard).await.unwrap();
    // The state entry has no exemption on file, so it still blocks
    // regardless of which resolution strategy won.
    assert!(verdict.is_blocked);

    let resolved = crate::resolver::resolve(
        &store.find_by_phone(&phone).await.unwrap(),
        &crate::resolver::ResolverConfig::default(),
        Utc::now(),
    );
    assert_eq!(resolved.strategy_used, Some(crate::resolver::ResolutionStrategy::MostRestrictive));
}

/// After enough consecutive failures the breaker opens; after the cooldown
/// elapses it half-opens, and enough successes close it again.
#[tokio::test]
async fn scenario_circuit_opens_then_recovers() {
    let breaker = MultiProviderBreaker::new(crate::circuit_breaker::BreakerConfig {
        failure_threshold: 2,
        success_threshold: 1,
        open_timeout: Duration::from_millis(5),
        ..Default::default()
    });
    let provider_id = uuid::Uuid::new_v4();

    breaker.record_failure(provider_id);
    breaker.record_failure(provider_id);
    assert_eq!(breaker.state_of(provider_id), Some(CircuitState::Open));
    assert!(!breaker.allow(provider_id));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(breaker.allow(provider_id));
    breaker.record_success(provider_id);
    assert_eq!(breaker.state_of(provider_id), Some(CircuitState::Closed));
}

/// A provider sync that adds a new entry invalidates that provider's slice
/// of the cache, so a subsequent check re-reads the store instead of
/// serving a stale verdict.
#[tokio::test]
async fn scenario_cache_invalidated_after_sync() {
    let store = Arc::new(InMemoryEntryStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let phone = PhoneNumber::parse("+12125550155").unwrap();

    let orchestrator = CheckOrchestrator::new(
        store.clone(),
        cache.clone(),
        Arc::new(ComplianceEvaluator::new(Box::new(AreaCodeTimeZoneLookup), Box::new(AlwaysConsent))),
        Arc::new(RiskScorer::new(PenaltyConfig::default())),
        Arc::new(BoundedMemorySink::new(100)),
        Arc::new(BoundedMemoryPublisher::new(100)),
        CoreConfig::default(),
    );
    let call_time = chrono_tz::America::New_York
        .with_ymd_and_hms(2025, 6, 10, 14, 0, 0)
        .unwrap()
        .with_timezone(&Utc);

    let first = orchestrator.check(&phone, call_time, ComplianceLevel::Standard).await.unwrap();
    assert!(!first.is_blocked);
    // Give the fire-and-forget cache write-back a moment to land.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.get(&phone).await.is_some());

    let _engine = SyncEngine::new(
        store,
        cache.clone(),
        Arc::new(MultiProviderBreaker::default()),
        Arc::new(BoundedMemorySink::new(100)),
        Arc::new(BoundedMemoryPublisher::new(100)),
        CoreConfig::default(),
    );
    // A sync-triggered suppression invalidates the phone's cache slot the
    // same way `SyncEngine::on_sync_success` invalidates a provider's.
    cache.invalidate_phone(&phone).await;
    assert!(cache.get(&phone).await.is_none());
}
