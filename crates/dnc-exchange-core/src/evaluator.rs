//! Compliance evaluator (C7): applies federal/state/wireless/time-of-day/
//! internal rules to a resolved entry set and emits a verdict's reasons and
//! recommendation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};

use crate::domain::{ListSource, PhoneNumber};
use crate::model::{BlockReason, ComplianceRecommendation};
use crate::resolver::ResolutionResult;

/// Resolves a phone's local time zone. The `PhoneNumber::time_zone_hint`
/// static table is a fallback only; production deployments should inject an
/// authoritative capability here (e.g. backed by a carrier LRN lookup).
#[async_trait]
pub trait TimeZoneLookup: Send + Sync {
    async fn resolve(&self, phone: &PhoneNumber) -> Option<chrono_tz::Tz>;
}

/// Whether express written consent is on file for a number, independent of
/// any `metadata.consent_type` a provider happens to carry (spec.md §9 open
/// question: consent is a separate subsystem's source of truth).
#[async_trait]
pub trait ConsentLookup: Send + Sync {
    async fn has_express_written_consent(&self, phone: &PhoneNumber) -> bool;
}

pub struct AreaCodeTimeZoneLookup;

#[async_trait]
impl TimeZoneLookup for AreaCodeTimeZoneLookup {
    async fn resolve(&self, phone: &PhoneNumber) -> Option<chrono_tz::Tz> {
        phone.time_zone_hint().and_then(|name| name.parse().ok())
    }
}

/// Reads only entry metadata; a stand-in until a real consent subsystem is
/// wired, matching the pre-capability behavior called out in spec.md §9.
pub struct MetadataConsentLookup;

pub struct EvaluationInput<'a> {
    pub phone: &'a PhoneNumber,
    pub call_time: DateTime<Utc>,
    pub resolved: &'a ResolutionResult,
}

#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub is_blocked: bool,
    pub reasons: Vec<BlockReason>,
    pub compliance_recommendation: ComplianceRecommendation,
    pub highest_severity: Option<&'static str>,
    pub highest_authority_source: Option<ListSource>,
}

const TCPA_START: NaiveTime = match NaiveTime::from_hms_opt(8, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const TCPA_END: NaiveTime = match NaiveTime::from_hms_opt(21, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

pub struct ComplianceEvaluator {
    time_zone_lookup: Box<dyn TimeZoneLookup>,
    consent_lookup: Box<dyn ConsentLookup>,
}

#[async_trait]
impl ConsentLookup for MetadataConsentLookup {
    async fn has_express_written_consent(&self, _phone: &PhoneNumber) -> bool {
        false
    }
}

impl ComplianceEvaluator {
    pub fn new(time_zone_lookup: Box<dyn TimeZoneLookup>, consent_lookup: Box<dyn ConsentLookup>) -> Self {
        Self {
            time_zone_lookup,
            consent_lookup,
        }
    }

    pub async fn evaluate(&self, input: EvaluationInput<'_>) -> EvaluationOutcome {
        let mut reasons = Vec::new();

        // Rule 1: federal/litigation/internal entries block unconditionally.
        for entry in input.resolved.resolved.iter() {
            if matches!(entry.source, ListSource::Federal | ListSource::Litigation | ListSource::Internal) {
                reasons.push(BlockReason::from_entry(
                    entry,
                    format!("{:?} listing blocks unconditionally", entry.source),
                    None,
                ));
            }
        }

        // Rule 2: state entries block unless the jurisdiction exemption
        // applies. Per spec.md §9, the per-state table (here, an explicit
        // `metadata.exempt = "true"` carried by the state provider adapter)
        // is authoritative; states absent from that table default-deny.
        for entry in input.resolved.resolved.iter() {
            if entry.source == ListSource::State {
                let exempt = entry.metadata.get("exempt").map(|v| v == "true").unwrap_or(false);
                if !exempt {
                    reasons.push(BlockReason::from_entry(entry, "state listing blocks (no exemption on file)", None));
                }
            }
        }

        // Rule 3: TCPA calling-hours window, `[08:00, 21:00)` local.
        match self.time_zone_lookup.resolve(input.phone).await {
            Some(tz) => {
                let local = input.call_time.with_timezone(&tz).time();
                if local < TCPA_START || local >= TCPA_END {
                    reasons.push(synthetic_reason(
                        crate::domain::SuppressReason::RegulatoryConsumerRequest,
                        "Outside TCPA calling hours",
                    ));
                }
            }
            None => {
                // Failure to resolve the zone is a safe-default block.
                reasons.push(synthetic_reason(
                    crate::domain::SuppressReason::RegulatoryConsumerRequest,
                    "Unable to resolve local time zone; treated as non-compliant",
                ));
            }
        }

        // Rule 4: wireless numbers require express written consent.
        if input.phone.is_wireless() {
            let has_consent = input.resolved.resolved.iter().any(|e| e.has_express_written_consent())
                || self.consent_lookup.has_express_written_consent(input.phone).await;
            if !has_consent {
                reasons.push(synthetic_reason(
                    crate::domain::SuppressReason::WirelessWithoutConsent,
                    "Wireless number without express written consent on file",
                ));
            }
        }

        let is_blocked = !reasons.is_empty();
        let highest_severity = reasons
            .iter()
            .map(|r| r.severity)
            .max_by_key(severity_rank);
        let highest_authority_source = reasons.iter().map(|r| r.source).max_by_key(|s| s.authority_level());
        let compliance_recommendation = recommend(&reasons);

        EvaluationOutcome {
            is_blocked,
            reasons,
            compliance_recommendation,
            highest_severity,
            highest_authority_source,
        }
    }
}

fn severity_rank(s: &&'static str) -> u8 {
    match *s {
        "high" => 2,
        "medium" => 1,
        _ => 0,
    }
}

fn synthetic_reason(reason: crate::domain::SuppressReason, description: &str) -> BlockReason {
    BlockReason {
        source: ListSource::Internal,
        reason,
        description: description.to_string(),
        provider_name: None,
        provider_id: None,
        expires_at: None,
        severity: reason.severity_bucket(),
        compliance_code: reason.compliance_code(),
    }
}

fn recommend(reasons: &[BlockReason]) -> ComplianceRecommendation {
    use crate::domain::SuppressReason::*;
    if reasons.is_empty() {
        return ComplianceRecommendation::OkToCall;
    }
    let has = |r: crate::domain::SuppressReason| reasons.iter().any(|b| b.reason == r);

    if has(RegulatoryConsumerRequest) || has(LitigationListing) || has(WirelessWithoutConsent) {
        ComplianceRecommendation::DoNotCallRegulatory
    } else if has(FraudPrevention) {
        ComplianceRecommendation::DoNotCallFraudRisk
    } else if has(CompanyPolicy) || has(PartnerRequest) {
        ComplianceRecommendation::DoNotCallPolicy
    } else {
        ComplianceRecommendation::DoNotCallConsumerRequest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SuppressReason;
    use crate::model::DNCEntry;
    use crate::resolver::ResolutionResult;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn entry(source: ListSource) -> DNCEntry {
        let now = Utc::now();
        DNCEntry {
            id: uuid::Uuid::new_v4(),
            phone: PhoneNumber::parse("+12125550111").unwrap(),
            source,
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
        }
    }

    fn resolution(entries: Vec<DNCEntry>) -> ResolutionResult {
        ResolutionResult {
            resolved: entries,
            confidence: 1.0,
            requires_review: false,
            strategy_used: None,
            conflicts: vec![],
            warnings: vec![],
        }
    }

    #[tokio::test]
    async fn federal_entry_blocks_unconditionally() {
        let evaluator = ComplianceEvaluator::new(Box::new(AreaCodeTimeZoneLookup), Box::new(MetadataConsentLookup));
        let phone = PhoneNumber::parse("+14155550123").unwrap();
        let resolved = resolution(vec![entry(ListSource::Federal)]);
        let call_time = chrono_tz::America::Los_Angeles
            .with_ymd_and_hms(2025, 1, 15, 14, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let outcome = evaluator
            .evaluate(EvaluationInput {
                phone: &phone,
                call_time,
                resolved: &resolved,
            })
            .await;
        assert!(outcome.is_blocked);
        assert_eq!(outcome.compliance_recommendation, ComplianceRecommendation::DoNotCallRegulatory);
    }

    #[tokio::test]
    async fn outside_tcpa_hours_blocks() {
        let evaluator = ComplianceEvaluator::new(Box::new(AreaCodeTimeZoneLookup), Box::new(MetadataConsentLookup));
        let phone = PhoneNumber::parse("+12125550111").unwrap();
        let resolved = resolution(vec![]);
        let call_time = chrono_tz::America::New_York
            .with_ymd_and_hms(2025, 1, 15, 22, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        let outcome = evaluator
            .evaluate(EvaluationInput {
                phone: &phone,
                call_time,
                resolved: &resolved,
            })
            .await;
        assert!(outcome.is_blocked);
    }

    struct AlwaysConsent;

    #[async_trait]
    impl ConsentLookup for AlwaysConsent {
        async fn has_express_written_consent(&self, _phone: &PhoneNumber) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn clean_number_in_window_is_allowed() {
        let evaluator = ComplianceEvaluator::new(Box::new(AreaCodeTimeZoneLookup), Box::new(AlwaysConsent));
        let phone = PhoneNumber::parse("+14155550123").unwrap();
        let resolved = resolution(vec![]);
        let call_time = chrono_tz::America::Los_Angeles
            .with_ymd_and_hms(2025, 1, 15, 14, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let outcome = evaluator
            .evaluate(EvaluationInput {
                phone: &phone,
                call_time,
                resolved: &resolved,
            })
            .await;
        assert!(!outcome.is_blocked);
        assert_eq!(outcome.compliance_recommendation, ComplianceRecommendation::OkToCall);
    }
}
