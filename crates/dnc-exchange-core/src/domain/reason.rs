//! Suppression reason value object (C1)

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    RegulatoryConsumerRequest,
    LitigationListing,
    FraudPrevention,
    CompanyPolicy,
    PartnerRequest,
    DataQualityHold,
    WirelessWithoutConsent,
}

impl SuppressReason {
    pub fn risk_level(&self) -> RiskLevel {
        match self {
            Self::RegulatoryConsumerRequest => RiskLevel::Critical,
            Self::LitigationListing => RiskLevel::Critical,
            Self::FraudPrevention => RiskLevel::High,
            Self::WirelessWithoutConsent => RiskLevel::High,
            Self::CompanyPolicy => RiskLevel::Medium,
            Self::PartnerRequest => RiskLevel::Medium,
            Self::DataQualityHold => RiskLevel::Low,
        }
    }

    pub fn is_regulatory(&self) -> bool {
        matches!(
            self,
            Self::RegulatoryConsumerRequest | Self::LitigationListing | Self::WirelessWithoutConsent
        )
    }

    pub fn compliance_code(&self) -> &'static str {
        match self {
            Self::RegulatoryConsumerRequest => "TCPA-DNC-CONSUMER",
            Self::LitigationListing => "TCPA-LITIGATION",
            Self::FraudPrevention => "FRAUD-PREVENTION",
            Self::CompanyPolicy => "POLICY-INTERNAL",
            Self::PartnerRequest => "POLICY-PARTNER",
            Self::DataQualityHold => "DATA-QUALITY",
            Self::WirelessWithoutConsent => "TCPA-WIRELESS-CONSENT",
        }
    }

    pub fn retention_days(&self) -> i64 {
        match self {
            Self::RegulatoryConsumerRequest => 1825, // 5 years, per federal retention norms
            Self::LitigationListing => 2555,         // 7 years
            Self::FraudPrevention => 1095,            // 3 years
            Self::CompanyPolicy => 365,
            Self::PartnerRequest => 365,
            Self::DataQualityHold => 90,
            Self::WirelessWithoutConsent => 1825,
        }
    }

    pub fn severity_numeric(&self) -> u8 {
        match self {
            Self::RegulatoryConsumerRequest => 95,
            Self::LitigationListing => 100,
            Self::FraudPrevention => 85,
            Self::WirelessWithoutConsent => 70,
            Self::CompanyPolicy => 40,
            Self::PartnerRequest => 35,
            Self::DataQualityHold => 15,
        }
    }

    pub fn requires_documentation(&self) -> bool {
        matches!(
            self,
            Self::RegulatoryConsumerRequest | Self::LitigationListing | Self::FraudPrevention
        )
    }

    /// Severity bucket used on a `BlockReason` line item, derived from risk
    /// level per spec.md §3: critical/high -> "high", medium -> "medium",
    /// else -> "low".
    pub fn severity_bucket(&self) -> &'static str {
        match self.risk_level() {
            RiskLevel::Critical | RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.compliance_code())
    }
}
