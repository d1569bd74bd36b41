//! Risk scorer (C8): maps a verdict's reasons plus recent-violation history
//! and call context to a 0-1 risk score and a penalty estimate.
//!
//! Grounded in the rule-based accumulation style of the voice-switch
//! fraud-detection engine's scoring pass, simplified to the pure weighted
//! rule table spec.md §4.8 defines (no ML runtime; this core's risk surface
//! is explicitly rule-based).

use serde::{Deserialize, Serialize};

use crate::model::BlockReason;

#[derive(Debug, Clone, Copy)]
pub struct PenaltyConfig {
    pub base: f64,
    pub federal_multiplier: f64,
    pub state_multiplier: f64,
    pub litigation_factor: f64,
    pub repeat_violation_multiplier: f64,
    pub wireless_additional_term: f64,
    pub max_penalty_per_violation: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            base: 500.0,
            federal_multiplier: 1.0,
            state_multiplier: 0.5,
            litigation_factor: 1.5,
            repeat_violation_multiplier: 1.2,
            wireless_additional_term: 250.0,
            max_penalty_per_violation: 1500.0,
        }
    }
}

/// Records which constants contributed to a penalty estimate, so a caller
/// can audit how a number reached a given figure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyBreakdown {
    pub federal_component: f64,
    pub state_component: f64,
    pub litigation_component: f64,
    pub repeat_violation_component: f64,
    pub wireless_component: f64,
    pub total_before_cap: f64,
    pub total: f64,
    pub capped: bool,
}

pub struct RiskScorer {
    penalty_config: PenaltyConfig,
}

impl RiskScorer {
    pub fn new(penalty_config: PenaltyConfig) -> Self {
        Self { penalty_config }
    }

    /// `risk_score in [0,1]`, accumulated per reason.
    pub fn score(&self, reasons: &[BlockReason]) -> f64 {
        let mut score = 0.0;
        for reason in reasons {
            score += match reason.severity {
                "high" => 0.4,
                "medium" => 0.2,
                _ => 0.1,
            };
            if reason.reason.is_regulatory() {
                score += 0.3;
            }
            score += reason.reason.severity_numeric() as f64 / 1000.0;
        }
        score.min(1.0)
    }

    pub fn is_high_risk(&self, score: f64, highest_severity: Option<&str>) -> bool {
        score >= 0.7 || highest_severity == Some("high")
    }

    /// Penalty estimate for a violation scenario: a statutory-style figure,
    /// not a regulatory filing — informational only.
    pub fn estimate_penalty(
        &self,
        has_federal: bool,
        state_entry_count: u32,
        has_litigation: bool,
        recent_violations: u32,
        is_wireless: bool,
    ) -> PenaltyBreakdown {
        let c = &self.penalty_config;
        let federal_component = if has_federal { c.base * c.federal_multiplier } else { 0.0 };
        let state_component = c.base * c.state_multiplier * state_entry_count as f64;
        let litigation_component = if has_litigation { c.base * c.litigation_factor } else { 0.0 };
        let wireless_component = if is_wireless { c.wireless_additional_term } else { 0.0 };

        let subtotal = federal_component + state_component + litigation_component + wireless_component;
        let repeat_multiplier = c.repeat_violation_multiplier.powi(recent_violations as i32) - 1.0;
        let repeat_violation_component = subtotal * repeat_multiplier.max(0.0);

        let total_before_cap = subtotal + repeat_violation_component;
        let total = total_before_cap.min(c.max_penalty_per_violation);

        PenaltyBreakdown {
            federal_component,
            state_component,
            litigation_component,
            repeat_violation_component,
            wireless_component,
            total_before_cap,
            total,
            capped: total_before_cap > c.max_penalty_per_violation,
        }
    }
}
