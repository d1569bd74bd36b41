//! Canonical phone number value object (C1)

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// E.164-normalized phone number. Equality and hashing are on the canonical
/// form; construction is the only place normalization happens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse a raw phone number into canonical E.164 form.
    ///
    /// Accepts numbers already in E.164 (`+14155550123`), numbers with
    /// punctuation (`(415) 555-0123`), and a default-country fallback for
    /// national dialing (`04155550123` assumed NANP). Anything that does not
    /// reduce to 7-15 digits after the leading `+` is rejected.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        let has_plus = trimmed.starts_with('+');
        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.is_empty() {
            return Err(CoreError::Validation("INVALID_PHONE_NUMBER: empty".into()));
        }

        let normalized = if has_plus {
            digits
        } else if let Some(rest) = digits.strip_prefix("00") {
            rest.to_string()
        } else if digits.len() == 10 {
            // Bare national-format NANP number, default country code 1.
            format!("1{digits}")
        } else if let Some(rest) = digits.strip_prefix('0') {
            // Trunk-prefixed national dialing; default country code 1.
            format!("1{rest}")
        } else {
            digits
        };

        if normalized.len() < 7 || normalized.len() > 15 {
            return Err(CoreError::Validation(format!(
                "INVALID_PHONE_NUMBER: {raw} normalizes to {} digits, expected 7-15",
                normalized.len()
            )));
        }

        Ok(Self(normalized))
    }

    /// Canonical E.164 string (`+14155550123`).
    pub fn e164(&self) -> String {
        format!("+{}", self.0)
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Best-effort ISO country inference from the leading digits.
    pub fn country(&self) -> &'static str {
        if self.0.starts_with('1') && self.0.len() == 11 {
            "US"
        } else if self.0.starts_with("44") {
            "GB"
        } else if self.0.starts_with("234") {
            "NG"
        } else {
            "UNKNOWN"
        }
    }

    /// NANP area code, when the number is a NANP number.
    pub fn area_code(&self) -> Option<&str> {
        if self.0.starts_with('1') && self.0.len() == 11 {
            Some(&self.0[1..4])
        } else {
            None
        }
    }

    /// Best-effort wireless classification from static NANP ranges.
    ///
    /// This is a heuristic default only — see `SPEC_FULL.md` §4.1 and the
    /// design note in `spec.md` §9: callers that need an authoritative
    /// answer should consult the injected consent/line-type capability
    /// rather than trust this field alone.
    pub fn is_wireless(&self) -> bool {
        match self.area_code() {
            Some(area) => !matches!(area, "800" | "888" | "877" | "866" | "855" | "844" | "833"),
            None => false,
        }
    }

    /// IANA time zone hint used as a fallback when no authoritative
    /// timezone capability is configured.
    pub fn time_zone_hint(&self) -> Option<&'static str> {
        match self.area_code() {
            Some("212") | Some("646") | Some("332") => Some("America/New_York"),
            Some("415") | Some("628") => Some("America/Los_Angeles"),
            Some("312") | Some("773") => Some("America/Chicago"),
            Some("303") | Some("720") => Some("America/Denver"),
            _ => None,
        }
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.e164())
    }
}
