//! List source value object (C1)

use serde::{Deserialize, Serialize};
use std::fmt;

/// A Do-Not-Call authority or internal list a suppression entry came from.
///
/// Authority ordering (high to low): `Litigation`, `Federal`, `State`,
/// `Internal`, `Partner`, `Custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListSource {
    Litigation,
    Federal,
    State,
    Internal,
    Partner,
    Custom,
}

impl ListSource {
    /// Higher wins during conflict resolution.
    pub fn authority_level(&self) -> u8 {
        match self {
            Self::Litigation => 50,
            Self::Federal => 40,
            Self::State => 30,
            Self::Internal => 20,
            Self::Partner => 10,
            Self::Custom => 0,
        }
    }
}

impl fmt::Display for ListSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Litigation => "litigation",
            Self::Federal => "federal",
            Self::State => "state",
            Self::Internal => "internal",
            Self::Partner => "partner",
            Self::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_ordering_matches_spec() {
        assert!(ListSource::Litigation.authority_level() > ListSource::Federal.authority_level());
        assert!(ListSource::Federal.authority_level() > ListSource::State.authority_level());
        assert!(ListSource::State.authority_level() > ListSource::Internal.authority_level());
        assert!(ListSource::Internal.authority_level() > ListSource::Partner.authority_level());
        assert!(ListSource::Partner.authority_level() > ListSource::Custom.authority_level());
    }
}
