//! Conflict resolver (C6): combine entries from multiple sources for one
//! phone into a resolved set, with a confidence score and warnings.

use chrono::{DateTime, Utc};

use crate::domain::ListSource;
use crate::model::DNCEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    ListTypeMismatch,
    ActiveInactiveMismatch,
    StateCodeMismatch,
    StaleCreationGap,
}

#[derive(Debug, Clone)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub left: uuid::Uuid,
    pub right: uuid::Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    PriorityBased,
    MostRecent,
    MostRestrictive,
    MergeCompatible,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    pub prefer_recent: bool,
    pub merge_compatible_enabled: bool,
    pub auto_resolution_threshold: f64,
    pub max_data_age_hours: i64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            prefer_recent: false,
            merge_compatible_enabled: false,
            auto_resolution_threshold: 0.7,
            max_data_age_hours: 720,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub resolved: Vec<DNCEntry>,
    pub confidence: f64,
    pub requires_review: bool,
    pub strategy_used: Option<ResolutionStrategy>,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
}

/// An entry is "inactive" for conflict purposes exactly when it is no longer
/// active per `DNCEntry::is_active` — soft-deleted or past `expires_at`.
fn entry_marked_inactive(entry: &DNCEntry, now: DateTime<Utc>) -> bool {
    !entry.is_active(now)
}

fn state_code(entry: &DNCEntry) -> Option<&str> {
    entry.metadata.get("state_code").map(|s| s.as_str())
}

fn identify_conflicts(entries: &[DNCEntry], now: DateTime<Utc>) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let a = &entries[i];
            let b = &entries[j];

            if entry_marked_inactive(a, now) != entry_marked_inactive(b, now) {
                conflicts.push(Conflict {
                    kind: ConflictKind::ActiveInactiveMismatch,
                    severity: ConflictSeverity::High,
                    left: a.id,
                    right: b.id,
                });
            }

            if a.source == ListSource::State && b.source == ListSource::State {
                if let (Some(sa), Some(sb)) = (state_code(a), state_code(b)) {
                    if sa != sb {
                        conflicts.push(Conflict {
                            kind: ConflictKind::StateCodeMismatch,
                            severity: ConflictSeverity::High,
                            left: a.id,
                            right: b.id,
                        });
                    }
                }
            }

            if a.source != b.source {
                conflicts.push(Conflict {
                    kind: ConflictKind::ListTypeMismatch,
                    severity: ConflictSeverity::Medium,
                    left: a.id,
                    right: b.id,
                });
            }

            let gap = (a.added_at - b.added_at).num_hours().abs();
            if gap > 24 && a.added_by != b.added_by {
                conflicts.push(Conflict {
                    kind: ConflictKind::StaleCreationGap,
                    severity: ConflictSeverity::Low,
                    left: a.id,
                    right: b.id,
                });
            }
        }
    }
    conflicts
}

fn select_strategy(conflicts: &[Conflict], config: &ResolverConfig) -> ResolutionStrategy {
    let has = |kind: ConflictKind| conflicts.iter().any(|c| c.kind == kind);
    // High-severity conflicts other than a status mismatch (e.g. two state
    // entries disagreeing on jurisdiction) still force priority_based; a
    // bare status mismatch falls through to the most_restrictive branch
    // below so that rule is reachable, per the decision tree.
    let other_high_severity = conflicts
        .iter()
        .any(|c| c.severity == ConflictSeverity::High && c.kind != ConflictKind::ActiveInactiveMismatch);

    if other_high_severity {
        ResolutionStrategy::PriorityBased
    } else if has(ConflictKind::StaleCreationGap) && config.prefer_recent {
        ResolutionStrategy::MostRecent
    } else if has(ConflictKind::ActiveInactiveMismatch) {
        ResolutionStrategy::MostRestrictive
    } else if config.merge_compatible_enabled {
        ResolutionStrategy::MergeCompatible
    } else {
        ResolutionStrategy::PriorityBased
    }
}

fn apply_priority_based(entries: &[DNCEntry]) -> Vec<DNCEntry> {
    let mut sorted: Vec<&DNCEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        b.source
            .authority_level()
            .cmp(&a.source.authority_level())
            .then_with(|| b.reason.severity_numeric().cmp(&a.reason.severity_numeric()))
    });
    let mut seen = std::collections::HashSet::new();
    sorted
        .into_iter()
        .filter(|e| seen.insert(e.source))
        .cloned()
        .collect()
}

fn apply_most_recent(entries: &[DNCEntry]) -> Vec<DNCEntry> {
    use std::collections::HashMap;
    let mut buckets: HashMap<ListSource, &DNCEntry> = HashMap::new();
    for entry in entries {
        buckets
            .entry(entry.source)
            .and_modify(|existing| {
                if entry.added_at > existing.added_at {
                    *existing = entry;
                }
            })
            .or_insert(entry);
    }
    buckets.into_values().cloned().collect()
}

fn apply_most_restrictive(entries: &[DNCEntry], now: DateTime<Utc>) -> Vec<DNCEntry> {
    use std::collections::HashMap;
    let mut buckets: HashMap<ListSource, &DNCEntry> = HashMap::new();
    for entry in entries {
        buckets
            .entry(entry.source)
            .and_modify(|existing| {
                let existing_active = !entry_marked_inactive(existing, now);
                let candidate_active = !entry_marked_inactive(entry, now);
                if candidate_active && !existing_active {
                    *existing = entry;
                } else if candidate_active == existing_active
                    && entry.source.authority_level() > existing.source.authority_level()
                {
                    *existing = entry;
                }
            })
            .or_insert(entry);
    }
    buckets.into_values().cloned().collect()
}

fn apply_merge_compatible(entries: &[DNCEntry], now: DateTime<Utc>) -> Vec<DNCEntry> {
    use std::collections::HashMap;
    let mut groups: HashMap<(ListSource, bool), Vec<&DNCEntry>> = HashMap::new();
    for entry in entries {
        let compatible_key = match entry.source {
            ListSource::Federal | ListSource::State => (ListSource::Federal, entry_marked_inactive(entry, now)),
            other => (other, entry_marked_inactive(entry, now)),
        };
        groups.entry(compatible_key).or_default().push(entry);
    }

    let mut merged = Vec::new();
    for group in groups.into_values() {
        let mut base = group
            .iter()
            .max_by_key(|e| e.source.authority_level())
            .expect("group is non-empty")
            .clone()
            .clone();
        let sources: Vec<String> = group.iter().map(|e| e.source.to_string()).collect();
        for entry in &group {
            for (k, v) in &entry.metadata {
                base.metadata.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        base.metadata.insert("merged_from".to_string(), group.len().to_string());
        base.metadata.insert("merged_sources".to_string(), sources.join(","));
        merged.push(base);
    }
    merged
}

pub fn resolve(entries: &[DNCEntry], config: &ResolverConfig, now: DateTime<Utc>) -> ResolutionResult {
    if entries.len() <= 1 {
        return ResolutionResult {
            resolved: entries.to_vec(),
            confidence: 1.0,
            requires_review: false,
            strategy_used: None,
            conflicts: Vec::new(),
            warnings: Vec::new(),
        };
    }

    let conflicts = identify_conflicts(entries, now);
    let strategy = select_strategy(&conflicts, config);

    let resolved = match strategy {
        ResolutionStrategy::PriorityBased => apply_priority_based(entries),
        ResolutionStrategy::MostRecent => apply_most_recent(entries),
        ResolutionStrategy::MostRestrictive => apply_most_restrictive(entries, now),
        ResolutionStrategy::MergeCompatible => apply_merge_compatible(entries, now),
    };

    let strategy_adjustment = match strategy {
        ResolutionStrategy::PriorityBased => 0.1,
        ResolutionStrategy::MostRestrictive => 0.05,
        ResolutionStrategy::MergeCompatible => 0.0,
        ResolutionStrategy::MostRecent => -0.05,
    };
    let confidence = (0.9 - 0.1 * conflicts.len() as f64 + strategy_adjustment).clamp(0.0, 1.0);
    let requires_review = confidence < config.auto_resolution_threshold;

    let mut warnings = Vec::new();
    let max_age = chrono::Duration::hours(config.max_data_age_hours);
    for entry in &resolved {
        if now - entry.added_at > max_age {
            warnings.push(format!("entry {} resolved from data older than MaxDataAge", entry.id));
        }
        if entry.is_expired(now) && entry.deleted_at.is_none() {
            warnings.push(format!("entry {} is expired but retained", entry.id));
        }
    }
    if conflicts.iter().any(|c| c.severity == ConflictSeverity::High) && requires_review {
        warnings.push("unresolved high-severity conflict requires manual review".to_string());
    }

    ResolutionResult {
        resolved,
        confidence,
        requires_review,
        strategy_used: Some(strategy),
        conflicts,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PhoneNumber, SuppressReason};
    use std::collections::HashMap;

    fn entry(source: ListSource, inactive: bool, added_at: DateTime<Utc>) -> DNCEntry {
        DNCEntry {
            id: uuid::Uuid::new_v4(),
            phone: PhoneNumber::parse("+14155550123").unwrap(),
            source,
            reason: SuppressReason::RegulatoryConsumerRequest,
            added_at,
            expires_at: if inactive { Some(added_at - chrono::Duration::hours(1)) } else { None },
            source_reference: None,
            notes: None,
            metadata: HashMap::new(),
            added_by: "provider".to_string(),
            updated_at: added_at,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        }
    }

    #[test]
    fn single_entry_passes_through_with_full_confidence() {
        let now = Utc::now();
        let entries = vec![entry(ListSource::Federal, false, now)];
        let result = resolve(&entries, &ResolverConfig::default(), now);
        assert_eq!(result.confidence, 1.0);
        assert!(!result.requires_review);
    }

    #[test]
    fn active_inactive_mismatch_resolves_via_most_restrictive() {
        let now = Utc::now();
        let entries = vec![entry(ListSource::State, false, now), entry(ListSource::Federal, true, now)];
        let result = resolve(&entries, &ResolverConfig::default(), now);
        assert_eq!(result.strategy_used, Some(ResolutionStrategy::MostRestrictive));
        assert_eq!(result.resolved.len(), 2);
        let state_entry = result.resolved.iter().find(|e| e.source == ListSource::State).unwrap();
        assert!(state_entry.is_active(now));
        assert!(result.confidence > 0.5 && result.confidence < 0.9);
    }

    #[test]
    fn priority_based_keeps_highest_authority_per_list_type() {
        let now = Utc::now();
        let entries = vec![
            entry(ListSource::Custom, false, now),
            entry(ListSource::Litigation, false, now),
        ];
        let mut config = ResolverConfig::default();
        config.merge_compatible_enabled = false;
        let result = resolve(&entries, &config, now);
        assert!(result.resolved.iter().any(|e| e.source == ListSource::Litigation));
    }
}
