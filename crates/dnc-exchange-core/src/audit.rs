//! Audit and event publishing contracts. Both the archival sink and the
//! event bus are out-of-scope collaborators (spec.md §1); the core only
//! ever calls through these publish-only traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ListSource, PhoneNumber};
use crate::model::DNCCheckResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum DomainEvent {
    DNCCheckPerformed {
        phone_tail: String,
        is_blocked: bool,
        risk_score: f64,
    },
    DNCListSynced {
        provider_id: Uuid,
        source: ListSource,
        records_added: u64,
        records_updated: u64,
    },
    NumberSuppressed {
        phone_tail: String,
        source: ListSource,
        added_by: String,
    },
    NumberReleased {
        phone_tail: String,
        removed_by: String,
    },
    ProviderCircuitStateChanged {
        provider_id: Uuid,
        from: String,
        to: String,
    },
}

/// Logs the last 4 digits only, matching the PII-avoidance convention
/// documented for this crate (never log a phone number in full).
pub fn phone_tail(phone: &PhoneNumber) -> String {
    let digits = phone.digits();
    let tail = if digits.len() >= 4 { &digits[digits.len() - 4..] } else { digits };
    format!("...{tail}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub action: String,
    pub detail: String,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

pub fn check_performed_event(verdict: &DNCCheckResult) -> DomainEvent {
    DomainEvent::DNCCheckPerformed {
        phone_tail: phone_tail(&verdict.phone),
        is_blocked: verdict.is_blocked,
        risk_score: verdict.risk_score,
    }
}

/// Bounded, drop-oldest in-memory sink/publisher pair used by tests and as
/// a reference implementation; a production deployment wires a real
/// archive and message bus behind the same traits (spec.md §9: async
/// fire-and-forget work must be bounded so burst load cannot starve the hot
/// path).
pub struct BoundedMemorySink {
    records: parking_lot::Mutex<std::collections::VecDeque<AuditRecord>>,
    capacity: usize,
}

impl BoundedMemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl AuditSink for BoundedMemorySink {
    async fn record(&self, record: AuditRecord) {
        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }
}

pub struct BoundedMemoryPublisher {
    events: parking_lot::Mutex<std::collections::VecDeque<DomainEvent>>,
    capacity: usize,
}

impl BoundedMemoryPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn snapshot(&self) -> Vec<DomainEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl EventPublisher for BoundedMemoryPublisher {
    async fn publish(&self, event: DomainEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_tail_hides_all_but_last_four_digits() {
        let phone = PhoneNumber::parse("+14155550123").unwrap();
        assert_eq!(phone_tail(&phone), "...0123");
    }

    #[tokio::test]
    async fn bounded_sink_drops_oldest_past_capacity() {
        let sink = BoundedMemorySink::new(2);
        for i in 0..3 {
            sink.record(AuditRecord {
                id: Uuid::new_v4(),
                occurred_at: chrono::Utc::now(),
                actor: "test".into(),
                action: format!("action-{i}"),
                detail: String::new(),
            })
            .await;
        }
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].action, "action-1");
    }
}
