use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::clock::Clock;
use crate::middleware::metrics;
use crate::models::audit::{AuditEvent, AuditKind};

/// Events kept in memory; older ones survive only in the `tracing` output.
pub const MAX_AUDIT_EVENTS: usize = 10_000;

/// Append-only trail of overrides and anomalies. Gate decisions never read it.
#[derive(Debug)]
pub struct AuditLog {
    events: RwLock<VecDeque<AuditEvent>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

/// Builder-style description of an event before it is stamped.
#[derive(Debug, Default)]
pub struct AuditNote {
    pub actor: Option<String>,
    pub slot_id: Option<Uuid>,
    pub token_code: Option<String>,
    pub detail: String,
}

impl AuditLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, MAX_AUDIT_EVENTS)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            clock,
        }
    }

    pub async fn record(&self, kind: AuditKind, note: AuditNote) -> AuditEvent {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            kind,
            at: self.clock.now(),
            actor: note.actor,
            slot_id: note.slot_id,
            token_code: note.token_code,
            detail: note.detail,
        };

        if kind.is_override() {
            tracing::warn!(
                override_kind = kind.as_str(),
                actor = event.actor.as_deref().unwrap_or("-"),
                slot_id = ?event.slot_id,
                token = event.token_code.as_deref().unwrap_or("-"),
                "administrative override: {}",
                event.detail
            );
        } else {
            tracing::info!(
                audit_kind = kind.as_str(),
                slot_id = ?event.slot_id,
                token = event.token_code.as_deref().unwrap_or("-"),
                "audit: {}",
                event.detail
            );
        }
        metrics::record_audit(kind);

        let mut events = self.events.write().await;
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        event
    }

    /// Retained events, oldest first.
    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    pub async fn of_kind(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;

    fn note(detail: &str) -> AuditNote {
        AuditNote {
            detail: detail.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_oldest_events_are_dropped_at_capacity() {
        let log = AuditLog::with_capacity(Arc::new(ManualClock::default()), 3);
        for i in 0..5 {
            log.record(AuditKind::SensorCorrection, note(&format!("correction {}", i)))
                .await;
        }
        log.record(AuditKind::ForceRelease, note("override")).await;

        assert_eq!(log.len().await, 3);
        let details: Vec<String> = log.all().await.into_iter().map(|e| e.detail).collect();
        assert_eq!(details, vec!["correction 3", "correction 4", "override"]);
        assert_eq!(log.of_kind(AuditKind::ForceRelease).await.len(), 1);
    }
}
