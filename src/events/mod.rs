/// Reconciliation event bus
///
/// In-process broadcast channel carrying lifecycle events for the
/// notification subsystem to consume. Driftway never delivers notifications
/// itself; it only emits `drift.detected`, `incident.<transition>` and
/// `promotion.<outcome>` events, exposed to callers as an SSE stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Event kinds emitted by the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DriftDetected,
    IncidentAcknowledged,
    IncidentStabilized,
    IncidentReconciled,
    IncidentClosed,
    IncidentExpired,
    PromotionSucceeded,
    PromotionFailed,
    PromotionRolledBack,
    PromotionRollbackFailed,
    SyncCompleted,
}

impl EventKind {
    /// Dotted event name used on the wire (e.g. "incident.closed").
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DriftDetected => "drift.detected",
            EventKind::IncidentAcknowledged => "incident.acknowledged",
            EventKind::IncidentStabilized => "incident.stabilized",
            EventKind::IncidentReconciled => "incident.reconciled",
            EventKind::IncidentClosed => "incident.closed",
            EventKind::IncidentExpired => "incident.expired",
            EventKind::PromotionSucceeded => "promotion.succeeded",
            EventKind::PromotionFailed => "promotion.failed",
            EventKind::PromotionRolledBack => "promotion.rolled_back",
            EventKind::PromotionRollbackFailed => "promotion.rollback_failed",
            EventKind::SyncCompleted => "sync.completed",
        }
    }
}

/// A single reconciliation event.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileEvent {
    /// Dotted event name (e.g. "drift.detected")
    pub event: &'static str,
    #[serde(skip)]
    pub kind: EventKind,
    pub tenant: String,
    /// Environment slug, when the event is environment-scoped
    pub environment: Option<String>,
    pub at: DateTime<Utc>,
    /// Event-specific details (incident id, affected items, outcomes, ...)
    pub payload: Value,
}

impl ReconcileEvent {
    pub fn new(kind: EventKind, tenant: &str, environment: Option<&str>, payload: Value) -> Self {
        Self {
            event: kind.as_str(),
            kind,
            tenant: tenant.to_string(),
            environment: environment.map(str::to_string),
            at: Utc::now(),
            payload,
        }
    }
}

/// Broadcast bus for reconciliation events.
///
/// Slow or absent subscribers never block emitters: the channel is bounded
/// and lagging receivers skip missed messages.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ReconcileEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    ///
    /// A send error only means there are no subscribers right now, which is
    /// fine: the event is still logged for the audit trail.
    pub fn emit(&self, event: ReconcileEvent) {
        tracing::info!(
            "📣 {} tenant={} env={} payload={}",
            event.event,
            event.tenant,
            event.environment.as_deref().unwrap_or("-"),
            event.payload
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to the event stream (used by the SSE endpoint).
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emitted_events_reach_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(ReconcileEvent::new(
            EventKind::DriftDetected,
            "default",
            Some("staging"),
            json!({ "incident_id": "inc-1" }),
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, "drift.detected");
        assert_eq!(event.environment.as_deref(), Some("staging"));
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit(ReconcileEvent::new(
            EventKind::SyncCompleted,
            "default",
            Some("prod"),
            json!({}),
        ));
    }
}
