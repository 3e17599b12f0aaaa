use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;

use grnrecon_core::{ReceivingError, ReceivingResult};
use grnrecon_events::{EventBus, EventEnvelope};
use grnrecon_receiving::ReceivingEvent;

use super::CollaboratorError;

/// Audit trail receiving approval and deletion events.
pub trait AuditCollaborator: Send + Sync {
    fn record(&self, event: &ReceivingEvent) -> Result<(), CollaboratorError>;
}

impl<A> AuditCollaborator for Arc<A>
where
    A: AuditCollaborator + ?Sized,
{
    fn record(&self, event: &ReceivingEvent) -> Result<(), CollaboratorError> {
        (**self).record(event)
    }
}

/// In-memory audit log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    events: Mutex<Vec<ReceivingEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReceivingEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditCollaborator for InMemoryAuditLog {
    fn record(&self, event: &ReceivingEvent) -> Result<(), CollaboratorError> {
        self.events
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("audit log lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Publishes audit events as JSON envelopes on an [`EventBus`].
pub struct EventBusAuditSink<B> {
    bus: B,
    sequence: AtomicU64,
}

impl<B> EventBusAuditSink<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            sequence: AtomicU64::new(0),
        }
    }
}

impl<B> AuditCollaborator for EventBusAuditSink<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn record(&self, event: &ReceivingEvent) -> Result<(), CollaboratorError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| CollaboratorError::Rejected(format!("payload serialization failed: {e}")))?;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = EventEnvelope::wrap(seq, event, payload);

        self.bus
            .publish(envelope)
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
    }
}

/// Delivers audit events, parking the ones the collaborator could not take.
///
/// Audit events are emitted after the ledger change they describe has been
/// committed, so a delivery failure must not undo that change. Parked events are
/// retried by [`AuditOutbox::flush`].
pub struct AuditOutbox<A> {
    audit: A,
    pending: Mutex<Vec<ReceivingEvent>>,
}

impl<A> AuditOutbox<A>
where
    A: AuditCollaborator,
{
    pub fn new(audit: A) -> Self {
        Self {
            audit,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Record `event`, or park it if the collaborator fails. Returns whether it was delivered.
    pub fn record_or_park(&self, event: ReceivingEvent) -> ReceivingResult<bool> {
        match self.audit.record(&event) {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::warn!(grn_id = %event.grn_id(), error = %err, "audit delivery failed; parked for retry");
                self.pending
                    .lock()
                    .map_err(|_| ReceivingError::storage("audit outbox poisoned"))?
                    .push(event);
                Ok(false)
            }
        }
    }

    /// Retry parked events in order. Returns how many were delivered; the rest stay parked.
    pub fn flush(&self) -> ReceivingResult<usize> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ReceivingError::storage("audit outbox poisoned"))?;

        let mut delivered = 0;
        let mut still_pending = Vec::new();
        for event in pending.drain(..) {
            // Keep ordering: once one fails, everything after it waits too.
            if still_pending.is_empty() && self.audit.record(&event).is_ok() {
                delivered += 1;
            } else {
                still_pending.push(event);
            }
        }
        *pending = still_pending;

        if delivered > 0 {
            tracing::info!(delivered, remaining = pending.len(), "audit outbox flushed");
        }
        Ok(delivered)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use chrono::{NaiveDate, Utc};
    use grnrecon_core::{GoodsReceiptId, ProductId, PurchaseOrderId, UserId};
    use grnrecon_events::{Event, InMemoryEventBus};
    use grnrecon_reconciliation::ReceiptProgress;
    use grnrecon_receiving::{GRN_STREAM_TYPE, GoodsReceipt, NewGoodsReceipt, ReceiptLine};

    fn test_event() -> ReceivingEvent {
        let grn = GoodsReceipt::commit(
            GoodsReceiptId::new(),
            "GRN-000009",
            NewGoodsReceipt {
                po_id: PurchaseOrderId::new(),
                received_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
                destination_warehouse: "WH".to_string(),
                lines: vec![ReceiptLine::new(ProductId::new(), 1)],
            },
            ReceiptProgress::PartiallyReceived,
            Utc::now(),
        )
        .unwrap();
        ReceivingEvent::approved(&grn, UserId::new(), Utc::now())
    }

    /// Fails while `down` is set.
    #[derive(Default)]
    struct FlakyAudit {
        down: AtomicBool,
        log: InMemoryAuditLog,
    }

    impl AuditCollaborator for FlakyAudit {
        fn record(&self, event: &ReceivingEvent) -> Result<(), CollaboratorError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(CollaboratorError::Unavailable("audit offline".to_string()));
            }
            self.log.record(event)
        }
    }

    #[test]
    fn bus_sink_publishes_enveloped_events() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let sink = EventBusAuditSink::new(bus.clone());

        let event = test_event();
        sink.record(&event).unwrap();
        sink.record(&event).unwrap();

        let envs = sub.drain();
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[0].stream_type(), GRN_STREAM_TYPE);
        assert_eq!(envs[0].event_type(), event.event_type());
        assert_eq!(envs[0].stream_id(), *event.grn_id().as_uuid());
        assert_eq!(envs[1].sequence_number(), 2);
        let back: ReceivingEvent = serde_json::from_value(envs[0].payload().clone()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn outbox_parks_failures_and_flushes_in_order() {
        let audit = Arc::new(FlakyAudit::default());
        let outbox = AuditOutbox::new(audit.clone());

        audit.down.store(true, Ordering::SeqCst);
        let first = test_event();
        let second = test_event();
        assert!(!outbox.record_or_park(first.clone()).unwrap());
        assert!(!outbox.record_or_park(second.clone()).unwrap());
        assert_eq!(outbox.pending_len(), 2);
        assert_eq!(outbox.flush().unwrap(), 0);

        audit.down.store(false, Ordering::SeqCst);
        assert_eq!(outbox.flush().unwrap(), 2);
        assert_eq!(outbox.pending_len(), 0);
        assert_eq!(audit.log.events(), vec![first, second]);
    }
}
