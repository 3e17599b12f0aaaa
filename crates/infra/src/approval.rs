//! The only path to `Approved`.

use std::sync::Arc;

use chrono::Utc;

use grnrecon_core::{GoodsReceiptId, ReceivingResult, UserId};
use grnrecon_receiving::{GoodsReceipt, ReceivingEvent};

use crate::collaborators::{AuditCollaborator, AuditOutbox};
use crate::ledger::ReceiptLedger;

/// Approves goods receipts and reports each approval to the audit trail.
///
/// Approval is an audit lock: stock was already booked when the GRN was committed,
/// so the gate holds no inventory handle at all. The audit event is emitted only
/// after the ledger accepted the approval; a failed delivery is parked in the
/// outbox and does not undo the approval.
pub struct ApprovalGate<G, A> {
    ledger: G,
    audit: Arc<AuditOutbox<A>>,
}

impl<G, A> ApprovalGate<G, A>
where
    G: ReceiptLedger,
    A: AuditCollaborator,
{
    pub fn new(ledger: G, audit: Arc<AuditOutbox<A>>) -> Self {
        Self { ledger, audit }
    }

    pub fn approve(
        &self,
        grn_id: GoodsReceiptId,
        approved_by: UserId,
    ) -> ReceivingResult<GoodsReceipt> {
        // Unknown, Pending and already-approved GRNs fail here, before any event.
        let approved = self.ledger.approve(grn_id, approved_by)?;

        let event = ReceivingEvent::approved(&approved, approved_by, Utc::now());
        self.audit.record_or_park(event)?;
        Ok(approved)
    }

    /// Retry audit events that could not be delivered. Returns how many went out.
    pub fn flush_pending_audit(&self) -> ReceivingResult<usize> {
        self.audit.flush()
    }

    pub fn pending_audit(&self) -> usize {
        self.audit.pending_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::NaiveDate;
    use grnrecon_core::{ProductId, PurchaseOrderId, ReceivingError, ReceivingResult};
    use grnrecon_purchasing::PurchaseOrderStatus;
    use grnrecon_receiving::{GoodsReceiptStatus, NewGoodsReceipt, ReceiptLine};

    use crate::collaborators::{
        CollaboratorError, InMemoryAuditLog, InMemoryInventory, PurchaseOrderLookup,
    };
    use crate::config::ReceivingConfig;
    use crate::ledger::InMemoryReceiptLedger;
    use crate::lock::KeyedLocks;

    struct OneOrder {
        po_id: PurchaseOrderId,
        product_id: ProductId,
    }

    impl PurchaseOrderLookup for OneOrder {
        fn get_ordered_quantities(
            &self,
            po_id: PurchaseOrderId,
        ) -> ReceivingResult<BTreeMap<ProductId, i64>> {
            if po_id != self.po_id {
                return Err(ReceivingError::not_found(format!("purchase order {po_id}")));
            }
            Ok(BTreeMap::from([(self.product_id, 20)]))
        }

        fn is_open_for_receipt(&self, po_id: PurchaseOrderId) -> ReceivingResult<bool> {
            Ok(po_id == self.po_id)
        }

        fn record_receipt_progress(
            &self,
            _po_id: PurchaseOrderId,
            cumulative: &BTreeMap<ProductId, i64>,
        ) -> ReceivingResult<PurchaseOrderStatus> {
            Ok(match cumulative.get(&self.product_id).copied().unwrap_or(0) {
                0 => PurchaseOrderStatus::Sent,
                n if n < 20 => PurchaseOrderStatus::PartiallyReceived,
                _ => PurchaseOrderStatus::FullyReceived,
            })
        }
    }

    #[derive(Default)]
    struct FlakyAudit {
        down: AtomicBool,
        log: InMemoryAuditLog,
    }

    impl AuditCollaborator for FlakyAudit {
        fn record(&self, event: &ReceivingEvent) -> Result<(), CollaboratorError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(CollaboratorError::Unavailable("audit down".to_string()));
            }
            self.log.record(event)
        }
    }

    type TestLedger = InMemoryReceiptLedger<OneOrder, Arc<InMemoryInventory>>;

    fn setup() -> (
        ApprovalGate<Arc<TestLedger>, Arc<FlakyAudit>>,
        Arc<TestLedger>,
        Arc<FlakyAudit>,
        Arc<InMemoryInventory>,
        GoodsReceiptId,
    ) {
        let (po_id, product_id) = (PurchaseOrderId::new(), ProductId::new());
        let inventory = Arc::new(InMemoryInventory::new());
        let ledger = Arc::new(InMemoryReceiptLedger::new(
            OneOrder { po_id, product_id },
            inventory.clone(),
            Arc::new(KeyedLocks::new("purchase order")),
            ReceivingConfig::default(),
        ));
        let grn_id = ledger
            .append_receipt(NewGoodsReceipt {
                po_id,
                received_date: NaiveDate::from_ymd_opt(2026, 5, 11).unwrap(),
                destination_warehouse: "DOCK".to_string(),
                lines: vec![ReceiptLine::new(product_id, 8)],
            })
            .unwrap()
            .receipt
            .id_typed();

        let audit = Arc::new(FlakyAudit::default());
        let gate = ApprovalGate::new(ledger.clone(), Arc::new(AuditOutbox::new(audit.clone())));
        (gate, ledger, audit, inventory, grn_id)
    }

    #[test]
    fn approval_is_audited_once_and_never_moves_stock() {
        let (gate, ledger, audit, inventory, grn_id) = setup();
        let deltas = inventory.applied_count();
        let approver = UserId::new();

        let approved = gate.approve(grn_id, approver).unwrap();
        assert_eq!(approved.status(), GoodsReceiptStatus::Approved);
        assert_eq!(approved.approved_by(), Some(approver));

        let err = gate.approve(grn_id, approver).unwrap_err();
        assert_eq!(err, ReceivingError::AlreadyApproved(grn_id));

        let events = audit.log.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].grn_id(), grn_id);
        assert_eq!(inventory.applied_count(), deltas);
        assert!(ledger.get_receipt(grn_id).unwrap().is_approved());
    }

    #[test]
    fn audit_outage_keeps_the_approval_and_parks_the_event() {
        let (gate, ledger, audit, _, grn_id) = setup();
        audit.down.store(true, Ordering::SeqCst);

        gate.approve(grn_id, UserId::new()).unwrap();
        assert!(ledger.get_receipt(grn_id).unwrap().is_approved());
        assert_eq!(gate.pending_audit(), 1);
        assert!(audit.log.events().is_empty());

        audit.down.store(false, Ordering::SeqCst);
        assert_eq!(gate.flush_pending_audit().unwrap(), 1);
        assert_eq!(gate.pending_audit(), 0);
        assert_eq!(audit.log.events().len(), 1);
    }

    #[test]
    fn unknown_receipts_emit_nothing() {
        let (gate, _, audit, _, _) = setup();
        assert!(matches!(
            gate.approve(GoodsReceiptId::new(), UserId::new()),
            Err(ReceivingError::NotFound(_))
        ));
        assert!(audit.log.events().is_empty());
    }
}
