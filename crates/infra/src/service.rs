//! Receiving orchestration: composes the purchase order store, the receipt ledger,
//! the approval gate and the audit trail behind one entry point per use case.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use grnrecon_core::{
    GoodsReceiptId, ProductId, PurchaseOrderId, ReceivingError, ReceivingResult, UserId,
};
use grnrecon_purchasing::{NewPurchaseOrder, PurchaseOrder, PurchaseOrderStatus};
use grnrecon_reconciliation::LineReconciliation;
use grnrecon_receiving::{GoodsReceipt, NewGoodsReceipt, ReceiptLine, ReceivingEvent};

use crate::approval::ApprovalGate;
use crate::collaborators::{AuditCollaborator, AuditOutbox, InventoryCollaborator};
use crate::config::ReceivingConfig;
use crate::ledger::{CommittedReceipt, InMemoryReceiptLedger, ReceiptLedger};
use crate::lock::KeyedLocks;
use crate::purchase_orders::{
    InMemoryPurchaseOrderRepository, PurchaseOrderRepository, PurchaseOrderStore,
};

/// A committed or corrected GRN together with the PO status it led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptOutcome {
    pub receipt: GoodsReceipt,
    pub lines: Vec<LineReconciliation>,
    pub po_status: PurchaseOrderStatus,
}

impl From<CommittedReceipt> for ReceiptOutcome {
    fn from(committed: CommittedReceipt) -> Self {
        Self {
            receipt: committed.receipt,
            lines: committed.lines,
            po_status: committed.po_status,
        }
    }
}

/// A voided GRN together with the PO status after its quantities were released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub voided: GoodsReceipt,
    pub po_status: PurchaseOrderStatus,
}

pub type InMemoryLedger<I> = InMemoryReceiptLedger<Arc<InMemoryPurchaseOrderRepository>, I>;

pub type InMemoryReceivingService<I, A> =
    ReceivingService<Arc<InMemoryPurchaseOrderRepository>, Arc<InMemoryLedger<I>>, A>;

pub struct ReceivingService<R, G, A> {
    orders: PurchaseOrderStore<R, G>,
    ledger: G,
    approvals: ApprovalGate<G, A>,
    audit: Arc<AuditOutbox<A>>,
    config: ReceivingConfig,
}

impl<I, A> InMemoryReceivingService<I, A>
where
    I: InventoryCollaborator,
    A: AuditCollaborator,
{
    /// Wire the in-memory repository and ledger around the given collaborators.
    pub fn in_memory(inventory: I, audit: A, config: ReceivingConfig) -> Self {
        let po_locks = Arc::new(KeyedLocks::new("purchase order"));
        let repository = Arc::new(InMemoryPurchaseOrderRepository::new());
        let ledger = Arc::new(InMemoryReceiptLedger::new(
            repository.clone(),
            inventory,
            po_locks.clone(),
            config.clone(),
        ));
        Self::new(repository, ledger, audit, po_locks, config)
    }
}

impl<R, G, A> ReceivingService<R, G, A>
where
    R: PurchaseOrderRepository,
    G: ReceiptLedger + Clone,
    A: AuditCollaborator,
{
    /// `po_locks` must be the same lock table the ledger was built with.
    pub fn new(
        repository: R,
        ledger: G,
        audit: A,
        po_locks: Arc<KeyedLocks<PurchaseOrderId>>,
        config: ReceivingConfig,
    ) -> Self {
        let audit = Arc::new(AuditOutbox::new(audit));
        Self {
            orders: PurchaseOrderStore::new(repository, ledger.clone(), po_locks, config.clone()),
            approvals: ApprovalGate::new(ledger.clone(), audit.clone()),
            ledger,
            audit,
            config,
        }
    }

    pub fn ledger(&self) -> &G {
        &self.ledger
    }

    pub fn purchase_orders(&self) -> &PurchaseOrderStore<R, G> {
        &self.orders
    }

    pub fn config(&self) -> &ReceivingConfig {
        &self.config
    }

    #[tracing::instrument(skip(self, new), fields(po_number = %new.po_number))]
    pub fn create_purchase_order(&self, new: NewPurchaseOrder) -> ReceivingResult<PurchaseOrder> {
        self.orders.create(new)
    }

    #[tracing::instrument(skip(self))]
    pub fn send_purchase_order(&self, po_id: PurchaseOrderId) -> ReceivingResult<PurchaseOrder> {
        self.with_retry("send_purchase_order", || self.orders.send(po_id))
    }

    #[tracing::instrument(skip(self))]
    pub fn cancel_purchase_order(&self, po_id: PurchaseOrderId) -> ReceivingResult<PurchaseOrder> {
        self.with_retry("cancel_purchase_order", || self.orders.cancel(po_id))
    }

    pub fn purchase_order(&self, po_id: PurchaseOrderId) -> ReceivingResult<PurchaseOrder> {
        self.orders.get(po_id)
    }

    pub fn remaining_quantities(
        &self,
        po_id: PurchaseOrderId,
    ) -> ReceivingResult<BTreeMap<ProductId, i64>> {
        self.orders.remaining_quantities(po_id)
    }

    #[tracing::instrument(skip(self, receipt), fields(po_id = %receipt.po_id, lines = receipt.lines.len()))]
    pub fn create_goods_receipt(&self, receipt: NewGoodsReceipt) -> ReceivingResult<ReceiptOutcome> {
        let po_id = receipt.po_id;
        if !self.orders.available_for_receipt(po_id)? {
            let order = self.orders.get(po_id)?;
            return Err(ReceivingError::NotReceivable {
                po_id,
                status: order.status().to_string(),
            });
        }

        self.with_retry("append_receipt", || self.ledger.append_receipt(receipt.clone()))
            .map(ReceiptOutcome::from)
    }

    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub fn update_goods_receipt(
        &self,
        grn_id: GoodsReceiptId,
        lines: Vec<ReceiptLine>,
    ) -> ReceivingResult<ReceiptOutcome> {
        self.with_retry("update_receipt", || {
            self.ledger.update_receipt(grn_id, lines.clone())
        })
        .map(ReceiptOutcome::from)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_goods_receipt(
        &self,
        grn_id: GoodsReceiptId,
        deleted_by: UserId,
    ) -> ReceivingResult<DeletionOutcome> {
        let voided = self.with_retry("delete_receipt", || self.ledger.delete_receipt(grn_id))?;
        self.audit
            .record_or_park(ReceivingEvent::deleted(&voided.receipt, deleted_by, Utc::now()))?;
        Ok(DeletionOutcome {
            voided: voided.receipt,
            po_status: voided.po_status,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn approve_goods_receipt(
        &self,
        grn_id: GoodsReceiptId,
        approved_by: UserId,
    ) -> ReceivingResult<GoodsReceipt> {
        self.with_retry("approve", || self.approvals.approve(grn_id, approved_by))
    }

    pub fn goods_receipt(&self, grn_id: GoodsReceiptId) -> ReceivingResult<GoodsReceipt> {
        self.ledger.get_receipt(grn_id)
    }

    pub fn goods_receipts(&self, po_id: PurchaseOrderId) -> ReceivingResult<Vec<GoodsReceipt>> {
        self.ledger.list_receipts(po_id)
    }

    pub fn flush_pending_audit(&self) -> ReceivingResult<usize> {
        self.approvals.flush_pending_audit()
    }

    pub fn pending_audit(&self) -> usize {
        self.approvals.pending_audit()
    }

    /// Retry lock contention with linear backoff. Everything else is returned as is.
    fn with_retry<T>(
        &self,
        operation: &'static str,
        mut f: impl FnMut() -> ReceivingResult<T>,
    ) -> ReceivingResult<T> {
        let mut attempt = 0;
        loop {
            match f() {
                Err(err @ (ReceivingError::Busy(_) | ReceivingError::Timeout(_)))
                    if attempt < self.config.busy_retries =>
                {
                    attempt += 1;
                    let backoff = self.config.retry_backoff * attempt;
                    tracing::warn!(operation, attempt, ?backoff, error = %err, "contention; retrying");
                    thread::sleep(backoff);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use grnrecon_core::{AggregateRoot, SupplierId};
    use grnrecon_purchasing::PurchaseOrderLine;
    use grnrecon_receiving::GoodsReceiptStatus;

    use crate::collaborators::{CollaboratorError, InMemoryAuditLog, InMemoryInventory};

    type TestService = InMemoryReceivingService<Arc<InMemoryInventory>, Arc<InMemoryAuditLog>>;

    fn test_service(config: ReceivingConfig) -> (TestService, Arc<InMemoryInventory>, Arc<InMemoryAuditLog>) {
        let inventory = Arc::new(InMemoryInventory::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let service = ReceivingService::in_memory(inventory.clone(), audit.clone(), config);
        (service, inventory, audit)
    }

    fn sent_order(service: &TestService, product_id: ProductId, qty: i64) -> PurchaseOrderId {
        let po_id = service
            .create_purchase_order(NewPurchaseOrder {
                po_number: format!("PO-{}", PurchaseOrderId::new()),
                supplier_id: SupplierId::new(),
                lines: vec![PurchaseOrderLine {
                    product_id,
                    ordered_qty: qty,
                    unit_price: 250,
                }],
            })
            .unwrap()
            .id_typed();
        service.send_purchase_order(po_id).unwrap();
        po_id
    }

    fn grn(po_id: PurchaseOrderId, product_id: ProductId, qty: i64) -> NewGoodsReceipt {
        NewGoodsReceipt {
            po_id,
            received_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            destination_warehouse: "WH-EAST".to_string(),
            lines: vec![ReceiptLine::new(product_id, qty)],
        }
    }

    #[test]
    fn draft_orders_are_not_receivable() {
        let (service, _, _) = test_service(ReceivingConfig::default());
        let a = ProductId::new();
        let po_id = service
            .create_purchase_order(NewPurchaseOrder {
                po_number: "PO-DRAFT".to_string(),
                supplier_id: SupplierId::new(),
                lines: vec![PurchaseOrderLine {
                    product_id: a,
                    ordered_qty: 5,
                    unit_price: 1,
                }],
            })
            .unwrap()
            .id_typed();

        let err = service.create_goods_receipt(grn(po_id, a, 1)).unwrap_err();
        assert_eq!(
            err,
            ReceivingError::NotReceivable {
                po_id,
                status: "Draft".to_string()
            }
        );

        let err = service
            .create_goods_receipt(grn(PurchaseOrderId::new(), a, 1))
            .unwrap_err();
        assert!(matches!(err, ReceivingError::NotFound(_)));
    }

    #[test]
    fn create_update_delete_keep_po_status_in_step() {
        let (service, inventory, audit) = test_service(ReceivingConfig::default());
        let a = ProductId::new();
        let po_id = sent_order(&service, a, 10);

        let first = service.create_goods_receipt(grn(po_id, a, 10)).unwrap();
        assert_eq!(first.receipt.status(), GoodsReceiptStatus::FullyReceived);
        assert_eq!(first.po_status, PurchaseOrderStatus::FullyReceived);

        let corrected = service
            .update_goods_receipt(first.receipt.id_typed(), vec![ReceiptLine::new(a, 7)])
            .unwrap();
        assert_eq!(corrected.po_status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(inventory.on_hand(a, "WH-EAST"), 7);

        let actor = UserId::new();
        let deleted = service
            .delete_goods_receipt(first.receipt.id_typed(), actor)
            .unwrap();
        assert_eq!(deleted.po_status, PurchaseOrderStatus::Sent);
        assert_eq!(inventory.on_hand(a, "WH-EAST"), 0);
        assert_eq!(service.remaining_quantities(po_id).unwrap(), BTreeMap::from([(a, 10)]));

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ReceivingEvent::GoodsReceiptDeleted(e) if e.deleted_by == actor));
    }

    #[test]
    fn contention_is_retried_then_reported() {
        let config = ReceivingConfig {
            lock_timeout: Duration::from_millis(5),
            busy_retries: 2,
            retry_backoff: Duration::from_millis(1),
            ..ReceivingConfig::default()
        };
        let (service, _, _) = test_service(config);
        let a = ProductId::new();
        let po_id = sent_order(&service, a, 10);

        let _held = service
            .ledger()
            .po_locks()
            .acquire(po_id, Duration::from_millis(5))
            .unwrap();
        let err = service.create_goods_receipt(grn(po_id, a, 1)).unwrap_err();
        assert!(matches!(err, ReceivingError::Busy(_)));
        assert!(service.goods_receipts(po_id).unwrap().is_empty());
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let config = ReceivingConfig {
            busy_retries: 5,
            retry_backoff: Duration::from_secs(5),
            ..ReceivingConfig::default()
        };
        let (service, _, _) = test_service(config);
        let a = ProductId::new();
        let po_id = sent_order(&service, a, 3);

        // A retry would sleep for seconds; an immediate answer proves there was none.
        let started = std::time::Instant::now();
        let err = service.create_goods_receipt(grn(po_id, a, 4)).unwrap_err();
        assert!(matches!(err, ReceivingError::OverReceipt(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(service.purchase_order(po_id).unwrap().version(), 2);
    }

    /// Audit sink that lets another writer grab the order lock while a deletion is
    /// being recorded, and keeps it for `hold`.
    struct ContendingAudit {
        locks: Arc<KeyedLocks<PurchaseOrderId>>,
        hold: Duration,
        holder: Mutex<Option<thread::JoinHandle<()>>>,
        log: InMemoryAuditLog,
    }

    impl AuditCollaborator for ContendingAudit {
        fn record(&self, event: &ReceivingEvent) -> Result<(), CollaboratorError> {
            if let ReceivingEvent::GoodsReceiptDeleted(deleted) = event {
                let (locks, hold, po_id) = (self.locks.clone(), self.hold, deleted.po_id);
                let (held_tx, held_rx) = mpsc::channel();
                let handle = thread::spawn(move || {
                    let _guard = locks.acquire(po_id, Duration::from_secs(1)).unwrap();
                    held_tx.send(()).unwrap();
                    thread::sleep(hold);
                });
                held_rx.recv().unwrap();
                *self.holder.lock().unwrap() = Some(handle);
            }
            self.log.record(event)
        }
    }

    #[test]
    fn deletion_reopens_the_order_even_when_the_lock_is_taken_right_after() {
        let config = ReceivingConfig {
            lock_timeout: Duration::from_millis(20),
            busy_retries: 0,
            ..ReceivingConfig::default()
        };
        let po_locks = Arc::new(KeyedLocks::new("purchase order"));
        let repository = Arc::new(InMemoryPurchaseOrderRepository::new());
        let ledger = Arc::new(InMemoryReceiptLedger::new(
            repository.clone(),
            Arc::new(InMemoryInventory::new()),
            po_locks.clone(),
            config.clone(),
        ));
        let audit = Arc::new(ContendingAudit {
            locks: po_locks.clone(),
            hold: Duration::from_millis(200),
            holder: Mutex::new(None),
            log: InMemoryAuditLog::new(),
        });
        let service = ReceivingService::new(repository, ledger, audit.clone(), po_locks, config);

        let a = ProductId::new();
        let po_id = service
            .create_purchase_order(NewPurchaseOrder {
                po_number: "PO-REOPEN".to_string(),
                supplier_id: SupplierId::new(),
                lines: vec![PurchaseOrderLine {
                    product_id: a,
                    ordered_qty: 10,
                    unit_price: 5,
                }],
            })
            .unwrap()
            .id_typed();
        service.send_purchase_order(po_id).unwrap();
        let full = service.create_goods_receipt(grn(po_id, a, 10)).unwrap();
        assert_eq!(full.po_status, PurchaseOrderStatus::FullyReceived);

        let deleted = service
            .delete_goods_receipt(full.receipt.id_typed(), UserId::new())
            .unwrap();

        // The status came out of the delete commit itself, not a later recompute.
        assert_eq!(deleted.po_status, PurchaseOrderStatus::Sent);
        assert_eq!(service.purchase_order(po_id).unwrap().status(), PurchaseOrderStatus::Sent);
        assert_eq!(service.remaining_quantities(po_id).unwrap(), BTreeMap::from([(a, 10)]));

        let holder = audit.holder.lock().unwrap().take().unwrap();
        holder.join().unwrap();
        let again = service.create_goods_receipt(grn(po_id, a, 10)).unwrap();
        assert_eq!(again.po_status, PurchaseOrderStatus::FullyReceived);
    }
}
