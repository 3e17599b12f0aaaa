use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use grnrecon_core::{AggregateRoot, ProductId, PurchaseOrderId, ReceivingError, ReceivingResult};
use grnrecon_purchasing::{PurchaseOrder, PurchaseOrderStatus};
use grnrecon_reconciliation::derive_po_status;

use crate::collaborators::PurchaseOrderLookup;

/// Purchase order master data.
///
/// Implementations enforce unique PO numbers and optimistic versioning on save:
/// `save` fails with `Conflict` unless the stored version is exactly one behind the
/// version being written (or the order is new).
pub trait PurchaseOrderRepository: PurchaseOrderLookup {
    fn get(&self, po_id: PurchaseOrderId) -> ReceivingResult<Option<PurchaseOrder>>;

    fn save(&self, order: &PurchaseOrder) -> ReceivingResult<()>;

    fn list(&self) -> ReceivingResult<Vec<PurchaseOrder>>;
}

impl<R> PurchaseOrderRepository for Arc<R>
where
    R: PurchaseOrderRepository + ?Sized,
{
    fn get(&self, po_id: PurchaseOrderId) -> ReceivingResult<Option<PurchaseOrder>> {
        (**self).get(po_id)
    }

    fn save(&self, order: &PurchaseOrder) -> ReceivingResult<()> {
        (**self).save(order)
    }

    fn list(&self) -> ReceivingResult<Vec<PurchaseOrder>> {
        (**self).list()
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    orders: HashMap<PurchaseOrderId, PurchaseOrder>,
    by_number: HashMap<String, PurchaseOrderId>,
}

/// In-memory purchase order repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPurchaseOrderRepository {
    state: RwLock<RepositoryState>,
}

impl InMemoryPurchaseOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn require(&self, po_id: PurchaseOrderId) -> ReceivingResult<PurchaseOrder> {
        self.get(po_id)?
            .ok_or_else(|| ReceivingError::not_found(format!("purchase order {po_id}")))
    }
}

impl PurchaseOrderRepository for InMemoryPurchaseOrderRepository {
    fn get(&self, po_id: PurchaseOrderId) -> ReceivingResult<Option<PurchaseOrder>> {
        let state = self
            .state
            .read()
            .map_err(|_| ReceivingError::storage("purchase order repository poisoned"))?;
        Ok(state.orders.get(&po_id).cloned())
    }

    fn save(&self, order: &PurchaseOrder) -> ReceivingResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ReceivingError::storage("purchase order repository poisoned"))?;

        let po_id = order.id_typed();
        match state.orders.get(&po_id) {
            Some(existing) => {
                if existing.version() + 1 != order.version() {
                    return Err(ReceivingError::conflict(format!(
                        "purchase order {po_id}: stored version {} cannot be replaced by version {}",
                        existing.version(),
                        order.version()
                    )));
                }
                if existing.po_number() != order.po_number() {
                    return Err(ReceivingError::conflict(format!(
                        "purchase order {po_id}: number is immutable"
                    )));
                }
            }
            None => {
                if state.by_number.contains_key(order.po_number()) {
                    return Err(ReceivingError::conflict(format!(
                        "purchase order number {} already exists",
                        order.po_number()
                    )));
                }
                state.by_number.insert(order.po_number().to_string(), po_id);
            }
        }

        state.orders.insert(po_id, order.clone());
        Ok(())
    }

    fn list(&self) -> ReceivingResult<Vec<PurchaseOrder>> {
        let state = self
            .state
            .read()
            .map_err(|_| ReceivingError::storage("purchase order repository poisoned"))?;
        let mut orders: Vec<_> = state.orders.values().cloned().collect();
        orders.sort_by(|a, b| a.po_number().cmp(b.po_number()));
        Ok(orders)
    }
}

impl PurchaseOrderLookup for InMemoryPurchaseOrderRepository {
    fn get_ordered_quantities(
        &self,
        po_id: PurchaseOrderId,
    ) -> ReceivingResult<BTreeMap<ProductId, i64>> {
        Ok(self.require(po_id)?.ordered_quantities())
    }

    fn is_open_for_receipt(&self, po_id: PurchaseOrderId) -> ReceivingResult<bool> {
        Ok(self.require(po_id)?.status().accepts_receipts())
    }

    fn record_receipt_progress(
        &self,
        po_id: PurchaseOrderId,
        cumulative: &BTreeMap<ProductId, i64>,
    ) -> ReceivingResult<PurchaseOrderStatus> {
        let mut order = self.require(po_id)?;
        let progress = derive_po_status(&order.aggregate_lines(cumulative));

        let previous = order.status();
        if order.apply_receipt_progress(progress) {
            self.save(&order)?;
            tracing::info!(
                po_id = %po_id,
                from = %previous,
                to = %order.status(),
                "purchase order status recomputed"
            );
        } else {
            tracing::debug!(po_id = %po_id, status = %previous, "purchase order status unchanged");
        }
        Ok(order.status())
    }
}
