use std::collections::BTreeMap;
use std::sync::Arc;

use grnrecon_core::{ProductId, PurchaseOrderId, ReceivingResult};
use grnrecon_purchasing::PurchaseOrderStatus;

/// Purchase order master data as the receipt ledger sees it.
pub trait PurchaseOrderLookup: Send + Sync {
    /// Ordered quantity per product. Unknown orders fail with `NotFound`.
    fn get_ordered_quantities(
        &self,
        po_id: PurchaseOrderId,
    ) -> ReceivingResult<BTreeMap<ProductId, i64>>;

    /// Whether the order currently accepts goods receipts.
    ///
    /// The ledger re-checks this while holding the purchase order lock, so a
    /// concurrent cancellation cannot slip a receipt in.
    fn is_open_for_receipt(&self, po_id: PurchaseOrderId) -> ReceivingResult<bool>;

    /// Derive the order status from the cumulative receipt view and persist it.
    ///
    /// Called by the ledger inside every append, update and delete, under the
    /// purchase order lock and before the ledger change becomes visible. An error
    /// aborts the ledger change. Unchanged statuses must not be rewritten.
    fn record_receipt_progress(
        &self,
        po_id: PurchaseOrderId,
        cumulative: &BTreeMap<ProductId, i64>,
    ) -> ReceivingResult<PurchaseOrderStatus>;
}

impl<L> PurchaseOrderLookup for Arc<L>
where
    L: PurchaseOrderLookup + ?Sized,
{
    fn get_ordered_quantities(
        &self,
        po_id: PurchaseOrderId,
    ) -> ReceivingResult<BTreeMap<ProductId, i64>> {
        (**self).get_ordered_quantities(po_id)
    }

    fn is_open_for_receipt(&self, po_id: PurchaseOrderId) -> ReceivingResult<bool> {
        (**self).is_open_for_receipt(po_id)
    }

    fn record_receipt_progress(
        &self,
        po_id: PurchaseOrderId,
        cumulative: &BTreeMap<ProductId, i64>,
    ) -> ReceivingResult<PurchaseOrderStatus> {
        (**self).record_receipt_progress(po_id, cumulative)
    }
}
