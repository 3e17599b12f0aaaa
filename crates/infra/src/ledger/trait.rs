use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use grnrecon_core::{GoodsReceiptId, ProductId, PurchaseOrderId, ReceivingResult, UserId};
use grnrecon_purchasing::PurchaseOrderStatus;
use grnrecon_reconciliation::LineReconciliation;
use grnrecon_receiving::{GoodsReceipt, GoodsReceiptStatus, NewGoodsReceipt, ReceiptLine};

/// A GRN as committed, with the per-line reconciliation that justified it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedReceipt {
    pub receipt: GoodsReceipt,
    /// One entry per purchase order line.
    pub lines: Vec<LineReconciliation>,
    /// Purchase order status written in the same commit.
    pub po_status: PurchaseOrderStatus,
}

/// A deleted GRN and the purchase order status once its quantities were released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidedReceipt {
    pub receipt: GoodsReceipt,
    pub po_status: PurchaseOrderStatus,
}

impl CommittedReceipt {
    pub fn status(&self) -> GoodsReceiptStatus {
        self.receipt.status()
    }

    /// Remaining open quantity for `product_id` once this GRN is committed.
    pub fn remaining_after(&self, product_id: ProductId) -> Option<i64> {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map(|l| l.remaining_after)
    }
}

/// Result of comparing the incremental cumulative index against a full rescan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeAudit {
    pub po_id: PurchaseOrderId,
    pub indexed: BTreeMap<ProductId, i64>,
    pub rescanned: BTreeMap<ProductId, i64>,
}

impl CumulativeAudit {
    pub fn is_consistent(&self) -> bool {
        self.indexed == self.rescanned
    }

    /// Products whose indexed total differs from the rescan: `(product, indexed, rescanned)`.
    pub fn drift(&self) -> Vec<(ProductId, i64, i64)> {
        let mut products: Vec<_> = self.indexed.keys().chain(self.rescanned.keys()).collect();
        products.sort();
        products.dedup();
        products
            .into_iter()
            .filter_map(|p| {
                let i = self.indexed.get(p).copied().unwrap_or(0);
                let r = self.rescanned.get(p).copied().unwrap_or(0);
                (i != r).then_some((*p, i, r))
            })
            .collect()
    }
}

/// Authoritative store of goods receipts.
///
/// ## Guarantees
///
/// - For every (purchase order, product), the cumulative received quantity over
///   non-deleted GRNs never exceeds the ordered quantity.
/// - `append_receipt`, `update_receipt` and `delete_receipt` run their
///   read-validate-write sequence serialized per purchase order, and commit all
///   lines or none.
/// - Stock is only moved through the inventory collaborator, and a ledger change is
///   only finalized after the collaborator accepted its delta. A delta whose outcome
///   is unknown is revoked before the order takes another change.
/// - The purchase order status is recomputed inside the same commit, so it never
///   lags the cumulative view.
/// - Approved GRNs are immutable; approval never moves stock.
/// - Lock waits are bounded and surface as `ReceivingError::Busy`.
pub trait ReceiptLedger: Send + Sync {
    /// Cumulative received quantity per ordered product over all live GRNs.
    fn get_cumulative_received(
        &self,
        po_id: PurchaseOrderId,
    ) -> ReceivingResult<BTreeMap<ProductId, i64>>;

    /// Validate and commit a new GRN.
    fn append_receipt(&self, receipt: NewGoodsReceipt) -> ReceivingResult<CommittedReceipt>;

    /// Replace the lines of a non-approved GRN and revalidate against everything else.
    fn update_receipt(
        &self,
        grn_id: GoodsReceiptId,
        new_lines: Vec<ReceiptLine>,
    ) -> ReceivingResult<CommittedReceipt>;

    /// Void a non-approved GRN. Returns the removed record.
    fn delete_receipt(&self, grn_id: GoodsReceiptId) -> ReceivingResult<VoidedReceipt>;

    /// Audit-lock a GRN. Never touches inventory.
    fn approve(&self, grn_id: GoodsReceiptId, approved_by: UserId)
    -> ReceivingResult<GoodsReceipt>;

    fn get_receipt(&self, grn_id: GoodsReceiptId) -> ReceivingResult<GoodsReceipt>;

    /// Live GRNs of a purchase order, oldest first.
    fn list_receipts(&self, po_id: PurchaseOrderId) -> ReceivingResult<Vec<GoodsReceipt>>;

    /// Compare the cumulative index against a full rescan of the PO's GRNs.
    fn audit_cumulative(&self, po_id: PurchaseOrderId) -> ReceivingResult<CumulativeAudit>;

    /// Recompute the whole cumulative index from a full rescan.
    /// Returns how many purchase orders had drifted.
    fn rebuild_index(&self) -> ReceivingResult<usize>;

    fn has_receipts(&self, po_id: PurchaseOrderId) -> ReceivingResult<bool> {
        Ok(!self.list_receipts(po_id)?.is_empty())
    }
}

impl<L> ReceiptLedger for Arc<L>
where
    L: ReceiptLedger + ?Sized,
{
    fn get_cumulative_received(
        &self,
        po_id: PurchaseOrderId,
    ) -> ReceivingResult<BTreeMap<ProductId, i64>> {
        (**self).get_cumulative_received(po_id)
    }

    fn append_receipt(&self, receipt: NewGoodsReceipt) -> ReceivingResult<CommittedReceipt> {
        (**self).append_receipt(receipt)
    }

    fn update_receipt(
        &self,
        grn_id: GoodsReceiptId,
        new_lines: Vec<ReceiptLine>,
    ) -> ReceivingResult<CommittedReceipt> {
        (**self).update_receipt(grn_id, new_lines)
    }

    fn delete_receipt(&self, grn_id: GoodsReceiptId) -> ReceivingResult<VoidedReceipt> {
        (**self).delete_receipt(grn_id)
    }

    fn approve(
        &self,
        grn_id: GoodsReceiptId,
        approved_by: UserId,
    ) -> ReceivingResult<GoodsReceipt> {
        (**self).approve(grn_id, approved_by)
    }

    fn get_receipt(&self, grn_id: GoodsReceiptId) -> ReceivingResult<GoodsReceipt> {
        (**self).get_receipt(grn_id)
    }

    fn list_receipts(&self, po_id: PurchaseOrderId) -> ReceivingResult<Vec<GoodsReceipt>> {
        (**self).list_receipts(po_id)
    }

    fn audit_cumulative(&self, po_id: PurchaseOrderId) -> ReceivingResult<CumulativeAudit> {
        (**self).audit_cumulative(po_id)
    }

    fn rebuild_index(&self) -> ReceivingResult<usize> {
        (**self).rebuild_index()
    }

    fn has_receipts(&self, po_id: PurchaseOrderId) -> ReceivingResult<bool> {
        (**self).has_receipts(po_id)
    }
}
