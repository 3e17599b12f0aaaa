use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use grnrecon_core::{
    AggregateRoot, ProductId, PurchaseOrderId, ReceivingError, ReceivingResult, SupplierId,
};
use grnrecon_reconciliation::{AggregateLine, ReceiptProgress};

/// Purchase order status lifecycle.
///
/// Deliberately separate from the goods receipt status: a PO is never `Approved`,
/// a GRN is never `Sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Sent,
    PartiallyReceived,
    FullyReceived,
    Cancelled,
}

impl PurchaseOrderStatus {
    /// Statuses that accept new goods receipts.
    pub fn accepts_receipts(self) -> bool {
        matches!(self, Self::Sent | Self::PartiallyReceived)
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Draft => "Draft",
            Self::Sent => "Sent",
            Self::PartiallyReceived => "Partially Received",
            Self::FullyReceived => "Fully Received",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub product_id: ProductId,
    pub ordered_qty: i64,
    /// Unit price in minor currency units.
    pub unit_price: i64,
}

/// Input for creating a purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub po_number: String,
    pub supplier_id: SupplierId,
    pub lines: Vec<PurchaseOrderLine>,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    po_number: String,
    supplier_id: SupplierId,
    lines: Vec<PurchaseOrderLine>,
    status: PurchaseOrderStatus,
    created_at: DateTime<Utc>,
    version: u64,
}

impl PurchaseOrder {
    /// Validate and build a new purchase order in `Draft`.
    pub fn create(
        id: PurchaseOrderId,
        new: NewPurchaseOrder,
        created_at: DateTime<Utc>,
    ) -> ReceivingResult<Self> {
        let po_number = new.po_number.trim().to_string();
        if po_number.is_empty() {
            return Err(ReceivingError::invalid_input("po_number cannot be empty"));
        }
        if new.lines.is_empty() {
            return Err(ReceivingError::invalid_input(
                "purchase order needs at least one line",
            ));
        }

        let mut seen = BTreeSet::new();
        for line in &new.lines {
            if line.ordered_qty < 1 {
                return Err(ReceivingError::invalid_quantity(format!(
                    "ordered quantity for product {} must be at least 1 (got {})",
                    line.product_id, line.ordered_qty
                )));
            }
            if line.unit_price < 0 {
                return Err(ReceivingError::invalid_input(format!(
                    "unit price for product {} must not be negative",
                    line.product_id
                )));
            }
            if !seen.insert(line.product_id) {
                return Err(ReceivingError::conflict(format!(
                    "product {} appears twice on purchase order {po_number}",
                    line.product_id
                )));
            }
        }

        Ok(Self {
            id,
            po_number,
            supplier_id: new.supplier_id,
            lines: new.lines,
            status: PurchaseOrderStatus::Draft,
            created_at,
            version: 1,
        })
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn po_number(&self) -> &str {
        &self.po_number
    }

    pub fn supplier_id(&self) -> SupplierId {
        self.supplier_id
    }

    pub fn lines(&self) -> &[PurchaseOrderLine] {
        &self.lines
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Ordered quantity per product.
    pub fn ordered_quantities(&self) -> BTreeMap<ProductId, i64> {
        self.lines
            .iter()
            .map(|l| (l.product_id, l.ordered_qty))
            .collect()
    }

    /// Join the order lines with a cumulative receipt view.
    pub fn aggregate_lines(&self, cumulative: &BTreeMap<ProductId, i64>) -> Vec<AggregateLine> {
        self.lines
            .iter()
            .map(|l| AggregateLine {
                ordered_qty: l.ordered_qty,
                total_received: cumulative.get(&l.product_id).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Draft → Sent.
    pub fn send(&mut self) -> ReceivingResult<()> {
        if self.status != PurchaseOrderStatus::Draft {
            return Err(ReceivingError::invalid_transition(format!(
                "only draft purchase orders can be sent (status: {})",
                self.status
            )));
        }
        self.status = PurchaseOrderStatus::Sent;
        self.version += 1;
        Ok(())
    }

    /// Draft | Sent → Cancelled. Orders with receipts on them cannot be cancelled.
    pub fn cancel(&mut self, has_receipts: bool) -> ReceivingResult<()> {
        if !matches!(
            self.status,
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Sent
        ) || has_receipts
        {
            return Err(ReceivingError::invalid_transition(format!(
                "purchase order {} cannot be cancelled (status: {})",
                self.po_number, self.status
            )));
        }
        self.status = PurchaseOrderStatus::Cancelled;
        self.version += 1;
        Ok(())
    }

    /// Status implied by a derived receipt progress, given the current status.
    ///
    /// Draft and Cancelled orders are outside the receiving lifecycle and keep
    /// their status.
    pub fn status_for(&self, progress: ReceiptProgress) -> PurchaseOrderStatus {
        match self.status {
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Cancelled => self.status,
            _ => match progress {
                ReceiptProgress::Pending => PurchaseOrderStatus::Sent,
                ReceiptProgress::PartiallyReceived => PurchaseOrderStatus::PartiallyReceived,
                ReceiptProgress::FullyReceived => PurchaseOrderStatus::FullyReceived,
            },
        }
    }

    /// Apply a derived receipt progress. Returns `true` if the status changed.
    ///
    /// The version only moves on an actual change, so recomputing over an
    /// unchanged ledger is a no-op.
    pub fn apply_receipt_progress(&mut self, progress: ReceiptProgress) -> bool {
        let next = self.status_for(progress);
        if next == self.status {
            return false;
        }
        self.status = next;
        self.version += 1;
        true
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
