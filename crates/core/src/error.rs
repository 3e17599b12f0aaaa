//! Receiving error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{GoodsReceiptId, ProductId, PurchaseOrderId};

/// Result type used across the receiving workspace.
pub type ReceivingResult<T> = Result<T, ReceivingError>;

/// One receipt line that would push cumulative receipt past the ordered quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverReceiptLine {
    /// Position of the line in the submitted GRN (0-based). When several lines carry
    /// the same product, the first of them is reported.
    pub line_index: usize,
    pub product_id: ProductId,
    /// Quantity the GRN tried to receive for this product.
    pub requested_qty: i64,
    /// Quantity still open on the purchase order before this GRN.
    pub remaining_qty: i64,
}

impl core::fmt::Display for OverReceiptLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "line {} (product {}): requested {}, remaining {}",
            self.line_index, self.product_id, self.requested_qty, self.remaining_qty
        )
    }
}

fn join_lines(lines: &[OverReceiptLine]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error raised by reconciliation, ledger, store and orchestration operations.
///
/// Every failure is typed so callers can tell retryable contention (`Busy`,
/// `Timeout`) apart from terminal business rejections (`OverReceipt`,
/// `AlreadyApproved`, ...). See [`ReceivingError::is_retryable`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReceivingError {
    /// Malformed or negative quantity; rejected before any mutation.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A required field is blank or otherwise malformed (PO number, warehouse,
    /// batch label, unit price).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The candidate quantities would exceed the ordered quantity.
    #[error("over-receipt: {}", join_lines(.0))]
    OverReceipt(Vec<OverReceiptLine>),

    /// A receipt line references a product the purchase order does not contain.
    #[error("product {product_id} is not on purchase order {po_id}")]
    ProductNotOnOrder {
        po_id: PurchaseOrderId,
        product_id: ProductId,
    },

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Unknown purchase order or goods receipt.
    #[error("not found: {0}")]
    NotFound(String),

    /// `approve` was called on a GRN that is already approved.
    #[error("goods receipt {0} is already approved")]
    AlreadyApproved(GoodsReceiptId),

    /// Mutation attempted on an approved (immutable) GRN.
    #[error("goods receipt {0} is approved and can no longer change")]
    ImmutableRecord(GoodsReceiptId),

    /// The requested lifecycle transition is not allowed from the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The purchase order is not in a state that accepts goods receipts.
    #[error("purchase order {po_id} cannot receive goods while {status}")]
    NotReceivable {
        po_id: PurchaseOrderId,
        status: String,
    },

    /// Uniqueness conflict (duplicate PO/GRN number, duplicate id).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A per-key lock could not be acquired within the configured timeout.
    #[error("busy: {0}")]
    Busy(String),

    /// The operation ran past its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The inventory collaborator rejected or failed the stock update; nothing was
    /// committed to the ledger.
    #[error("inventory update failed: {0}")]
    InventoryCollaboratorFailure(String),

    /// Internal storage failure (e.g. poisoned lock).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ReceivingError {
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the caller may retry the same request (with backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::Timeout(_) | Self::InventoryCollaboratorFailure(_)
        )
    }
}
