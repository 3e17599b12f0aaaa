//! Pure reconciliation rules: remaining quantity, status derivation and
//! over-receipt validation.
//!
//! Everything here is deterministic and side-effect free. Callers are expected to
//! hold whatever lock makes the `already_received` figures they pass in current.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use grnrecon_core::{
    OverReceiptLine, ProductId, PurchaseOrderId, ReceivingError, ReceivingResult,
};

/// Three-way receipt classification shared by GRN and PO status.
///
/// The receiving and purchasing crates map this onto their own (distinct) status
/// enumerations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptProgress {
    Pending,
    PartiallyReceived,
    FullyReceived,
}

/// One line as seen by a single GRN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProgress {
    pub ordered_qty: i64,
    /// Cumulative receipt from every *other* GRN of the purchase order.
    pub already_received: i64,
    /// Quantity this GRN receives.
    pub received_qty: i64,
}

impl LineProgress {
    pub fn new(ordered_qty: i64, already_received: i64, received_qty: i64) -> Self {
        Self {
            ordered_qty,
            already_received,
            received_qty,
        }
    }

    fn is_covered(&self) -> bool {
        self.already_received.saturating_add(self.received_qty) >= self.ordered_qty
    }
}

/// One purchase order line in the post-commit aggregate view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateLine {
    pub ordered_qty: i64,
    pub total_received: i64,
}

/// A submitted receipt line, reduced to what validation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateLine {
    /// Position in the submitted GRN (reported back on over-receipt).
    pub line_index: usize,
    pub product_id: ProductId,
    pub received_qty: i64,
}

/// Per-product outcome of reconciling one GRN against its purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReconciliation {
    pub product_id: ProductId,
    pub ordered_qty: i64,
    pub already_received: i64,
    pub received_qty: i64,
    /// Open quantity before this GRN.
    pub remaining_before: i64,
    /// Open quantity once this GRN is committed.
    pub remaining_after: i64,
}

/// Outcome of [`reconcile`]: one entry per purchase order line, plus the GRN status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub lines: Vec<LineReconciliation>,
    pub progress: ReceiptProgress,
}

impl Reconciliation {
    /// Quantity received per product by the reconciled GRN (zero lines omitted).
    pub fn received_by_product(&self) -> BTreeMap<ProductId, i64> {
        self.lines
            .iter()
            .filter(|l| l.received_qty != 0)
            .map(|l| (l.product_id, l.received_qty))
            .collect()
    }
}

/// Reject negative quantities before any arithmetic happens.
pub fn validate_quantity(what: &str, qty: i64) -> ReceivingResult<()> {
    if qty < 0 {
        return Err(ReceivingError::invalid_quantity(format!(
            "{what} must not be negative (got {qty})"
        )));
    }
    Ok(())
}

/// `max(ordered_qty - already_received, 0)`.
pub fn compute_remaining(ordered_qty: i64, already_received: i64) -> ReceivingResult<i64> {
    validate_quantity("ordered quantity", ordered_qty)?;
    validate_quantity("already received quantity", already_received)?;
    Ok((ordered_qty - already_received).max(0))
}

/// GRN status from its own lines.
///
/// FullyReceived iff every line is covered and at least one line receives
/// something; PartiallyReceived iff something is received but not everything is
/// covered; Pending otherwise (including the empty line set).
pub fn derive_grn_status(lines: &[LineProgress]) -> ReceiptProgress {
    let any_received = lines.iter().any(|l| l.received_qty > 0);
    if !any_received {
        return ReceiptProgress::Pending;
    }

    if lines.iter().all(LineProgress::is_covered) {
        ReceiptProgress::FullyReceived
    } else {
        ReceiptProgress::PartiallyReceived
    }
}

/// PO status from the cumulative view: the same rule as [`derive_grn_status`] with
/// the whole cumulative receipt treated as received.
pub fn derive_po_status(aggregate_lines: &[AggregateLine]) -> ReceiptProgress {
    let folded: Vec<LineProgress> = aggregate_lines
        .iter()
        .map(|l| LineProgress::new(l.ordered_qty, 0, l.total_received))
        .collect();
    derive_grn_status(&folded)
}

/// Fails with `OverReceipt` when the line asks for more than is still open.
pub fn validate_receipt_against_remaining(
    line: &CandidateLine,
    remaining_qty: i64,
) -> ReceivingResult<()> {
    validate_quantity("received quantity", line.received_qty)?;
    if line.received_qty > remaining_qty {
        return Err(ReceivingError::OverReceipt(vec![OverReceiptLine {
            line_index: line.line_index,
            product_id: line.product_id,
            requested_qty: line.received_qty,
            remaining_qty,
        }]));
    }
    Ok(())
}

/// Reconcile a candidate GRN against ordered quantities and the cumulative receipt
/// of every other GRN of the same purchase order.
///
/// Lines carrying the same product (e.g. different batches) are summed before
/// validation. Every offending product is reported in a single `OverReceipt`;
/// nothing is partially accepted. Products ordered but absent from the candidate
/// take part in status derivation with a received quantity of zero.
pub fn reconcile(
    po_id: PurchaseOrderId,
    ordered: &BTreeMap<ProductId, i64>,
    already_received: &BTreeMap<ProductId, i64>,
    candidate: &[CandidateLine],
) -> ReceivingResult<Reconciliation> {
    // (first line index, summed quantity) per product.
    let mut requested: BTreeMap<ProductId, (usize, i64)> = BTreeMap::new();
    for line in candidate {
        validate_quantity("received quantity", line.received_qty)?;
        if !ordered.contains_key(&line.product_id) {
            return Err(ReceivingError::ProductNotOnOrder {
                po_id,
                product_id: line.product_id,
            });
        }
        let entry = requested
            .entry(line.product_id)
            .or_insert((line.line_index, 0));
        entry.1 = entry.1.checked_add(line.received_qty).ok_or_else(|| {
            ReceivingError::invalid_quantity("received quantity overflows")
        })?;
    }

    let mut violations = Vec::new();
    let mut lines = Vec::with_capacity(ordered.len());
    for (&product_id, &ordered_qty) in ordered {
        let already = already_received.get(&product_id).copied().unwrap_or(0);
        let remaining_before = compute_remaining(ordered_qty, already)?;
        let (line_index, received_qty) = requested.get(&product_id).copied().unwrap_or((0, 0));

        let check = CandidateLine {
            line_index,
            product_id,
            received_qty,
        };
        if let Err(ReceivingError::OverReceipt(mut over)) =
            validate_receipt_against_remaining(&check, remaining_before)
        {
            violations.append(&mut over);
            continue;
        }

        lines.push(LineReconciliation {
            product_id,
            ordered_qty,
            already_received: already,
            received_qty,
            remaining_before,
            remaining_after: remaining_before - received_qty,
        });
    }

    if !violations.is_empty() {
        violations.sort_by_key(|v| v.line_index);
        return Err(ReceivingError::OverReceipt(violations));
    }

    let progress = derive_grn_status(
        &lines
            .iter()
            .map(|l| LineProgress::new(l.ordered_qty, l.already_received, l.received_qty))
            .collect::<Vec<_>>(),
    );

    Ok(Reconciliation { lines, progress })
}
