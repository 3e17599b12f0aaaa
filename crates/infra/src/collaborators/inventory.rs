use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use grnrecon_core::{AggregateRoot, GoodsReceiptId, ProductId, PurchaseOrderId};
use grnrecon_receiving::GoodsReceipt;

use super::CollaboratorError;

/// Why a stock delta is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// Goods booked in by a new GRN.
    Receipt,
    /// An edited GRN: previous lines reversed, new lines booked.
    Correction,
    /// A deleted GRN: every line reversed.
    Reversal,
}

/// One signed stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDeltaLine {
    pub product_id: ProductId,
    pub quantity_delta: i64,
    pub batch: Option<String>,
    pub expiry: Option<NaiveDate>,
    pub destination_warehouse: String,
}

/// Stock change caused by one ledger commit.
///
/// `delta_id` is minted once per prepared change. Redelivering the same delta is
/// a no-op for the collaborator; a retried change with different lines is a new
/// delta with a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDelta {
    pub delta_id: Uuid,
    pub po_id: PurchaseOrderId,
    pub grn_id: GoodsReceiptId,
    pub revision: u64,
    pub kind: DeltaKind,
    pub lines: Vec<ReceiptDeltaLine>,
}

fn signed_lines(grn: &GoodsReceipt, sign: i64) -> impl Iterator<Item = ReceiptDeltaLine> + '_ {
    grn.lines()
        .iter()
        .filter(|l| l.received_qty != 0)
        .map(move |l| ReceiptDeltaLine {
            product_id: l.product_id,
            quantity_delta: sign * l.received_qty,
            batch: l.batch.clone(),
            expiry: l.expiry,
            destination_warehouse: grn.destination_warehouse().to_string(),
        })
}

impl ReceiptDelta {
    pub fn receipt(grn: &GoodsReceipt) -> Self {
        Self {
            delta_id: Uuid::now_v7(),
            po_id: grn.po_id(),
            grn_id: grn.id_typed(),
            revision: grn.version(),
            kind: DeltaKind::Receipt,
            lines: signed_lines(grn, 1).collect(),
        }
    }

    pub fn correction(before: &GoodsReceipt, after: &GoodsReceipt) -> Self {
        Self {
            delta_id: Uuid::now_v7(),
            po_id: after.po_id(),
            grn_id: after.id_typed(),
            revision: after.version(),
            kind: DeltaKind::Correction,
            lines: signed_lines(before, -1).chain(signed_lines(after, 1)).collect(),
        }
    }

    pub fn reversal(grn: &GoodsReceipt) -> Self {
        Self {
            delta_id: Uuid::now_v7(),
            po_id: grn.po_id(),
            grn_id: grn.id_typed(),
            revision: grn.version(),
            kind: DeltaKind::Reversal,
            lines: signed_lines(grn, -1).collect(),
        }
    }

    pub fn idempotency_key(&self) -> Uuid {
        self.delta_id
    }

    /// Net movement per product (batches and reversals folded together).
    pub fn net_by_product(&self) -> BTreeMap<ProductId, i64> {
        let mut out = BTreeMap::new();
        for line in &self.lines {
            *out.entry(line.product_id).or_insert(0) += line.quantity_delta;
        }
        out.retain(|_, qty| *qty != 0);
        out
    }
}

/// Stock-keeping system that books received goods.
pub trait InventoryCollaborator: Send + Sync {
    /// Apply a receipt delta. Must be idempotent per [`ReceiptDelta::idempotency_key`].
    fn apply_receipt_delta(&self, delta: &ReceiptDelta) -> Result<(), CollaboratorError>;

    /// Withdraw a delta whose outcome the ledger could not confirm.
    ///
    /// An applied delta is reversed. A delta that never arrived is remembered so a
    /// late delivery is refused. Revoking twice is a no-op.
    fn revoke_receipt_delta(&self, delta: &ReceiptDelta) -> Result<(), CollaboratorError>;
}

impl<I> InventoryCollaborator for Arc<I>
where
    I: InventoryCollaborator + ?Sized,
{
    fn apply_receipt_delta(&self, delta: &ReceiptDelta) -> Result<(), CollaboratorError> {
        (**self).apply_receipt_delta(delta)
    }

    fn revoke_receipt_delta(&self, delta: &ReceiptDelta) -> Result<(), CollaboratorError> {
        (**self).revoke_receipt_delta(delta)
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    on_hand: HashMap<(ProductId, String), i64>,
    applied: HashSet<Uuid>,
    revoked: HashSet<Uuid>,
    deltas: Vec<ReceiptDelta>,
}

impl InventoryState {
    /// Balances after moving every line by `sign * quantity_delta`, or the first
    /// balance that would go negative.
    fn project(
        &self,
        delta: &ReceiptDelta,
        sign: i64,
    ) -> Result<HashMap<(ProductId, String), i64>, CollaboratorError> {
        let mut next: HashMap<(ProductId, String), i64> = HashMap::new();
        for line in &delta.lines {
            let key = (line.product_id, line.destination_warehouse.clone());
            let current = next
                .get(&key)
                .copied()
                .unwrap_or_else(|| self.on_hand.get(&key).copied().unwrap_or(0));
            next.insert(key, current + sign * line.quantity_delta);
        }
        match next.iter().find(|(_, qty)| **qty < 0) {
            Some(((product_id, warehouse), qty)) => Err(CollaboratorError::Rejected(format!(
                "product {product_id} in {warehouse} would go to {qty}"
            ))),
            None => Ok(next),
        }
    }
}

/// In-memory stock book for tests/dev.
///
/// Rejects deltas that would drive on-hand stock below zero (e.g. reversing a
/// receipt whose goods were already issued).
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    state: Mutex<InventoryState>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// On-hand quantity of a product in a warehouse.
    pub fn on_hand(&self, product_id: ProductId, warehouse: &str) -> i64 {
        self.state
            .lock()
            .map(|s| {
                s.on_hand
                    .get(&(product_id, warehouse.to_string()))
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Every delta that was actually applied, in order.
    pub fn applied_deltas(&self) -> Vec<ReceiptDelta> {
        self.state.lock().map(|s| s.deltas.clone()).unwrap_or_default()
    }

    pub fn applied_count(&self) -> usize {
        self.state.lock().map(|s| s.deltas.len()).unwrap_or(0)
    }

    /// Issue stock out of a warehouse (stands in for sales/transfers in tests).
    pub fn issue(
        &self,
        product_id: ProductId,
        warehouse: &str,
        qty: i64,
    ) -> Result<(), CollaboratorError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("inventory lock poisoned".to_string()))?;
        let slot = state
            .on_hand
            .entry((product_id, warehouse.to_string()))
            .or_insert(0);
        if *slot < qty {
            return Err(CollaboratorError::Rejected(format!(
                "only {} of product {product_id} on hand in {warehouse}",
                *slot
            )));
        }
        *slot -= qty;
        Ok(())
    }
}

impl InventoryCollaborator for InMemoryInventory {
    fn apply_receipt_delta(&self, delta: &ReceiptDelta) -> Result<(), CollaboratorError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("inventory lock poisoned".to_string()))?;

        let key = delta.idempotency_key();
        if state.revoked.contains(&key) {
            return Err(CollaboratorError::Rejected(format!("delta {key} was revoked")));
        }
        if state.applied.contains(&key) {
            tracing::debug!(delta_id = %key, grn_id = %delta.grn_id, "duplicate delta ignored");
            return Ok(());
        }

        // Check the whole delta before touching any balance.
        let next = state.project(delta, 1)?;
        state.on_hand.extend(next);
        state.applied.insert(key);
        state.deltas.push(delta.clone());
        Ok(())
    }

    fn revoke_receipt_delta(&self, delta: &ReceiptDelta) -> Result<(), CollaboratorError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("inventory lock poisoned".to_string()))?;

        let key = delta.idempotency_key();
        if state.revoked.contains(&key) {
            return Ok(());
        }
        if state.applied.contains(&key) {
            let next = state.project(delta, -1)?;
            state.on_hand.extend(next);
            state.applied.remove(&key);
            state.deltas.retain(|d| d.delta_id != key);
            tracing::debug!(delta_id = %key, grn_id = %delta.grn_id, "applied delta reversed");
        }
        state.revoked.insert(key);
        Ok(())
    }
}
