use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;

use grnrecon_core::{
    GoodsReceiptId, ProductId, PurchaseOrderId, ReceivingError, ReceivingResult, UserId,
};
use grnrecon_purchasing::PurchaseOrderStatus;
use grnrecon_reconciliation::reconcile;
use grnrecon_receiving::{
    GoodsReceipt, NewGoodsReceipt, ReceiptLine, candidate_lines, validate_receipt_lines,
};

use super::r#trait::{CommittedReceipt, CumulativeAudit, ReceiptLedger, VoidedReceipt};
use crate::collaborators::{InventoryCollaborator, PurchaseOrderLookup, ReceiptDelta};
use crate::config::ReceivingConfig;
use crate::lock::KeyedLocks;

#[derive(Debug, Default)]
struct LedgerState {
    receipts: HashMap<GoodsReceiptId, GoodsReceipt>,
    /// Live GRNs per purchase order, in commit order.
    by_po: HashMap<PurchaseOrderId, Vec<GoodsReceiptId>>,
    /// (po, product) -> cumulative received. Zero totals are not stored.
    cumulative: HashMap<PurchaseOrderId, BTreeMap<ProductId, i64>>,
    /// Last GRN sequence handed out. Never decremented.
    next_sequence: u64,
}

impl LedgerState {
    fn adjust(&mut self, po_id: PurchaseOrderId, quantities: &BTreeMap<ProductId, i64>, sign: i64) {
        let totals = self.cumulative.entry(po_id).or_default();
        for (product_id, qty) in quantities {
            *totals.entry(*product_id).or_insert(0) += sign * qty;
        }
        totals.retain(|_, qty| *qty != 0);
        if totals.is_empty() {
            self.cumulative.remove(&po_id);
        }
    }

    fn rescan(&self, po_id: PurchaseOrderId) -> BTreeMap<ProductId, i64> {
        let mut totals = BTreeMap::new();
        for grn_id in self.by_po.get(&po_id).into_iter().flatten() {
            if let Some(grn) = self.receipts.get(grn_id) {
                for (product_id, qty) in grn.received_by_product() {
                    *totals.entry(product_id).or_insert(0) += qty;
                }
            }
        }
        totals.retain(|_, qty| *qty != 0);
        totals
    }
}

/// In-memory receipt ledger.
///
/// Read-validate-write runs under the per-PO key lock, which is shared with the
/// purchase order store so that cancellation and status recompute see the same
/// serialization. Per-GRN mutations additionally take the GRN key lock first.
///
/// A commit is: inventory delta, then PO status, then ledger state. Inventory
/// deltas that failed with an unknown outcome are revoked; if the revoke fails too
/// they are parked per order and every later change on that order is refused
/// until they are withdrawn.
pub struct InMemoryReceiptLedger<L, I> {
    lookup: L,
    inventory: I,
    po_locks: Arc<KeyedLocks<PurchaseOrderId>>,
    grn_locks: KeyedLocks<GoodsReceiptId>,
    config: ReceivingConfig,
    state: RwLock<LedgerState>,
    in_doubt: Mutex<HashMap<PurchaseOrderId, Vec<ReceiptDelta>>>,
}

impl<L, I> InMemoryReceiptLedger<L, I>
where
    L: PurchaseOrderLookup,
    I: InventoryCollaborator,
{
    pub fn new(
        lookup: L,
        inventory: I,
        po_locks: Arc<KeyedLocks<PurchaseOrderId>>,
        config: ReceivingConfig,
    ) -> Self {
        Self {
            lookup,
            inventory,
            po_locks,
            grn_locks: KeyedLocks::new("goods receipt"),
            config,
            state: RwLock::new(LedgerState::default()),
            in_doubt: Mutex::new(HashMap::new()),
        }
    }

    pub fn po_locks(&self) -> &Arc<KeyedLocks<PurchaseOrderId>> {
        &self.po_locks
    }

    /// Inventory deltas for `po_id` that could not be confirmed nor withdrawn yet.
    pub fn unresolved_deltas(&self, po_id: PurchaseOrderId) -> ReceivingResult<Vec<ReceiptDelta>> {
        Ok(self
            .in_doubt
            .lock()
            .map_err(|_| ReceivingError::storage("in-doubt deltas poisoned"))?
            .get(&po_id)
            .cloned()
            .unwrap_or_default())
    }

    fn read_state(&self) -> ReceivingResult<std::sync::RwLockReadGuard<'_, LedgerState>> {
        self.state
            .read()
            .map_err(|_| ReceivingError::storage("receipt ledger poisoned"))
    }

    fn write_state(&self) -> ReceivingResult<std::sync::RwLockWriteGuard<'_, LedgerState>> {
        self.state
            .write()
            .map_err(|_| ReceivingError::storage("receipt ledger poisoned"))
    }

    fn next_grn_number(&self) -> ReceivingResult<String> {
        let mut state = self.write_state()?;
        state.next_sequence += 1;
        Ok(format!("{}-{:06}", self.config.grn_prefix, state.next_sequence))
    }

    fn load(&self, grn_id: GoodsReceiptId) -> ReceivingResult<GoodsReceipt> {
        self.read_state()?
            .receipts
            .get(&grn_id)
            .cloned()
            .ok_or_else(|| ReceivingError::not_found(format!("goods receipt {grn_id}")))
    }

    /// Withdraw every parked delta of `po_id`. Fails while any stays unresolved.
    fn settle_in_doubt(&self, po_id: PurchaseOrderId) -> ReceivingResult<()> {
        let mut in_doubt = self
            .in_doubt
            .lock()
            .map_err(|_| ReceivingError::storage("in-doubt deltas poisoned"))?;
        let Some(parked) = in_doubt.remove(&po_id) else {
            return Ok(());
        };

        let mut unresolved = Vec::new();
        for delta in parked {
            match self.inventory.revoke_receipt_delta(&delta) {
                Ok(()) => tracing::info!(
                    delta_id = %delta.delta_id,
                    grn_id = %delta.grn_id,
                    "in-doubt inventory delta withdrawn"
                ),
                Err(e) => {
                    tracing::warn!(delta_id = %delta.delta_id, error = %e, "in-doubt inventory delta still unresolved");
                    unresolved.push(delta);
                }
            }
        }
        if unresolved.is_empty() {
            return Ok(());
        }

        let count = unresolved.len();
        in_doubt.insert(po_id, unresolved);
        Err(ReceivingError::InventoryCollaboratorFailure(format!(
            "{count} earlier inventory delta(s) on purchase order {po_id} are unresolved"
        )))
    }

    /// Revoke a delta the ledger will not finalize. Parks it if the revoke fails.
    fn withdraw(&self, delta: &ReceiptDelta) {
        let Err(e) = self.inventory.revoke_receipt_delta(delta) else {
            tracing::debug!(delta_id = %delta.delta_id, grn_id = %delta.grn_id, "inventory delta withdrawn");
            return;
        };
        tracing::error!(
            delta_id = %delta.delta_id,
            grn_id = %delta.grn_id,
            po_id = %delta.po_id,
            error = %e,
            "inventory delta could not be withdrawn; parked"
        );
        match self.in_doubt.lock() {
            Ok(mut parked) => parked.entry(delta.po_id).or_default().push(delta.clone()),
            Err(_) => tracing::error!(delta_id = %delta.delta_id, "in-doubt deltas poisoned"),
        }
    }

    fn push_delta(&self, delta: &ReceiptDelta) -> ReceivingResult<()> {
        self.settle_in_doubt(delta.po_id)?;
        self.inventory.apply_receipt_delta(delta).map_err(|e| {
            tracing::warn!(
                delta_id = %delta.delta_id,
                grn_id = %delta.grn_id,
                po_id = %delta.po_id,
                kind = ?delta.kind,
                error = %e,
                "inventory failed receipt delta; ledger left unchanged"
            );
            // The collaborator may have booked it before failing.
            self.withdraw(delta);
            ReceivingError::InventoryCollaboratorFailure(e.to_string())
        })
    }

    /// Book `delta` with inventory, then write the PO status and the ledger change.
    fn commit(
        &self,
        delta: &ReceiptDelta,
        write: impl FnOnce(&mut LedgerState),
    ) -> ReceivingResult<PurchaseOrderStatus> {
        self.push_delta(delta)?;
        self.finalize(delta, write).inspect_err(|err| {
            tracing::error!(grn_id = %delta.grn_id, error = %err, "ledger commit failed after inventory update");
            self.withdraw(delta);
        })
    }

    fn finalize(
        &self,
        delta: &ReceiptDelta,
        write: impl FnOnce(&mut LedgerState),
    ) -> ReceivingResult<PurchaseOrderStatus> {
        let mut state = self.write_state()?;
        let mut totals = state.cumulative.get(&delta.po_id).cloned().unwrap_or_default();
        for (product_id, qty) in delta.net_by_product() {
            *totals.entry(product_id).or_insert(0) += qty;
        }
        totals.retain(|_, qty| *qty != 0);

        let po_status = self.lookup.record_receipt_progress(delta.po_id, &totals)?;
        write(&mut state);
        Ok(po_status)
    }
}

impl<L, I> ReceiptLedger for InMemoryReceiptLedger<L, I>
where
    L: PurchaseOrderLookup,
    I: InventoryCollaborator,
{
    fn get_cumulative_received(
        &self,
        po_id: PurchaseOrderId,
    ) -> ReceivingResult<BTreeMap<ProductId, i64>> {
        Ok(self
            .read_state()?
            .cumulative
            .get(&po_id)
            .cloned()
            .unwrap_or_default())
    }

    fn append_receipt(&self, receipt: NewGoodsReceipt) -> ReceivingResult<CommittedReceipt> {
        validate_receipt_lines(&receipt.lines)?;
        let po_id = receipt.po_id;
        let _po_guard = self.po_locks.acquire(po_id, self.config.lock_timeout)?;

        let ordered = self.lookup.get_ordered_quantities(po_id)?;
        let already = self.get_cumulative_received(po_id)?;
        let reconciliation = reconcile(po_id, &ordered, &already, &candidate_lines(&receipt.lines))?;
        // Checked under the PO lock so a concurrent cancellation is always seen.
        if !self.lookup.is_open_for_receipt(po_id)? {
            return Err(ReceivingError::NotReceivable {
                po_id,
                status: "closed for receipt".to_string(),
            });
        }

        let grn_number = self.next_grn_number()?;
        let grn = GoodsReceipt::commit(
            GoodsReceiptId::new(),
            grn_number,
            receipt,
            reconciliation.progress,
            Utc::now(),
        )?;

        let po_status = self.commit(&ReceiptDelta::receipt(&grn), |state| {
            state.adjust(po_id, &grn.received_by_product(), 1);
            state.by_po.entry(po_id).or_default().push(grn.id_typed());
            state.receipts.insert(grn.id_typed(), grn.clone());
        })?;

        tracing::info!(
            grn_id = %grn.id_typed(),
            grn_number = grn.grn_number(),
            po_id = %po_id,
            status = %grn.status(),
            po_status = %po_status,
            "goods receipt committed"
        );
        Ok(CommittedReceipt {
            receipt: grn,
            lines: reconciliation.lines,
            po_status,
        })
    }

    fn update_receipt(
        &self,
        grn_id: GoodsReceiptId,
        new_lines: Vec<ReceiptLine>,
    ) -> ReceivingResult<CommittedReceipt> {
        validate_receipt_lines(&new_lines)?;
        let _grn_guard = self.grn_locks.acquire(grn_id, self.config.lock_timeout)?;

        let before = self.load(grn_id)?;
        before.ensure_mutable()?;
        let po_id = before.po_id();
        let _po_guard = self.po_locks.acquire(po_id, self.config.lock_timeout)?;

        // Everything received on the order except this GRN's own prior contribution.
        let ordered = self.lookup.get_ordered_quantities(po_id)?;
        let mut others = self.get_cumulative_received(po_id)?;
        for (product_id, qty) in before.received_by_product() {
            if let Some(total) = others.get_mut(&product_id) {
                *total -= qty;
            }
        }
        others.retain(|_, qty| *qty != 0);

        let reconciliation = reconcile(po_id, &ordered, &others, &candidate_lines(&new_lines))?;
        let mut after = before.clone();
        after.replace_lines(new_lines, reconciliation.progress, Utc::now())?;

        let po_status = self.commit(&ReceiptDelta::correction(&before, &after), |state| {
            state.adjust(po_id, &before.received_by_product(), -1);
            state.adjust(po_id, &after.received_by_product(), 1);
            state.receipts.insert(grn_id, after.clone());
        })?;

        tracing::info!(
            grn_id = %grn_id,
            grn_number = after.grn_number(),
            po_id = %po_id,
            status = %after.status(),
            po_status = %po_status,
            "goods receipt updated"
        );
        Ok(CommittedReceipt {
            receipt: after,
            lines: reconciliation.lines,
            po_status,
        })
    }

    fn delete_receipt(&self, grn_id: GoodsReceiptId) -> ReceivingResult<VoidedReceipt> {
        let _grn_guard = self.grn_locks.acquire(grn_id, self.config.lock_timeout)?;

        let grn = self.load(grn_id)?;
        grn.ensure_mutable()?;
        let po_id = grn.po_id();
        let _po_guard = self.po_locks.acquire(po_id, self.config.lock_timeout)?;

        let po_status = self.commit(&ReceiptDelta::reversal(&grn), |state| {
            state.adjust(po_id, &grn.received_by_product(), -1);
            if let Some(ids) = state.by_po.get_mut(&po_id) {
                ids.retain(|id| *id != grn_id);
                if ids.is_empty() {
                    state.by_po.remove(&po_id);
                }
            }
            state.receipts.remove(&grn_id);
        })?;

        tracing::info!(
            grn_id = %grn_id,
            grn_number = grn.grn_number(),
            po_id = %po_id,
            po_status = %po_status,
            "goods receipt deleted"
        );
        Ok(VoidedReceipt {
            receipt: grn,
            po_status,
        })
    }

    fn approve(
        &self,
        grn_id: GoodsReceiptId,
        approved_by: UserId,
    ) -> ReceivingResult<GoodsReceipt> {
        let _grn_guard = self.grn_locks.acquire(grn_id, self.config.lock_timeout)?;

        let mut state = self.write_state()?;
        let grn = state
            .receipts
            .get_mut(&grn_id)
            .ok_or_else(|| ReceivingError::not_found(format!("goods receipt {grn_id}")))?;
        grn.approve(approved_by, Utc::now())?;

        tracing::info!(
            grn_id = %grn_id,
            grn_number = grn.grn_number(),
            approved_by = %approved_by,
            "goods receipt approved"
        );
        Ok(grn.clone())
    }

    fn get_receipt(&self, grn_id: GoodsReceiptId) -> ReceivingResult<GoodsReceipt> {
        self.load(grn_id)
    }

    fn list_receipts(&self, po_id: PurchaseOrderId) -> ReceivingResult<Vec<GoodsReceipt>> {
        let state = self.read_state()?;
        Ok(state
            .by_po
            .get(&po_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.receipts.get(id).cloned())
            .collect())
    }

    fn audit_cumulative(&self, po_id: PurchaseOrderId) -> ReceivingResult<CumulativeAudit> {
        let state = self.read_state()?;
        let audit = CumulativeAudit {
            po_id,
            indexed: state.cumulative.get(&po_id).cloned().unwrap_or_default(),
            rescanned: state.rescan(po_id),
        };
        if !audit.is_consistent() {
            tracing::error!(po_id = %po_id, drift = ?audit.drift(), "cumulative index drifted");
        }
        Ok(audit)
    }

    fn has_receipts(&self, po_id: PurchaseOrderId) -> ReceivingResult<bool> {
        Ok(self
            .read_state()?
            .by_po
            .get(&po_id)
            .is_some_and(|ids| !ids.is_empty()))
    }

    fn rebuild_index(&self) -> ReceivingResult<usize> {
        let mut state = self.write_state()?;

        let mut po_ids: Vec<PurchaseOrderId> = state.by_po.keys().copied().collect();
        po_ids.extend(state.cumulative.keys().copied());
        po_ids.sort();
        po_ids.dedup();

        let mut rebuilt = HashMap::new();
        let mut drifted = 0;
        for po_id in po_ids {
            let totals = state.rescan(po_id);
            if state.cumulative.get(&po_id).cloned().unwrap_or_default() != totals {
                drifted += 1;
            }
            if !totals.is_empty() {
                rebuilt.insert(po_id, totals);
            }
        }
        state.cumulative = rebuilt;

        tracing::info!(drifted, "cumulative index rebuilt");
        Ok(drifted)
    }
}
