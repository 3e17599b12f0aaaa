use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use grnrecon_core::{
    AggregateRoot, GoodsReceiptId, ProductId, PurchaseOrderId, ReceivingError, ReceivingResult,
    UserId,
};
use grnrecon_reconciliation::{CandidateLine, ReceiptProgress, validate_quantity};

/// Goods receipt status.
///
/// `Pending`, `PartiallyReceived` and `FullyReceived` are derived from content and
/// never assigned directly; `Approved` is terminal and only reachable via
/// [`GoodsReceipt::approve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodsReceiptStatus {
    Pending,
    PartiallyReceived,
    FullyReceived,
    Approved,
}

impl From<ReceiptProgress> for GoodsReceiptStatus {
    fn from(value: ReceiptProgress) -> Self {
        match value {
            ReceiptProgress::Pending => Self::Pending,
            ReceiptProgress::PartiallyReceived => Self::PartiallyReceived,
            ReceiptProgress::FullyReceived => Self::FullyReceived,
        }
    }
}

impl core::fmt::Display for GoodsReceiptStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::PartiallyReceived => "Partially Received",
            Self::FullyReceived => "Fully Received",
            Self::Approved => "Approved",
        };
        f.write_str(s)
    }
}

/// A received product line. Several lines may carry the same product with
/// different batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub product_id: ProductId,
    pub received_qty: i64,
    pub batch: Option<String>,
    pub expiry: Option<NaiveDate>,
}

impl ReceiptLine {
    pub fn new(product_id: ProductId, received_qty: i64) -> Self {
        Self {
            product_id,
            received_qty,
            batch: None,
            expiry: None,
        }
    }

    pub fn with_batch(mut self, batch: impl Into<String>, expiry: Option<NaiveDate>) -> Self {
        self.batch = Some(batch.into());
        self.expiry = expiry;
        self
    }
}

/// Input for recording a new goods receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGoodsReceipt {
    pub po_id: PurchaseOrderId,
    pub received_date: NaiveDate,
    pub destination_warehouse: String,
    pub lines: Vec<ReceiptLine>,
}

/// Shape checks that need no ledger state: quantities, batch labels.
pub fn validate_receipt_lines(lines: &[ReceiptLine]) -> ReceivingResult<()> {
    for (idx, line) in lines.iter().enumerate() {
        validate_quantity(&format!("received quantity on line {idx}"), line.received_qty)?;
        if let Some(batch) = &line.batch {
            if batch.trim().is_empty() {
                return Err(ReceivingError::invalid_input(format!(
                    "batch on line {idx} is blank"
                )));
            }
        }
    }
    Ok(())
}

/// Reduce receipt lines to what the reconciliation engine validates.
pub fn candidate_lines(lines: &[ReceiptLine]) -> Vec<CandidateLine> {
    lines
        .iter()
        .enumerate()
        .map(|(line_index, l)| CandidateLine {
            line_index,
            product_id: l.product_id,
            received_qty: l.received_qty,
        })
        .collect()
}

/// Aggregate root: GoodsReceipt (GRN).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceipt {
    id: GoodsReceiptId,
    grn_number: String,
    po_id: PurchaseOrderId,
    lines: Vec<ReceiptLine>,
    received_date: NaiveDate,
    destination_warehouse: String,
    status: GoodsReceiptStatus,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<UserId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revision: u64,
}

impl GoodsReceipt {
    /// Build a committed GRN. `progress` comes from reconciling `new.lines`.
    pub fn commit(
        id: GoodsReceiptId,
        grn_number: impl Into<String>,
        new: NewGoodsReceipt,
        progress: ReceiptProgress,
        now: DateTime<Utc>,
    ) -> ReceivingResult<Self> {
        validate_receipt_lines(&new.lines)?;
        let destination_warehouse = new.destination_warehouse.trim().to_string();
        if destination_warehouse.is_empty() {
            return Err(ReceivingError::invalid_input(
                "destination warehouse cannot be empty",
            ));
        }

        Ok(Self {
            id,
            grn_number: grn_number.into(),
            po_id: new.po_id,
            lines: new.lines,
            received_date: new.received_date,
            destination_warehouse,
            status: progress.into(),
            approved_at: None,
            approved_by: None,
            created_at: now,
            updated_at: now,
            revision: 1,
        })
    }

    pub fn id_typed(&self) -> GoodsReceiptId {
        self.id
    }

    pub fn grn_number(&self) -> &str {
        &self.grn_number
    }

    pub fn po_id(&self) -> PurchaseOrderId {
        self.po_id
    }

    pub fn lines(&self) -> &[ReceiptLine] {
        &self.lines
    }

    pub fn received_date(&self) -> NaiveDate {
        self.received_date
    }

    pub fn destination_warehouse(&self) -> &str {
        &self.destination_warehouse
    }

    pub fn status(&self) -> GoodsReceiptStatus {
        self.status
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_approved(&self) -> bool {
        self.status == GoodsReceiptStatus::Approved
    }

    /// Total received per product on this GRN (batches summed).
    pub fn received_by_product(&self) -> BTreeMap<ProductId, i64> {
        let mut out = BTreeMap::new();
        for line in &self.lines {
            *out.entry(line.product_id).or_insert(0) += line.received_qty;
        }
        out
    }

    /// Approved GRNs cannot change.
    pub fn ensure_mutable(&self) -> ReceivingResult<()> {
        if self.is_approved() {
            return Err(ReceivingError::ImmutableRecord(self.id));
        }
        Ok(())
    }

    /// Replace every line; `progress` comes from reconciling `lines` against the
    /// order without this GRN's previous contribution.
    pub fn replace_lines(
        &mut self,
        lines: Vec<ReceiptLine>,
        progress: ReceiptProgress,
        now: DateTime<Utc>,
    ) -> ReceivingResult<()> {
        self.ensure_mutable()?;
        validate_receipt_lines(&lines)?;

        self.lines = lines;
        self.status = progress.into();
        self.updated_at = now;
        self.revision += 1;
        Ok(())
    }

    /// Terminal audit lock. Never touches quantities.
    pub fn approve(&mut self, approved_by: UserId, now: DateTime<Utc>) -> ReceivingResult<()> {
        match self.status {
            GoodsReceiptStatus::Approved => Err(ReceivingError::AlreadyApproved(self.id)),
            GoodsReceiptStatus::Pending => Err(ReceivingError::invalid_transition(format!(
                "goods receipt {} has nothing received and cannot be approved",
                self.grn_number
            ))),
            GoodsReceiptStatus::PartiallyReceived | GoodsReceiptStatus::FullyReceived => {
                self.status = GoodsReceiptStatus::Approved;
                self.approved_at = Some(now);
                self.approved_by = Some(approved_by);
                self.updated_at = now;
                self.revision += 1;
                Ok(())
            }
        }
    }
}

impl AggregateRoot for GoodsReceipt {
    type Id = GoodsReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.revision
    }
}
