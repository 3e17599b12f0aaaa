use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use grnrecon_core::{GoodsReceiptId, ProductId, PurchaseOrderId, UserId};
use grnrecon_events::Event;
use uuid::Uuid;

use crate::receipt::GoodsReceipt;

/// Stream type of every goods receipt event.
pub const GRN_STREAM_TYPE: &str = "receiving.grn";

/// Event: GoodsReceiptApproved (audit lock, no stock effect).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptApproved {
    pub grn_id: GoodsReceiptId,
    pub grn_number: String,
    pub po_id: PurchaseOrderId,
    pub approved_by: UserId,
    pub revision: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceiptDeleted.
///
/// Carries the quantities that left the cumulative totals so auditors can
/// reconstruct the voided receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptDeleted {
    pub grn_id: GoodsReceiptId,
    pub grn_number: String,
    pub po_id: PurchaseOrderId,
    pub deleted_by: UserId,
    pub voided_quantities: BTreeMap<ProductId, i64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceivingEvent {
    GoodsReceiptApproved(GoodsReceiptApproved),
    GoodsReceiptDeleted(GoodsReceiptDeleted),
}

impl ReceivingEvent {
    pub fn approved(grn: &GoodsReceipt, approved_by: UserId, occurred_at: DateTime<Utc>) -> Self {
        use grnrecon_core::AggregateRoot;

        Self::GoodsReceiptApproved(GoodsReceiptApproved {
            grn_id: grn.id_typed(),
            grn_number: grn.grn_number().to_string(),
            po_id: grn.po_id(),
            approved_by,
            revision: grn.version(),
            occurred_at,
        })
    }

    pub fn deleted(grn: &GoodsReceipt, deleted_by: UserId, occurred_at: DateTime<Utc>) -> Self {
        Self::GoodsReceiptDeleted(GoodsReceiptDeleted {
            grn_id: grn.id_typed(),
            grn_number: grn.grn_number().to_string(),
            po_id: grn.po_id(),
            deleted_by,
            voided_quantities: grn.received_by_product(),
            occurred_at,
        })
    }

    pub fn grn_id(&self) -> GoodsReceiptId {
        match self {
            ReceivingEvent::GoodsReceiptApproved(e) => e.grn_id,
            ReceivingEvent::GoodsReceiptDeleted(e) => e.grn_id,
        }
    }
}

impl Event for ReceivingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceivingEvent::GoodsReceiptApproved(_) => "receiving.grn.approved",
            ReceivingEvent::GoodsReceiptDeleted(_) => "receiving.grn.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceivingEvent::GoodsReceiptApproved(e) => e.occurred_at,
            ReceivingEvent::GoodsReceiptDeleted(e) => e.occurred_at,
        }
    }

    fn stream_id(&self) -> Uuid {
        *self.grn_id().as_uuid()
    }

    fn stream_type(&self) -> &'static str {
        GRN_STREAM_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::{NewGoodsReceipt, ReceiptLine};
    use chrono::NaiveDate;
    use grnrecon_reconciliation::ReceiptProgress;

    fn test_receipt() -> GoodsReceipt {
        let product = ProductId::new();
        GoodsReceipt::commit(
            GoodsReceiptId::new(),
            "GRN-000042",
            NewGoodsReceipt {
                po_id: PurchaseOrderId::new(),
                received_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
                destination_warehouse: "WH-1".to_string(),
                lines: vec![ReceiptLine::new(product, 3), ReceiptLine::new(product, 2)],
            },
            ReceiptProgress::PartiallyReceived,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn deleted_event_carries_voided_quantities() {
        let grn = test_receipt();
        let ev = ReceivingEvent::deleted(&grn, UserId::new(), Utc::now());

        assert_eq!(ev.event_type(), "receiving.grn.deleted");
        assert_eq!(ev.grn_id(), grn.id_typed());
        assert_eq!(ev.stream_id(), *grn.id_typed().as_uuid());
        assert_eq!(ev.stream_type(), GRN_STREAM_TYPE);
        match ev {
            ReceivingEvent::GoodsReceiptDeleted(e) => {
                assert_eq!(e.voided_quantities.values().sum::<i64>(), 5);
                assert_eq!(e.grn_number, "GRN-000042");
            }
            _ => panic!("Expected GoodsReceiptDeleted event"),
        }
    }

    #[test]
    fn events_serialize_with_variant_tag() {
        let grn = test_receipt();
        let ev = ReceivingEvent::approved(&grn, UserId::new(), Utc::now());
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("GoodsReceiptApproved").is_some());
        let back: ReceivingEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }
}
