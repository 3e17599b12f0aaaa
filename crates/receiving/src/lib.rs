//! Receiving domain module (Goods Receipt Notes).
//!
//! This crate contains business rules for goods receipts and the audit events
//! they emit, implemented purely as deterministic domain logic (no IO, no storage).

pub mod event;
pub mod receipt;

pub use event::{GRN_STREAM_TYPE, GoodsReceiptApproved, GoodsReceiptDeleted, ReceivingEvent};
pub use receipt::{
    GoodsReceipt, GoodsReceiptStatus, NewGoodsReceipt, ReceiptLine, candidate_lines,
    validate_receipt_lines,
};
