//! Reconciliation engine for goods receipts against purchase orders.
//!
//! This crate is pure, deterministic domain logic (no IO, no storage, no locks).

pub mod engine;

pub use engine::{
    AggregateLine, CandidateLine, LineProgress, LineReconciliation, ReceiptProgress,
    Reconciliation, compute_remaining, derive_grn_status, derive_po_status, reconcile,
    validate_quantity, validate_receipt_against_remaining,
};
