//! Purchasing domain module (Purchase Orders).
//!
//! This crate contains business rules for purchase orders, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod order;

pub use order::{NewPurchaseOrder, PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus};
