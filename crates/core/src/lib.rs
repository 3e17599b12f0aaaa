//! Shared building blocks for goods-receipt reconciliation.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::AggregateRoot;
pub use error::{OverReceiptLine, ReceivingError, ReceivingResult};
pub use id::{GoodsReceiptId, ProductId, PurchaseOrderId, SupplierId, UserId};
