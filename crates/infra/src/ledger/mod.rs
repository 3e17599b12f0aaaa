//! Goods receipt ledger.
//!
//! The ledger owns every GRN record and the (purchase order, product) cumulative
//! receipt index derived from them.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryReceiptLedger;
pub use r#trait::{CommittedReceipt, CumulativeAudit, ReceiptLedger, VoidedReceipt};
