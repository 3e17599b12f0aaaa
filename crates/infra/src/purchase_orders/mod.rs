//! Purchase order master data and receipt-driven status.

pub mod repository;
pub mod store;

pub use repository::{InMemoryPurchaseOrderRepository, PurchaseOrderRepository};
pub use store::PurchaseOrderStore;
