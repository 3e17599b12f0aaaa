//! External collaborator boundaries.
//!
//! Inventory, audit and purchase order master data live outside the
//! reconciliation core. Each boundary is a trait with an in-memory implementation
//! for tests/dev.

pub mod audit;
pub mod inventory;
pub mod lookup;

use thiserror::Error;

pub use audit::{AuditCollaborator, AuditOutbox, EventBusAuditSink, InMemoryAuditLog};
pub use inventory::{
    DeltaKind, InMemoryInventory, InventoryCollaborator, ReceiptDelta, ReceiptDeltaLine,
};
pub use lookup::PurchaseOrderLookup;

/// Failure reported by an external collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator could not be reached or is temporarily failing.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the request.
    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}
