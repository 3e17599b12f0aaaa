//! Infrastructure layer: receipt ledger, purchase order store, approval gate,
//! collaborators, configuration and orchestration.

pub mod approval;
pub mod collaborators;
pub mod config;
pub mod ledger;
pub mod lock;
pub mod purchase_orders;
pub mod service;


pub use approval::ApprovalGate;
pub use config::ReceivingConfig;
pub use ledger::{
    CommittedReceipt, CumulativeAudit, InMemoryReceiptLedger, ReceiptLedger, VoidedReceipt,
};
pub use lock::KeyedLocks;
pub use purchase_orders::{
    InMemoryPurchaseOrderRepository, PurchaseOrderRepository, PurchaseOrderStore,
};
pub use service::{DeletionOutcome, InMemoryReceivingService, ReceiptOutcome, ReceivingService};
