//! Aggregate root trait shared by purchase orders and goods receipts.

/// Aggregate root marker + minimal interface.
///
/// Purchase orders and goods receipts are persisted as whole records; `version()`
/// counts the persisted changes and doubles as an idempotency key for collaborators.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    fn version(&self) -> u64;
}
