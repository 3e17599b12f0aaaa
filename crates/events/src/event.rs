use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Something that happened to a receiving record.
///
/// Events are immutable facts about one stream (a single aggregate such as a
/// goods receipt). They are emitted only after the change they describe was
/// committed.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "receiving.grn.approved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Id of the aggregate the event belongs to.
    fn stream_id(&self) -> Uuid;

    /// Kind of aggregate, shared by every event of the stream.
    fn stream_type(&self) -> &'static str;
}
