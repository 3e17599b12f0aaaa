use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Envelope for an event, carrying stream metadata next to the payload.
///
/// Notes:
/// - `stream_id` is the aggregate the event belongs to (e.g. a goods receipt id).
/// - `sequence_number` is monotonically increasing per publisher.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    stream_id: Uuid,
    stream_type: String,

    /// Monotonically increasing position assigned by the publisher.
    sequence_number: u64,

    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        stream_id: Uuid,
        stream_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        event_version: u32,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_id,
            stream_type: stream_type.into(),
            sequence_number,
            event_type: event_type.into(),
            event_version,
            occurred_at,
            payload,
        }
    }

    /// Wrap a typed event, copying its stream and type metadata.
    pub fn wrap<T: Event>(sequence_number: u64, event: &T, payload: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            event.stream_id(),
            event.stream_type(),
            sequence_number,
            event.event_type(),
            event.version(),
            event.occurred_at(),
            payload,
        )
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Ping {
        stream: Uuid,
        at: DateTime<Utc>,
    }

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "test.ping"
        }

        fn version(&self) -> u32 {
            2
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }

        fn stream_id(&self) -> Uuid {
            self.stream
        }

        fn stream_type(&self) -> &'static str {
            "test.stream"
        }
    }

    #[test]
    fn wrap_copies_event_metadata() {
        let at = Utc::now();
        let stream = Uuid::now_v7();
        let env = EventEnvelope::wrap(7, &Ping { stream, at }, serde_json::json!({}));

        assert_eq!(env.stream_id(), stream);
        assert_eq!(env.stream_type(), "test.stream");
        assert_eq!(env.sequence_number(), 7);
        assert_eq!(env.event_type(), "test.ping");
        assert_eq!(env.event_version(), 2);
        assert_eq!(env.occurred_at(), at);
    }
}
