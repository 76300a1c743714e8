use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rxstock_core::CompanyId;

use crate::Event;

/// Envelope for an event, containing company + stream metadata.
///
/// This is the unit kept in an aggregate's append-only history.
///
/// Notes:
/// - `sequence_number` is monotonically increasing per stream and equals the
///   aggregate version after the event was applied.
/// - `event_type`/`event_version` are captured at record time so history stays
///   readable after the payload type evolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    company_id: CompanyId,

    stream_id: Uuid,
    stream_type: String,

    /// Monotonically increasing position in the stream.
    sequence_number: u64,

    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event, capturing its metadata.
    pub fn record(
        company_id: CompanyId,
        stream_id: Uuid,
        stream_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            company_id,
            stream_id,
            stream_type: stream_type.into(),
            sequence_number,
            event_type: payload.event_type().to_string(),
            event_version: payload.version(),
            occurred_at: payload.occurred_at(),
            payload,
        }
    }
}

impl<E> EventEnvelope<E> {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn company_id(&self) -> CompanyId {
        self.company_id
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

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Ping {
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
    }

    #[test]
    fn record_captures_event_metadata() {
        let at = Utc::now();
        let stream = Uuid::now_v7();
        let env = EventEnvelope::record(CompanyId::new(), stream, "test.stream", 7, Ping { at });

        assert_eq!(env.event_type(), "test.ping");
        assert_eq!(env.event_version(), 2);
        assert_eq!(env.occurred_at(), at);
        assert_eq!(env.sequence_number(), 7);
        assert_eq!(env.stream_id(), stream);
        assert_eq!(env.payload().at, at);
    }
}
