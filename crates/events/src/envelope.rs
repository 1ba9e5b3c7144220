use serde::{Deserialize, Serialize};
use uuid::Uuid;

use counterflow_core::{AggregateId, TenantId};

/// A committed event plus the stream metadata consumers need: the unit
/// published to the bus after an append succeeds.
///
/// `tenant_id` carries the isolation boundary and `sequence_number` the
/// per-stream position, so projections can enforce both without touching
/// the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    tenant_id: TenantId,
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: String,
    /// Monotonically increasing position in the aggregate stream.
    sequence_number: u64,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            tenant_id,
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    /// Globally unique identity of this committed event.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Tenant the event belongs to. Consumers filter on this before anything else.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Position within the aggregate stream, starting at 1.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
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

    #[test]
    fn survives_a_serde_round_trip() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            AggregateId::new(),
            "orders",
            3,
            "payload".to_string(),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
