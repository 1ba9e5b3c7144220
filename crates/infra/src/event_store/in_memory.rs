use std::collections::HashMap;
use std::sync::RwLock;

use counterflow_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only event store, one vector per `(tenant, aggregate)`
/// stream. Dev/test backend; a persistent implementation would live behind
/// the same trait.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<(TenantId, AggregateId), Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A batch commits atomically into exactly one stream; reject anything that
/// straddles tenants, aggregates, or aggregate types.
fn batch_stream(
    events: &[UncommittedEvent],
) -> Result<(TenantId, AggregateId, &str), EventStoreError> {
    let first = &events[0];
    for e in events {
        if e.tenant_id != first.tenant_id {
            return Err(EventStoreError::TenantIsolation(
                "append batch spans more than one tenant".to_string(),
            ));
        }
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "append batch spans more than one aggregate".to_string(),
            ));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(
                "append batch spans more than one aggregate type".to_string(),
            ));
        }
    }
    Ok((first.tenant_id, first.aggregate_id, &first.aggregate_type))
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let (tenant_id, aggregate_id, aggregate_type) = batch_stream(&events)?;
        let aggregate_type = aggregate_type.to_string();

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("store lock poisoned".to_string()))?;
        let stream = streams.entry((tenant_id, aggregate_id)).or_default();

        // The compare-and-set: the version check and the push happen under
        // one write lock, so of two racing appends exactly one survives.
        let current = stream.last().map_or(0, |e| e.sequence_number);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "stream at {current}, append expected {expected_version:?}"
            )));
        }

        // A stream never changes aggregate type after its first event.
        if let Some(head) = stream.first() {
            if head.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream holds '{}', append carries '{}'",
                    head.aggregate_type, aggregate_type
                )));
            }
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, seq)| StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: seq,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            })
            .collect();
        stream.extend(committed.iter().cloned());

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("store lock poisoned".to_string()))?;
        Ok(streams
            .get(&(tenant_id, aggregate_id))
            .cloned()
            .unwrap_or_default())
    }
}
