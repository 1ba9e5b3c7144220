//! Command execution pipeline.
//!
//! One consistent path for every aggregate: load the stream, rehydrate,
//! handle the command, append with the stream version as the expected
//! version, publish. The expected-version append is the single atomic
//! compare-and-set that resolves races: exactly one concurrent dispatch for
//! the same stream wins, the rest observe `DispatchError::Concurrency` and
//! must re-read state before deciding whether to retry.
//!
//! This module contains no IO itself; it composes the store and bus traits,
//! so tests run it against the in-memory implementations.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use counterflow_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use counterflow_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure: another actor won the race.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Tenant isolation violation (cross-tenant stream mixing).
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Domain validation failure (deterministic, pre-state-change).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Illegal or out-of-order transition.
    #[error("state conflict: {attempted} not permitted from {current}")]
    StateConflict { current: String, attempted: String },

    /// A sale would drive stock negative under the active policy.
    #[error("insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// A remittance exceeds the session's current cash balance.
    #[error("insufficient custody: available {available}, requested {requested}")]
    InsufficientCustody { available: i64, requested: i64 },

    /// Domain authorization failure.
    #[error("unauthorized")]
    Unauthorized,

    /// Domain-level not found.
    #[error("not found")]
    NotFound,

    /// Failed to deserialize historical payloads into the aggregate's event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; retry
    /// may duplicate delivery, never the append).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::StateConflict { current, attempted } => {
                DispatchError::StateConflict { current, attempted }
            }
            DomainError::InsufficientStock {
                product,
                available,
                requested,
            } => DispatchError::InsufficientStock {
                product,
                available,
                requested,
            },
            DomainError::InsufficientCustody {
                available,
                requested,
            } => DispatchError::InsufficientCustody {
                available,
                requested,
            },
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::Unauthorized => DispatchError::Unauthorized,
        }
    }
}

impl DispatchError {
    /// Whether the caller should re-read state before retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DispatchError::Concurrency(_) | DispatchError::StateConflict { .. }
        )
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Events are persisted before publication; if the append fails nothing is
/// published. If publication fails after append, the events are durable and
/// the caller may retry the command (aggregates decide replays to zero
/// events, so the retry cannot double-apply).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline.
    ///
    /// `make_aggregate` is the rehydration factory (e.g. `Order::empty`);
    /// it keeps the dispatcher generic over aggregate construction.
    /// Returns the committed events; an empty vec means the aggregate
    /// decided the command was already satisfied (idempotent replay).
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: counterflow_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Load and rehydrate an aggregate without dispatching a command.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Tenant isolation is re-checked here even though the store already
    // scopes by tenant; a buggy backend must not leak cross-tenant data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!(
                    "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                    e.sequence_number
                ),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
