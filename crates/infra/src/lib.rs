//! Infrastructure: event store, command dispatch, read models, projections.
//!
//! Everything here composes the pure domain crates with storage and
//! publication. No business rules live in this crate; it enforces the
//! mechanical invariants (tenant isolation, optimistic concurrency, event
//! ordering) that the domain relies on.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod session_index;


pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent,
};
pub use read_model::{InMemoryTenantStore, TenantStore};
pub use session_index::OpenSessionIndex;
