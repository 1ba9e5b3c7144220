use chrono::{DateTime, Utc};

/// The contract every domain event satisfies.
///
/// An event is an immutable fact that already happened; nothing downstream may
/// mutate or reorder it. The `version` exists so payload schemas can evolve
/// while old events stay readable.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted identifier, e.g. "orders.order.submitted".
    fn event_type(&self) -> &'static str;

    /// Payload schema version for this event type.
    fn version(&self) -> u32;

    /// Business time: when the fact occurred, not when it was stored.
    fn occurred_at(&self) -> DateTime<Utc>;
}
