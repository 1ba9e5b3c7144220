//! Order lifecycle domain module (event-sourced).
//!
//! Sales and purchase orders share one aggregate with two independent state
//! axes: fulfillment (physical progress) and settlement (financial closure).
//! All transitions are pure domain logic; stock and cash side effects are
//! driven by subscribers to the emitted events.

pub mod order;

pub use order::{
    AdvanceFulfillment, AdvanceSettlement, FulfillmentAdvanced, FulfillmentStatus, Order,
    OrderCommand, OrderEvent, OrderId, OrderKind, OrderLine, OrderRejected, OrderSubmitted,
    RejectOrder, SettlementAdvanced, SettlementMode, SettlementStatus, SubmitOrder,
    TransitionRecord,
};
