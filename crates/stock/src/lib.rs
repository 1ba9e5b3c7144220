//! Stock ledger domain module (event-sourced).
//!
//! One ledger aggregate per tenant tracks on-hand quantities per product and
//! records, per order, whether that order's goods movement has already been
//! applied. Replays are no-ops by construction.

pub mod ledger;

pub use ledger::{
    AdjustStock, AppliedOutcome, ApplyOrder, LedgerId, NegativeStockPolicy, OrderApplied,
    OrderReversed, ReverseOrder, StockAdjusted, StockCommand, StockEvent, StockLedger, StockLevel,
};
