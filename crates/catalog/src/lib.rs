//! Product catalog lookup.
//!
//! Orders reference catalog entries for pricing; the catalog itself is a
//! simple keyed store rather than an event-sourced aggregate. Prices are in
//! minor currency units.

pub mod item;

pub use item::{CatalogGateway, CatalogItem, InMemoryCatalog, ProductId};
