use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use counterflow_core::{AggregateId, TenantId};

/// Product identifier (tenant-scoped via `tenant_id` fields in commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A sellable/purchasable catalog entry. Prices in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    /// Selling price per unit.
    pub unit_price: i64,
    /// Acquisition cost per unit (purchase-side pricing).
    pub unit_cost: i64,
    /// Default tax rate as a whole-number percentage.
    pub tax_percent: i64,
}

/// Read-side catalog access for order pricing.
pub trait CatalogGateway: Send + Sync {
    fn item(&self, tenant_id: TenantId, product_id: ProductId) -> Option<CatalogItem>;
}

/// In-memory, tenant-partitioned catalog.
#[derive(Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashMap<(TenantId, ProductId), CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, tenant_id: TenantId, item: CatalogItem) {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.insert((tenant_id, item.product_id), item);
    }
}

impl CatalogGateway for InMemoryCatalog {
    fn item(&self, tenant_id: TenantId, product_id: ProductId) -> Option<CatalogItem> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        items.get(&(tenant_id, product_id)).cloned()
    }
}
