use serde_json::Value as JsonValue;

use counterflow_catalog::ProductId;
use counterflow_core::TenantId;
use counterflow_events::EventEnvelope;
use counterflow_stock::StockEvent;

use crate::projections::{CursorCheck, ProjectionError, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "stock.ledger";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevelReadModel {
    pub product_id: ProductId,
    pub on_hand: i64,
    pub flagged: bool,
}

#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: TenantStore<ProductId, StockLevelReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockLevelsProjection<S>
where
    S: TenantStore<ProductId, StockLevelReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<StockLevelReadModel> {
        self.store.get(tenant_id, product_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<StockLevelReadModel> {
        self.store.list(tenant_id)
    }

    fn apply_delta(&self, tenant_id: TenantId, product_id: ProductId, delta: i64, flag: bool) {
        let mut rm = self
            .store
            .get(tenant_id, &product_id)
            .unwrap_or(StockLevelReadModel {
                product_id,
                on_hand: 0,
                flagged: false,
            });
        rm.on_hand += delta;
        rm.flagged |= flag;
        self.store.upsert(tenant_id, product_id, rm);
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq)? {
            CursorCheck::Skip => return Ok(()),
            CursorCheck::Apply => {}
        }

        let ev: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let event_tenant = match &ev {
            StockEvent::StockAdjusted(e) => e.tenant_id,
            StockEvent::OrderApplied(e) => e.tenant_id,
            StockEvent::OrderReversed(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        match ev {
            StockEvent::StockAdjusted(e) => {
                self.apply_delta(tenant_id, e.product_id, e.delta, false);
            }
            StockEvent::OrderApplied(e) => {
                for (product_id, delta) in &e.deltas {
                    let flag = e.flagged.contains(product_id);
                    self.apply_delta(tenant_id, *product_id, *delta, flag);
                }
            }
            StockEvent::OrderReversed(e) => {
                for (product_id, delta) in &e.deltas {
                    self.apply_delta(tenant_id, *product_id, *delta, false);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
