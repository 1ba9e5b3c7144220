use serde_json::Value as JsonValue;

use counterflow_core::{TenantId, UserId};
use counterflow_events::EventEnvelope;
use counterflow_orders::{
    FulfillmentStatus, OrderEvent, OrderId, OrderKind, OrderLine, SettlementMode, SettlementStatus,
};

use crate::projections::{CursorCheck, ProjectionError, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "orders.order";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReadModel {
    pub order_id: OrderId,
    pub reference: String,
    pub kind: OrderKind,
    pub mode: SettlementMode,
    pub counterparty: String,
    pub lines: Vec<OrderLine>,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub fulfillment: FulfillmentStatus,
    pub settlement: SettlementStatus,
    pub submitted_by: UserId,
}

#[derive(Debug)]
pub struct OrdersProjection<S>
where
    S: TenantStore<OrderId, OrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrdersProjection<S>
where
    S: TenantStore<OrderId, OrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, order_id: &OrderId) -> Option<OrderReadModel> {
        self.store.get(tenant_id, order_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<OrderReadModel> {
        self.store.list(tenant_id)
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

        let ev: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, order_id) = match &ev {
            OrderEvent::OrderSubmitted(e) => (e.tenant_id, e.order_id),
            OrderEvent::FulfillmentAdvanced(e) => (e.tenant_id, e.order_id),
            OrderEvent::SettlementAdvanced(e) => (e.tenant_id, e.order_id),
            OrderEvent::OrderRejected(e) => (e.tenant_id, e.order_id),
        };
        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if order_id.0 != aggregate_id {
            return Err(ProjectionError::TenantIsolation(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            OrderEvent::OrderSubmitted(e) => {
                self.store.upsert(
                    tenant_id,
                    e.order_id,
                    OrderReadModel {
                        order_id: e.order_id,
                        reference: e.reference,
                        kind: e.kind,
                        mode: e.mode,
                        counterparty: e.counterparty,
                        lines: e.lines,
                        subtotal: e.subtotal,
                        tax: e.tax,
                        total: e.total,
                        fulfillment: e.kind.initial_fulfillment(),
                        settlement: SettlementStatus::Unsettled,
                        submitted_by: e.actor,
                    },
                );
            }
            OrderEvent::FulfillmentAdvanced(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.fulfillment = e.to;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            OrderEvent::SettlementAdvanced(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.settlement = e.to;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            OrderEvent::OrderRejected(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.fulfillment = FulfillmentStatus::Cancelled;
                    rm.settlement = SettlementStatus::Cancelled;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.cursors.clear_tenant(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
