//! Infrastructure wiring and cross-aggregate orchestration.
//!
//! The dispatcher owns the command pipeline; this layer chains the
//! multi-aggregate flows (fulfillment → stock application, settlement
//! confirmation → cash posting, remittance → custody withdrawal). Every leg
//! is individually idempotent, so a retry after a partial failure converges
//! instead of double-applying.

use std::sync::Arc;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use counterflow_cash::{
    AcceptRemittance, CashSession, CloseSession, CreateRemittance, MovementCategory, MovementType,
    OpenSession, PostSettlement, RecordMovement, Remittance, RemittanceCommand, RemittanceId,
    SessionCommand, SessionId, TenderType, WithdrawCustody,
};
use counterflow_catalog::{CatalogGateway, InMemoryCatalog};
use counterflow_core::{Aggregate, AggregateId, DomainError, TenantId, UserId};
use counterflow_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
use counterflow_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{InMemoryEventStore, StoredEvent},
    projections::{
        CashSessionReadModel, CashSessionsProjection, OrderReadModel, OrdersProjection,
        RemittanceReadModel, RemittancesProjection, StockLevelReadModel, StockLevelsProjection,
    },
    read_model::InMemoryTenantStore,
    session_index::OpenSessionIndex,
};
use counterflow_orders::{
    AdvanceFulfillment, AdvanceSettlement, FulfillmentStatus, Order, OrderCommand, OrderId,
    RejectOrder, SettlementStatus, SubmitOrder,
};
use counterflow_stock::{
    ApplyOrder, LedgerId, NegativeStockPolicy, ReverseOrder, StockCommand, StockLedger,
};

use crate::config::AppConfig;

type InMemoryDispatcher = CommandDispatcher<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
>;

pub struct AppServices {
    dispatcher: Arc<InMemoryDispatcher>,
    catalog: Arc<InMemoryCatalog>,
    session_index: Arc<OpenSessionIndex>,
    orders_projection: Arc<OrdersProjection<Arc<InMemoryTenantStore<OrderId, OrderReadModel>>>>,
    stock_projection: Arc<
        StockLevelsProjection<
            Arc<InMemoryTenantStore<counterflow_catalog::ProductId, StockLevelReadModel>>,
        >,
    >,
    sessions_projection:
        Arc<CashSessionsProjection<Arc<InMemoryTenantStore<SessionId, CashSessionReadModel>>>>,
    remittances_projection:
        Arc<RemittancesProjection<Arc<InMemoryTenantStore<RemittanceId, RemittanceReadModel>>>>,
    cash_tolerance: i64,
    negative_stock_policy: NegativeStockPolicy,
}

pub fn build_services(config: &AppConfig) -> AppServices {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());

    let orders_projection = Arc::new(OrdersProjection::new(Arc::new(InMemoryTenantStore::new())));
    let stock_projection = Arc::new(StockLevelsProjection::new(Arc::new(
        InMemoryTenantStore::new(),
    )));
    let sessions_projection = Arc::new(CashSessionsProjection::new(Arc::new(
        InMemoryTenantStore::new(),
    )));
    let remittances_projection = Arc::new(RemittancesProjection::new(Arc::new(
        InMemoryTenantStore::new(),
    )));

    // Background subscriber: bus -> projections.
    {
        let sub = bus.subscribe();
        let orders_projection = orders_projection.clone();
        let stock_projection = stock_projection.clone();
        let sessions_projection = sessions_projection.clone();
        let remittances_projection = remittances_projection.clone();
        tokio::task::spawn_blocking(move || loop {
            match sub.recv() {
                Ok(env) => {
                    let apply_ok = match env.aggregate_type() {
                        "orders.order" => {
                            orders_projection.apply_envelope(&env).map_err(|e| e.to_string())
                        }
                        "stock.ledger" => {
                            stock_projection.apply_envelope(&env).map_err(|e| e.to_string())
                        }
                        "cash.session" => sessions_projection
                            .apply_envelope(&env)
                            .map_err(|e| e.to_string()),
                        "cash.remittance" => remittances_projection
                            .apply_envelope(&env)
                            .map_err(|e| e.to_string()),
                        _ => Ok(()),
                    };

                    if let Err(e) = apply_ok {
                        tracing::warn!("projection apply failed: {e}");
                    }
                }
                Err(_) => break,
            }
        });
    }

    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));

    AppServices {
        dispatcher,
        catalog: Arc::new(InMemoryCatalog::new()),
        session_index: Arc::new(OpenSessionIndex::new()),
        orders_projection,
        stock_projection,
        sessions_projection,
        remittances_projection,
        cash_tolerance: config.cash_tolerance,
        negative_stock_policy: config.negative_stock_policy,
    }
}

impl AppServices {
    pub fn catalog(&self) -> &Arc<InMemoryCatalog> {
        &self.catalog
    }

    pub fn cash_tolerance(&self) -> i64 {
        self.cash_tolerance
    }

    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch::<A>(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)
    }

    // ---- read models ----

    pub fn orders_get(&self, tenant_id: TenantId, order_id: &OrderId) -> Option<OrderReadModel> {
        self.orders_projection.get(tenant_id, order_id)
    }

    pub fn orders_list(&self, tenant_id: TenantId) -> Vec<OrderReadModel> {
        self.orders_projection.list(tenant_id)
    }

    pub fn stock_list(&self, tenant_id: TenantId) -> Vec<StockLevelReadModel> {
        self.stock_projection.list(tenant_id)
    }

    pub fn session_get(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
    ) -> Option<CashSessionReadModel> {
        self.sessions_projection.get(tenant_id, session_id)
    }

    pub fn remittance_get(
        &self,
        tenant_id: TenantId,
        remittance_id: &RemittanceId,
    ) -> Option<RemittanceReadModel> {
        self.remittances_projection.get(tenant_id, remittance_id)
    }

    // ---- orchestration ----

    pub fn submit_order(
        &self,
        tenant_id: TenantId,
        cmd: SubmitOrder,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let order_id = cmd.order_id;
        self.dispatch::<Order>(
            tenant_id,
            order_id.0,
            "orders.order",
            OrderCommand::SubmitOrder(cmd),
            |_, id| Order::empty(OrderId::new(id)),
        )
    }

    /// Advance fulfillment one step; entering the goods-movement state also
    /// applies the order's stock deltas. The stock leg runs first so a
    /// policy rejection leaves the order where it was, and the apply is
    /// keyed by order id (zero events on replay), so a retry after a crash
    /// between the two legs still converges.
    pub fn advance_fulfillment(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        target: FulfillmentStatus,
        actor: UserId,
    ) -> Result<FulfillmentStatus, DispatchError> {
        let mut applied = Vec::new();
        if target.is_goods_movement() {
            let order = self.load_order(tenant_id, order_id)?;
            applied = self.apply_order_stock(tenant_id, &order, actor)?;
        }

        let transition = self.dispatch::<Order>(
            tenant_id,
            order_id.0,
            "orders.order",
            OrderCommand::AdvanceFulfillment(AdvanceFulfillment {
                tenant_id,
                order_id,
                target,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| Order::empty(OrderId::new(id)),
        );

        if let Err(err) = transition {
            // Undo a deduction made on this call when the transition itself
            // is refused; a replayed apply committed nothing and needs none.
            // If a concurrent advance landed the same transition, the
            // deduction belongs to the order and stays.
            if !applied.is_empty() {
                let current = self.load_order(tenant_id, order_id)?;
                if current.fulfillment().is_goods_movement() {
                    return Ok(current.fulfillment());
                }
                if let Err(undo) = self.reverse_order_stock(tenant_id, order_id, actor) {
                    tracing::error!(%order_id, "stock compensation failed: {undo}");
                }
            }
            return Err(err);
        }

        let order = self.load_order(tenant_id, order_id)?;
        Ok(order.fulfillment())
    }

    pub fn reject_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        reason: String,
        actor: UserId,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatch::<Order>(
            tenant_id,
            order_id.0,
            "orders.order",
            OrderCommand::RejectOrder(RejectOrder {
                tenant_id,
                order_id,
                reason,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| Order::empty(OrderId::new(id)),
        )
    }

    /// Compensate a rejected order whose stock was already applied.
    pub fn reverse_order_stock(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        actor: UserId,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let ledger_id = LedgerId::for_tenant(tenant_id);
        self.dispatch::<StockLedger>(
            tenant_id,
            ledger_id.0,
            "stock.ledger",
            StockCommand::ReverseOrder(ReverseOrder {
                tenant_id,
                ledger_id,
                order_id,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| StockLedger::empty(LedgerId::new(id)),
        )
    }

    /// Advance settlement one step; a confirmation also posts the settlement
    /// movement to the caller's open session (idempotent per order id).
    /// Confirming without an open session commits the confirmation but errors
    /// on the posting; retrying once a session is open lands the movement.
    pub fn advance_settlement(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        target: SettlementStatus,
        tender: TenderType,
        actor: UserId,
    ) -> Result<SettlementStatus, DispatchError> {
        self.dispatch::<Order>(
            tenant_id,
            order_id.0,
            "orders.order",
            OrderCommand::AdvanceSettlement(AdvanceSettlement {
                tenant_id,
                order_id,
                target,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| Order::empty(OrderId::new(id)),
        )?;

        let order = self.load_order(tenant_id, order_id)?;
        if order.settlement() == SettlementStatus::Confirmed {
            // No open session means the custody record cannot land yet.
            // Surface the miss rather than skipping: the confirm leg replays
            // as zero events, so a retry with an open session completes the
            // posting.
            let session_id = self
                .session_index
                .open_session_for(tenant_id, actor)
                .ok_or_else(|| {
                    DispatchError::Validation(
                        "no open cash session for operator".to_string(),
                    )
                })?;
            let category = match order.kind() {
                counterflow_orders::OrderKind::Sale => MovementCategory::SaleSettlement,
                counterflow_orders::OrderKind::Purchase => {
                    MovementCategory::PurchaseSettlement
                }
            };
            self.dispatch::<CashSession>(
                tenant_id,
                session_id.0,
                "cash.session",
                SessionCommand::PostSettlement(PostSettlement {
                    tenant_id,
                    session_id,
                    order_id,
                    category,
                    tender,
                    amount: order.total(),
                    actor,
                    occurred_at: Utc::now(),
                }),
                |_, id| CashSession::empty(SessionId::new(id)),
            )?;
        }
        Ok(order.settlement())
    }

    /// Open a session for the operator. The operator-uniqueness invariant is
    /// enforced here: the index claim is atomic, and the claim is released
    /// again if the aggregate rejects the open.
    pub fn open_session(
        &self,
        tenant_id: TenantId,
        operator: UserId,
        opening_balance: i64,
    ) -> Result<SessionId, DispatchError> {
        let session_id = SessionId::new(AggregateId::new());
        if let Err(existing) = self.session_index.claim(tenant_id, operator, session_id) {
            return Err(DispatchError::StateConflict {
                current: format!("session {existing} open"),
                attempted: "open".to_string(),
            });
        }

        let result = self.dispatch::<CashSession>(
            tenant_id,
            session_id.0,
            "cash.session",
            SessionCommand::OpenSession(OpenSession {
                tenant_id,
                session_id,
                operator,
                opening_balance,
                occurred_at: Utc::now(),
            }),
            |_, id| CashSession::empty(SessionId::new(id)),
        );

        match result {
            Ok(_) => Ok(session_id),
            Err(e) => {
                self.session_index.release(tenant_id, operator, session_id);
                Err(e)
            }
        }
    }

    pub fn record_movement(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        movement_type: MovementType,
        category: MovementCategory,
        amount: i64,
        description: String,
        actor: UserId,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatch::<CashSession>(
            tenant_id,
            session_id.0,
            "cash.session",
            SessionCommand::RecordMovement(RecordMovement {
                tenant_id,
                session_id,
                movement_type,
                category,
                amount,
                description,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| CashSession::empty(SessionId::new(id)),
        )
    }

    /// Close the session and return its reconciliation report. A discrepancy
    /// is recorded, never rejected.
    pub fn close_session(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        declared_balance: i64,
        notes: String,
        actor: UserId,
    ) -> Result<counterflow_cash::ReconciliationReport, DispatchError> {
        self.dispatch::<CashSession>(
            tenant_id,
            session_id.0,
            "cash.session",
            SessionCommand::CloseSession(CloseSession {
                tenant_id,
                session_id,
                declared_balance,
                notes,
                tolerance: self.cash_tolerance,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| CashSession::empty(SessionId::new(id)),
        )?;

        let session = self.load_session(tenant_id, session_id)?;
        self.session_index
            .release(tenant_id, session.operator(), session_id);
        session
            .report()
            .cloned()
            .ok_or(DispatchError::NotFound)
    }

    /// Create a remittance from the operator's session. Custody is withdrawn
    /// first (one `out` movement, `InsufficientCustody` if the drawer cannot
    /// cover it), then the pending handover record is created. Both legs are
    /// idempotent per remittance id.
    pub fn create_remittance(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
        to_supervisor: UserId,
        amount: i64,
        actor: UserId,
    ) -> Result<RemittanceId, DispatchError> {
        let remittance_id = RemittanceId::new(AggregateId::new());

        self.dispatch::<CashSession>(
            tenant_id,
            session_id.0,
            "cash.session",
            SessionCommand::WithdrawCustody(WithdrawCustody {
                tenant_id,
                session_id,
                remittance_id,
                amount,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| CashSession::empty(SessionId::new(id)),
        )?;

        self.dispatch::<Remittance>(
            tenant_id,
            remittance_id.0,
            "cash.remittance",
            RemittanceCommand::CreateRemittance(CreateRemittance {
                tenant_id,
                remittance_id,
                from_operator: actor,
                from_session: session_id,
                to_supervisor,
                amount,
                occurred_at: Utc::now(),
            }),
            |_, id| Remittance::empty(RemittanceId::new(id)),
        )?;

        Ok(remittance_id)
    }

    pub fn accept_remittance(
        &self,
        tenant_id: TenantId,
        remittance_id: RemittanceId,
        supervisor: UserId,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatch::<Remittance>(
            tenant_id,
            remittance_id.0,
            "cash.remittance",
            RemittanceCommand::AcceptRemittance(AcceptRemittance {
                tenant_id,
                remittance_id,
                supervisor,
                occurred_at: Utc::now(),
            }),
            |_, id| Remittance::empty(RemittanceId::new(id)),
        )
    }

    /// Current fulfillment position straight from the aggregate (the write
    /// side), so action-to-target resolution never races the projection.
    pub fn order_fulfillment_state(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<(counterflow_orders::OrderKind, FulfillmentStatus), DispatchError> {
        let order = self.load_order(tenant_id, order_id)?;
        Ok((order.kind(), order.fulfillment()))
    }

    // ---- internals ----

    fn load_order(&self, tenant_id: TenantId, order_id: OrderId) -> Result<Order, DispatchError> {
        let order = self
            .dispatcher
            .load(tenant_id, order_id.0, |_, id| Order::empty(OrderId::new(id)))?;
        if !order.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(order)
    }

    fn load_session(
        &self,
        tenant_id: TenantId,
        session_id: SessionId,
    ) -> Result<CashSession, DispatchError> {
        let session = self.dispatcher.load(tenant_id, session_id.0, |_, id| {
            CashSession::empty(SessionId::new(id))
        })?;
        if !session.exists() {
            return Err(DispatchError::NotFound);
        }
        Ok(session)
    }

    fn apply_order_stock(
        &self,
        tenant_id: TenantId,
        order: &Order,
        actor: UserId,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let ledger_id = LedgerId::for_tenant(tenant_id);
        self.dispatch::<StockLedger>(
            tenant_id,
            ledger_id.0,
            "stock.ledger",
            StockCommand::ApplyOrder(ApplyOrder {
                tenant_id,
                ledger_id,
                order_id: order.id_typed(),
                deltas: order.stock_deltas(),
                policy: self.negative_stock_policy,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| StockLedger::empty(LedgerId::new(id)),
        )
    }
}

/// Dev/test convenience: seed initial stock through the normal command path.
impl AppServices {
    pub fn adjust_stock(
        &self,
        tenant_id: TenantId,
        product_id: counterflow_catalog::ProductId,
        delta: i64,
        reason: String,
        actor: UserId,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let ledger_id = LedgerId::for_tenant(tenant_id);
        self.dispatch::<StockLedger>(
            tenant_id,
            ledger_id.0,
            "stock.ledger",
            StockCommand::AdjustStock(counterflow_stock::AdjustStock {
                tenant_id,
                ledger_id,
                product_id,
                delta,
                reason,
                actor,
                occurred_at: Utc::now(),
            }),
            |_, id| StockLedger::empty(LedgerId::new(id)),
        )
    }

    /// Price an order line against the catalog.
    pub fn price_line(
        &self,
        tenant_id: TenantId,
        product_id: counterflow_catalog::ProductId,
        kind: counterflow_orders::OrderKind,
    ) -> Option<(i64, i64)> {
        let item = self.catalog.item(tenant_id, product_id)?;
        let unit_value = match kind {
            counterflow_orders::OrderKind::Sale => item.unit_price,
            counterflow_orders::OrderKind::Purchase => item.unit_cost,
        };
        Some((unit_value, item.tax_percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use counterflow_catalog::{CatalogItem, ProductId};
    use counterflow_orders::{OrderKind, OrderLine, SettlementMode};

    fn test_services() -> AppServices {
        build_services(&AppConfig {
            jwt_secret: "secret".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            cash_tolerance: 0,
            negative_stock_policy: NegativeStockPolicy::Block,
        })
    }

    async fn on_hand_eventually(
        services: &AppServices,
        tenant: TenantId,
        product_id: ProductId,
        want: i64,
    ) {
        for _ in 0..100 {
            let hit = services
                .stock_list(tenant)
                .into_iter()
                .any(|l| l.product_id == product_id && l.on_hand == want);
            if hit {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("stock level for {product_id} never reached {want}");
    }

    #[tokio::test]
    async fn refused_transition_compensates_a_fresh_stock_apply() {
        let services = test_services();
        let tenant = TenantId::new();
        let actor = UserId::new();

        let product_id = ProductId::new(AggregateId::new());
        services.catalog().upsert(
            tenant,
            CatalogItem {
                product_id,
                sku: format!("SKU-{product_id}"),
                name: "Espresso".to_string(),
                unit_price: 1000,
                unit_cost: 500,
                tax_percent: 0,
            },
        );
        services
            .adjust_stock(tenant, product_id, 10, "opening count".to_string(), actor)
            .unwrap();

        let order_id = OrderId::new(AggregateId::new());
        services
            .submit_order(
                tenant,
                SubmitOrder {
                    tenant_id: tenant,
                    order_id,
                    kind: OrderKind::Sale,
                    mode: SettlementMode::Manual,
                    counterparty: "Table 1".to_string(),
                    lines: vec![OrderLine {
                        product_id,
                        quantity: 4,
                        unit_value: 1000,
                        tax_percent: 0,
                    }],
                    actor,
                    occurred_at: Utc::now(),
                },
            )
            .unwrap();
        services
            .reject_order(tenant, order_id, "out of service".to_string(), actor)
            .unwrap();

        // Served is unreachable from a rejected order; the deduction taken
        // ahead of the transition must be rolled back.
        let err = services
            .advance_fulfillment(tenant, order_id, FulfillmentStatus::Served, actor)
            .unwrap_err();
        assert!(matches!(err, DispatchError::StateConflict { .. }));

        on_hand_eventually(&services, tenant, product_id, 10).await;
    }
}
