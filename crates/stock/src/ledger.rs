use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use counterflow_catalog::ProductId;
use counterflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use counterflow_events::Event;
use counterflow_orders::OrderId;

/// Ledger identifier. One ledger aggregate exists per tenant; its id is
/// derived deterministically from the tenant id so every caller addresses
/// the same stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerId(pub AggregateId);

impl LedgerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// The single ledger stream for a tenant.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self(AggregateId::from_uuid(*tenant_id.as_uuid()))
    }
}

impl core::fmt::Display for LedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// What to do when a sale would drive a stock level negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStockPolicy {
    /// Reject the movement with `InsufficientStock`.
    Block,
    /// Let the level go negative and flag the product for review.
    AllowWithFlag,
}

impl Default for NegativeStockPolicy {
    fn default() -> Self {
        NegativeStockPolicy::Block
    }
}

/// Per-product stock level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockLevel {
    pub on_hand: i64,
    /// Set when a movement was allowed to drive the level negative.
    pub flagged: bool,
}

/// Recorded result of an order's goods movement. A replayed apply returns
/// this instead of re-mutating stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOutcome {
    pub order_id: OrderId,
    pub deltas: Vec<(ProductId, i64)>,
    pub flagged: Vec<ProductId>,
    pub reversed: bool,
}

/// Aggregate root: StockLedger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLedger {
    id: LedgerId,
    tenant_id: Option<TenantId>,
    levels: HashMap<ProductId, StockLevel>,
    applied: HashMap<OrderId, AppliedOutcome>,
    version: u64,
}

impl StockLedger {
    /// Create an empty aggregate instance for rehydration. The ledger needs
    /// no explicit creation event; the first movement brings it to life.
    pub fn empty(id: LedgerId) -> Self {
        Self {
            id,
            tenant_id: None,
            levels: HashMap::new(),
            applied: HashMap::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn level(&self, product_id: ProductId) -> StockLevel {
        self.levels.get(&product_id).copied().unwrap_or_default()
    }

    pub fn levels(&self) -> &HashMap<ProductId, StockLevel> {
        &self.levels
    }

    /// The recorded outcome for an order, if its movement already happened.
    pub fn outcome_for(&self, order_id: OrderId) -> Option<&AppliedOutcome> {
        self.applied.get(&order_id)
    }
}

impl AggregateRoot for StockLedger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AdjustStock. Manual correction outside any order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub product_id: ProductId,
    pub delta: i64,
    pub reason: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyOrder. The goods-movement hook; idempotent per order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOrder {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub order_id: OrderId,
    pub deltas: Vec<(ProductId, i64)>,
    pub policy: NegativeStockPolicy,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseOrder. Explicit compensation for an applied movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseOrder {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub order_id: OrderId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    AdjustStock(AdjustStock),
    ApplyOrder(ApplyOrder),
    ReverseOrder(ReverseOrder),
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub product_id: ProductId,
    pub delta: i64,
    pub reason: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderApplied. Carries the flagged products under allow-with-flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderApplied {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub order_id: OrderId,
    pub deltas: Vec<(ProductId, i64)>,
    pub flagged: Vec<ProductId>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderReversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReversed {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub order_id: OrderId,
    pub deltas: Vec<(ProductId, i64)>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockAdjusted(StockAdjusted),
    OrderApplied(OrderApplied),
    OrderReversed(OrderReversed),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockAdjusted(_) => "stock.ledger.adjusted",
            StockEvent::OrderApplied(_) => "stock.ledger.order_applied",
            StockEvent::OrderReversed(_) => "stock.ledger.order_reversed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockAdjusted(e) => e.occurred_at,
            StockEvent::OrderApplied(e) => e.occurred_at,
            StockEvent::OrderReversed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockLedger {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::StockAdjusted(e) => {
                self.tenant_id = Some(e.tenant_id);
                let level = self.levels.entry(e.product_id).or_default();
                level.on_hand += e.delta;
            }
            StockEvent::OrderApplied(e) => {
                self.tenant_id = Some(e.tenant_id);
                for (product_id, delta) in &e.deltas {
                    let level = self.levels.entry(*product_id).or_default();
                    level.on_hand += delta;
                }
                for product_id in &e.flagged {
                    if let Some(level) = self.levels.get_mut(product_id) {
                        level.flagged = true;
                    }
                }
                self.applied.insert(
                    e.order_id,
                    AppliedOutcome {
                        order_id: e.order_id,
                        deltas: e.deltas.clone(),
                        flagged: e.flagged.clone(),
                        reversed: false,
                    },
                );
            }
            StockEvent::OrderReversed(e) => {
                for (product_id, delta) in &e.deltas {
                    let level = self.levels.entry(*product_id).or_default();
                    level.on_hand += delta;
                }
                if let Some(outcome) = self.applied.get_mut(&e.order_id) {
                    outcome.reversed = true;
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            StockCommand::ApplyOrder(cmd) => self.handle_apply(cmd),
            StockCommand::ReverseOrder(cmd) => self.handle_reverse(cmd),
        }
    }
}

impl StockLedger {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            None => Ok(()),
            Some(t) if t == tenant_id => Ok(()),
            Some(_) => Err(DomainError::validation("tenant mismatch")),
        }
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        if cmd.delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason cannot be empty"));
        }

        Ok(vec![StockEvent::StockAdjusted(StockAdjusted {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            product_id: cmd.product_id,
            delta: cmd.delta,
            reason: cmd.reason.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply(&self, cmd: &ApplyOrder) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;

        // Idempotency key is the order id: a second apply for the same order
        // returns no events, leaving the recorded outcome untouched.
        if self.applied.contains_key(&cmd.order_id) {
            return Ok(vec![]);
        }

        if cmd.deltas.is_empty() {
            return Err(DomainError::validation("order movement has no deltas"));
        }

        // Fold the deltas product by product so an order carrying several
        // lines for the same product is judged against its net effect, not
        // each line against the committed level.
        let mut projected: HashMap<ProductId, i64> = HashMap::new();
        let mut flagged = Vec::new();
        for (product_id, delta) in &cmd.deltas {
            let level = projected
                .entry(*product_id)
                .or_insert_with(|| self.level(*product_id).on_hand);
            let available = *level;
            *level += delta;
            if *level < 0 {
                match cmd.policy {
                    NegativeStockPolicy::Block => {
                        return Err(DomainError::InsufficientStock {
                            product: product_id.to_string(),
                            available,
                            requested: -delta,
                        });
                    }
                    NegativeStockPolicy::AllowWithFlag => {
                        if !flagged.contains(product_id) {
                            flagged.push(*product_id);
                        }
                    }
                }
            }
        }

        Ok(vec![StockEvent::OrderApplied(OrderApplied {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            order_id: cmd.order_id,
            deltas: cmd.deltas.clone(),
            flagged,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseOrder) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;

        let outcome = self
            .applied
            .get(&cmd.order_id)
            .ok_or_else(DomainError::not_found)?;
        if outcome.reversed {
            return Err(DomainError::state_conflict("reversed", "reverse"));
        }

        let deltas: Vec<(ProductId, i64)> =
            outcome.deltas.iter().map(|(p, d)| (*p, -d)).collect();

        Ok(vec![StockEvent::OrderReversed(OrderReversed {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            order_id: cmd.order_id,
            deltas,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_actor() -> UserId {
        UserId::new()
    }

    fn test_product() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn ledger_with_stock(tenant_id: TenantId, product_id: ProductId, on_hand: i64) -> StockLedger {
        let ledger_id = LedgerId::for_tenant(tenant_id);
        let mut ledger = StockLedger::empty(ledger_id);
        if on_hand != 0 {
            let events = ledger
                .handle(&StockCommand::AdjustStock(AdjustStock {
                    tenant_id,
                    ledger_id,
                    product_id,
                    delta: on_hand,
                    reason: "initial stock".to_string(),
                    actor: test_actor(),
                    occurred_at: Utc::now(),
                }))
                .unwrap();
            ledger.apply(&events[0]);
        }
        ledger
    }

    fn apply_cmd(
        tenant_id: TenantId,
        order_id: OrderId,
        deltas: Vec<(ProductId, i64)>,
        policy: NegativeStockPolicy,
    ) -> StockCommand {
        StockCommand::ApplyOrder(ApplyOrder {
            tenant_id,
            ledger_id: LedgerId::for_tenant(tenant_id),
            order_id,
            deltas,
            policy,
            actor: test_actor(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn ledger_id_is_deterministic_per_tenant() {
        let tenant = test_tenant_id();
        assert_eq!(LedgerId::for_tenant(tenant), LedgerId::for_tenant(tenant));
    }

    #[test]
    fn apply_deducts_each_line_exactly_once() {
        let tenant = test_tenant_id();
        let p1 = test_product();
        let p2 = test_product();
        let mut ledger = ledger_with_stock(tenant, p1, 10);
        let events = ledger
            .handle(&StockCommand::AdjustStock(AdjustStock {
                tenant_id: tenant,
                ledger_id: LedgerId::for_tenant(tenant),
                product_id: p2,
                delta: 5,
                reason: "initial stock".to_string(),
                actor: test_actor(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        ledger.apply(&events[0]);

        let order_id = test_order_id();
        let cmd = apply_cmd(
            tenant,
            order_id,
            vec![(p1, -2), (p2, -1)],
            NegativeStockPolicy::Block,
        );
        let events = ledger.handle(&cmd).unwrap();
        assert_eq!(events.len(), 1);
        ledger.apply(&events[0]);

        assert_eq!(ledger.level(p1).on_hand, 8);
        assert_eq!(ledger.level(p2).on_hand, 4);
    }

    #[test]
    fn replayed_apply_is_a_no_op() {
        let tenant = test_tenant_id();
        let product = test_product();
        let mut ledger = ledger_with_stock(tenant, product, 10);

        let order_id = test_order_id();
        let cmd = apply_cmd(tenant, order_id, vec![(product, -2)], NegativeStockPolicy::Block);
        let events = ledger.handle(&cmd).unwrap();
        ledger.apply(&events[0]);
        assert_eq!(ledger.level(product).on_hand, 8);

        // Second apply for the same order: no events, no mutation.
        let replay = ledger.handle(&cmd).unwrap();
        assert!(replay.is_empty());
        assert_eq!(ledger.level(product).on_hand, 8);
        assert!(!ledger.outcome_for(order_id).unwrap().reversed);
    }

    #[test]
    fn block_policy_rejects_negative_stock() {
        let tenant = test_tenant_id();
        let product = test_product();
        let ledger = ledger_with_stock(tenant, product, 1);

        let err = ledger
            .handle(&apply_cmd(
                tenant,
                test_order_id(),
                vec![(product, -3)],
                NegativeStockPolicy::Block,
            ))
            .unwrap_err();
        match err {
            DomainError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 1);
                assert_eq!(requested, 3);
            }
            _ => panic!("Expected InsufficientStock error"),
        }
    }

    #[test]
    fn block_policy_judges_repeated_product_lines_by_their_net_effect() {
        let tenant = test_tenant_id();
        let product = test_product();
        let ledger = ledger_with_stock(tenant, product, 2);

        // Two lines for the same product: each fits on its own, together
        // they drive the level to -1.
        let err = ledger
            .handle(&apply_cmd(
                tenant,
                test_order_id(),
                vec![(product, -2), (product, -1)],
                NegativeStockPolicy::Block,
            ))
            .unwrap_err();
        match err {
            DomainError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 0);
                assert_eq!(requested, 1);
            }
            _ => panic!("Expected InsufficientStock error"),
        }
    }

    #[test]
    fn allow_with_flag_records_a_repeated_product_once() {
        let tenant = test_tenant_id();
        let product = test_product();
        let mut ledger = ledger_with_stock(tenant, product, 1);

        let events = ledger
            .handle(&apply_cmd(
                tenant,
                test_order_id(),
                vec![(product, -2), (product, -1)],
                NegativeStockPolicy::AllowWithFlag,
            ))
            .unwrap();
        match &events[0] {
            StockEvent::OrderApplied(ev) => assert_eq!(ev.flagged, vec![product]),
            other => panic!("unexpected event: {other:?}"),
        }
        ledger.apply(&events[0]);
        assert_eq!(ledger.level(product).on_hand, -2);
    }

    #[test]
    fn allow_with_flag_lets_stock_go_negative_and_flags() {
        let tenant = test_tenant_id();
        let product = test_product();
        let mut ledger = ledger_with_stock(tenant, product, 1);

        let events = ledger
            .handle(&apply_cmd(
                tenant,
                test_order_id(),
                vec![(product, -3)],
                NegativeStockPolicy::AllowWithFlag,
            ))
            .unwrap();
        ledger.apply(&events[0]);

        let level = ledger.level(product);
        assert_eq!(level.on_hand, -2);
        assert!(level.flagged);
    }

    #[test]
    fn purchase_receipt_increases_stock_without_policy_checks() {
        let tenant = test_tenant_id();
        let product = test_product();
        let mut ledger = StockLedger::empty(LedgerId::for_tenant(tenant));

        let events = ledger
            .handle(&apply_cmd(
                tenant,
                test_order_id(),
                vec![(product, 5)],
                NegativeStockPolicy::Block,
            ))
            .unwrap();
        ledger.apply(&events[0]);
        assert_eq!(ledger.level(product).on_hand, 5);
    }

    #[test]
    fn reverse_negates_the_recorded_deltas_once() {
        let tenant = test_tenant_id();
        let product = test_product();
        let mut ledger = ledger_with_stock(tenant, product, 10);

        let order_id = test_order_id();
        let cmd = apply_cmd(tenant, order_id, vec![(product, -4)], NegativeStockPolicy::Block);
        let events = ledger.handle(&cmd).unwrap();
        ledger.apply(&events[0]);
        assert_eq!(ledger.level(product).on_hand, 6);

        let reverse = StockCommand::ReverseOrder(ReverseOrder {
            tenant_id: tenant,
            ledger_id: LedgerId::for_tenant(tenant),
            order_id,
            actor: test_actor(),
            occurred_at: Utc::now(),
        });
        let events = ledger.handle(&reverse).unwrap();
        ledger.apply(&events[0]);
        assert_eq!(ledger.level(product).on_hand, 10);

        let err = ledger.handle(&reverse).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict { .. }));
    }

    #[test]
    fn reverse_without_apply_is_not_found() {
        let tenant = test_tenant_id();
        let ledger = StockLedger::empty(LedgerId::for_tenant(tenant));
        let err = ledger
            .handle(&StockCommand::ReverseOrder(ReverseOrder {
                tenant_id: tenant,
                ledger_id: LedgerId::for_tenant(tenant),
                order_id: test_order_id(),
                actor: test_actor(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn adjust_rejects_zero_delta() {
        let tenant = test_tenant_id();
        let ledger = StockLedger::empty(LedgerId::for_tenant(tenant));
        let err = ledger
            .handle(&StockCommand::AdjustStock(AdjustStock {
                tenant_id: tenant,
                ledger_id: LedgerId::for_tenant(tenant),
                product_id: test_product(),
                delta: 0,
                reason: "noop".to_string(),
                actor: test_actor(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Applying an order once or N times yields identical levels.
            #[test]
            fn apply_is_idempotent(initial in 0i64..10_000, qty in 1i64..100) {
                prop_assume!(qty <= initial);
                let tenant = test_tenant_id();
                let product = test_product();
                let order_id = test_order_id();

                let mut once = ledger_with_stock(tenant, product, initial);
                let cmd = apply_cmd(tenant, order_id, vec![(product, -qty)], NegativeStockPolicy::Block);
                let events = once.handle(&cmd).unwrap();
                once.apply(&events[0]);

                let mut thrice = ledger_with_stock(tenant, product, initial);
                for _ in 0..3 {
                    for event in thrice.handle(&cmd).unwrap() {
                        thrice.apply(&event);
                    }
                }

                prop_assert_eq!(once.level(product).on_hand, thrice.level(product).on_hand);
                prop_assert_eq!(once.level(product).on_hand, initial - qty);
            }

            /// Reverse always restores the pre-apply level exactly.
            #[test]
            fn reverse_restores_level(initial in 0i64..10_000, qty in 1i64..100) {
                prop_assume!(qty <= initial);
                let tenant = test_tenant_id();
                let product = test_product();
                let order_id = test_order_id();

                let mut ledger = ledger_with_stock(tenant, product, initial);
                let cmd = apply_cmd(tenant, order_id, vec![(product, -qty)], NegativeStockPolicy::Block);
                for event in ledger.handle(&cmd).unwrap() {
                    ledger.apply(&event);
                }
                let reverse = StockCommand::ReverseOrder(ReverseOrder {
                    tenant_id: tenant,
                    ledger_id: LedgerId::for_tenant(tenant),
                    order_id,
                    actor: test_actor(),
                    occurred_at: Utc::now(),
                });
                for event in ledger.handle(&reverse).unwrap() {
                    ledger.apply(&event);
                }
                prop_assert_eq!(ledger.level(product).on_hand, initial);
            }
        }
    }
}
