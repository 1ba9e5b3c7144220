use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use counterflow_catalog::ProductId;
use counterflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use counterflow_events::Event;

/// Order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Sale,
    Purchase,
}

impl OrderKind {
    /// Initial fulfillment state when an order of this kind is submitted.
    pub fn initial_fulfillment(self) -> FulfillmentStatus {
        match self {
            OrderKind::Sale => FulfillmentStatus::Pending,
            OrderKind::Purchase => FulfillmentStatus::Submitted,
        }
    }

    fn reference_prefix(self) -> &'static str {
        match self {
            OrderKind::Sale => "SO",
            OrderKind::Purchase => "PO",
        }
    }
}

/// When settlement may be confirmed relative to fulfillment progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    /// Settlement may confirm as soon as the order is approved/confirmed.
    Direct,
    /// Settlement may confirm only after fulfillment reaches its terminal state.
    Manual,
}

/// Fulfillment axis. Sales walk `pending → approved → preparing → ready →
/// served`; purchases walk `submitted → confirmed → shipped → delivered`.
/// `cancelled` is the shared terminal reached via rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    Pending,
    Approved,
    Preparing,
    Ready,
    Served,
    Submitted,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl FulfillmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "pending",
            FulfillmentStatus::Approved => "approved",
            FulfillmentStatus::Preparing => "preparing",
            FulfillmentStatus::Ready => "ready",
            FulfillmentStatus::Served => "served",
            FulfillmentStatus::Submitted => "submitted",
            FulfillmentStatus::Confirmed => "confirmed",
            FulfillmentStatus::Shipped => "shipped",
            FulfillmentStatus::Delivered => "delivered",
            FulfillmentStatus::Cancelled => "cancelled",
        }
    }

    /// The immediate successor in this kind's sequence, if any.
    pub fn successor(self, kind: OrderKind) -> Option<FulfillmentStatus> {
        match (kind, self) {
            (OrderKind::Sale, FulfillmentStatus::Pending) => Some(FulfillmentStatus::Approved),
            (OrderKind::Sale, FulfillmentStatus::Approved) => Some(FulfillmentStatus::Preparing),
            (OrderKind::Sale, FulfillmentStatus::Preparing) => Some(FulfillmentStatus::Ready),
            (OrderKind::Sale, FulfillmentStatus::Ready) => Some(FulfillmentStatus::Served),
            (OrderKind::Purchase, FulfillmentStatus::Submitted) => {
                Some(FulfillmentStatus::Confirmed)
            }
            (OrderKind::Purchase, FulfillmentStatus::Confirmed) => {
                Some(FulfillmentStatus::Shipped)
            }
            (OrderKind::Purchase, FulfillmentStatus::Shipped) => {
                Some(FulfillmentStatus::Delivered)
            }
            _ => None,
        }
    }

    /// Whether this state is where goods physically move (stock is touched).
    pub fn is_goods_movement(self) -> bool {
        matches!(self, FulfillmentStatus::Served | FulfillmentStatus::Delivered)
    }

    /// Whether fulfillment has passed the approval checkpoint.
    pub fn is_approved_or_later(self, kind: OrderKind) -> bool {
        match kind {
            OrderKind::Sale => matches!(
                self,
                FulfillmentStatus::Approved
                    | FulfillmentStatus::Preparing
                    | FulfillmentStatus::Ready
                    | FulfillmentStatus::Served
            ),
            OrderKind::Purchase => matches!(
                self,
                FulfillmentStatus::Confirmed
                    | FulfillmentStatus::Shipped
                    | FulfillmentStatus::Delivered
            ),
        }
    }

    pub fn is_terminal(self) -> bool {
        self.is_goods_movement() || self == FulfillmentStatus::Cancelled
    }
}

impl core::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement axis: `unsettled → processing → confirmed`, with `cancelled`
/// as the shared rejection terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Unsettled,
    Processing,
    Confirmed,
    Cancelled,
}

impl SettlementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementStatus::Unsettled => "unsettled",
            SettlementStatus::Processing => "processing",
            SettlementStatus::Confirmed => "confirmed",
            SettlementStatus::Cancelled => "cancelled",
        }
    }

    pub fn successor(self) -> Option<SettlementStatus> {
        match self {
            SettlementStatus::Unsettled => Some(SettlementStatus::Processing),
            SettlementStatus::Processing => Some(SettlementStatus::Confirmed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SettlementStatus::Confirmed | SettlementStatus::Cancelled)
    }
}

impl core::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One order line. `unit_value` is the selling price for sales and the
/// acquisition cost for purchases, in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_value: i64,
    /// Whole-number tax percentage applied to this line.
    pub tax_percent: i64,
}

impl OrderLine {
    /// `None` when the client-supplied figures overflow i64.
    pub fn line_total(&self) -> Option<i64> {
        self.quantity.checked_mul(self.unit_value)
    }

    /// Tax in minor units, truncated toward zero.
    pub fn line_tax(&self) -> Option<i64> {
        Some(self.line_total()?.checked_mul(self.tax_percent)? / 100)
    }
}

/// Audit record of one axis transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub axis: String,
    pub from: String,
    pub to: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    tenant_id: Option<TenantId>,
    kind: OrderKind,
    mode: SettlementMode,
    counterparty: String,
    reference: String,
    lines: Vec<OrderLine>,
    subtotal: i64,
    tax: i64,
    total: i64,
    fulfillment: FulfillmentStatus,
    settlement: SettlementStatus,
    transitions: Vec<TransitionRecord>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            kind: OrderKind::Sale,
            mode: SettlementMode::Manual,
            counterparty: String::new(),
            reference: String::new(),
            lines: Vec::new(),
            subtotal: 0,
            tax: 0,
            total: 0,
            fulfillment: FulfillmentStatus::Pending,
            settlement: SettlementStatus::Unsettled,
            transitions: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn mode(&self) -> SettlementMode {
        self.mode
    }

    pub fn counterparty(&self) -> &str {
        &self.counterparty
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn subtotal(&self) -> i64 {
        self.subtotal
    }

    pub fn tax(&self) -> i64 {
        self.tax
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn fulfillment(&self) -> FulfillmentStatus {
        self.fulfillment
    }

    pub fn settlement(&self) -> SettlementStatus {
        self.settlement
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Both axes terminal: the order is immutable from here on.
    pub fn is_closed(&self) -> bool {
        self.fulfillment.is_terminal() && self.settlement.is_terminal()
    }

    /// Signed stock deltas for the goods-movement transition: sales deduct,
    /// purchases receive.
    pub fn stock_deltas(&self) -> Vec<(ProductId, i64)> {
        let sign = match self.kind {
            OrderKind::Sale => -1,
            OrderKind::Purchase => 1,
        };
        self.lines
            .iter()
            .map(|l| (l.product_id, sign * l.quantity))
            .collect()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SubmitOrder. Totals are always recomputed server-side; any
/// client-supplied figures are ignored by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub kind: OrderKind,
    pub mode: SettlementMode,
    pub counterparty: String,
    pub lines: Vec<OrderLine>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceFulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceFulfillment {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub target: FulfillmentStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceSettlement {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub target: SettlementStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub reason: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    SubmitOrder(SubmitOrder),
    AdvanceFulfillment(AdvanceFulfillment),
    AdvanceSettlement(AdvanceSettlement),
    RejectOrder(RejectOrder),
}

/// Event: OrderSubmitted. Carries the server-computed totals and reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSubmitted {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub kind: OrderKind,
    pub mode: SettlementMode,
    pub counterparty: String,
    pub reference: String,
    pub lines: Vec<OrderLine>,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FulfillmentAdvanced. `goods_movement` marks the single transition
/// at which stock must be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentAdvanced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub from: FulfillmentStatus,
    pub to: FulfillmentStatus,
    pub goods_movement: bool,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementAdvanced. `settled` marks the single transition at which
/// the cash posting happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementAdvanced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub from: SettlementStatus,
    pub to: SettlementStatus,
    pub settled: bool,
    pub total: i64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRejected. Closes both axes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRejected {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub fulfillment_was: FulfillmentStatus,
    pub settlement_was: SettlementStatus,
    pub reason: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderSubmitted(OrderSubmitted),
    FulfillmentAdvanced(FulfillmentAdvanced),
    SettlementAdvanced(SettlementAdvanced),
    OrderRejected(OrderRejected),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderSubmitted(_) => "orders.order.submitted",
            OrderEvent::FulfillmentAdvanced(_) => "orders.order.fulfillment_advanced",
            OrderEvent::SettlementAdvanced(_) => "orders.order.settlement_advanced",
            OrderEvent::OrderRejected(_) => "orders.order.rejected",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderSubmitted(e) => e.occurred_at,
            OrderEvent::FulfillmentAdvanced(e) => e.occurred_at,
            OrderEvent::SettlementAdvanced(e) => e.occurred_at,
            OrderEvent::OrderRejected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderSubmitted(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.kind = e.kind;
                self.mode = e.mode;
                self.counterparty = e.counterparty.clone();
                self.reference = e.reference.clone();
                self.lines = e.lines.clone();
                self.subtotal = e.subtotal;
                self.tax = e.tax;
                self.total = e.total;
                self.fulfillment = e.kind.initial_fulfillment();
                self.settlement = SettlementStatus::Unsettled;
                self.created = true;
            }
            OrderEvent::FulfillmentAdvanced(e) => {
                self.fulfillment = e.to;
                self.transitions.push(TransitionRecord {
                    axis: "fulfillment".to_string(),
                    from: e.from.as_str().to_string(),
                    to: e.to.as_str().to_string(),
                    actor: e.actor,
                    occurred_at: e.occurred_at,
                });
            }
            OrderEvent::SettlementAdvanced(e) => {
                self.settlement = e.to;
                self.transitions.push(TransitionRecord {
                    axis: "settlement".to_string(),
                    from: e.from.as_str().to_string(),
                    to: e.to.as_str().to_string(),
                    actor: e.actor,
                    occurred_at: e.occurred_at,
                });
            }
            OrderEvent::OrderRejected(e) => {
                self.fulfillment = FulfillmentStatus::Cancelled;
                self.settlement = SettlementStatus::Cancelled;
                self.transitions.push(TransitionRecord {
                    axis: "both".to_string(),
                    from: format!("{}/{}", e.fulfillment_was, e.settlement_was),
                    to: "cancelled".to_string(),
                    actor: e.actor,
                    occurred_at: e.occurred_at,
                });
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::SubmitOrder(cmd) => self.handle_submit(cmd),
            OrderCommand::AdvanceFulfillment(cmd) => self.handle_advance_fulfillment(cmd),
            OrderCommand::AdvanceSettlement(cmd) => self.handle_advance_settlement(cmd),
            OrderCommand::RejectOrder(cmd) => self.handle_reject(cmd),
        }
    }
}

/// Sum line totals and taxes across lines. Tax per line truncates toward
/// zero before summing. Rejects figures that overflow i64.
fn compute_totals(lines: &[OrderLine]) -> Result<(i64, i64, i64), DomainError> {
    let overflow = || DomainError::validation("order totals overflow");
    let mut subtotal: i64 = 0;
    let mut tax: i64 = 0;
    for l in lines {
        subtotal = l
            .line_total()
            .and_then(|t| subtotal.checked_add(t))
            .ok_or_else(overflow)?;
        tax = l
            .line_tax()
            .and_then(|t| tax.checked_add(t))
            .ok_or_else(overflow)?;
    }
    let total = subtotal.checked_add(tax).ok_or_else(overflow)?;
    Ok((subtotal, tax, total))
}

fn make_reference(kind: OrderKind, order_id: OrderId) -> String {
    let tail = order_id.0.as_uuid().simple().to_string();
    format!("{}-{}", kind.reference_prefix(), &tail[tail.len() - 8..].to_uppercase())
}

impl Order {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::validation("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.is_closed() {
            return Err(DomainError::state_conflict(
                format!("{}/{}", self.fulfillment, self.settlement),
                "mutation of a closed order",
            ));
        }
        Ok(())
    }

    fn handle_submit(&self, cmd: &SubmitOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::state_conflict(
                self.fulfillment.as_str(),
                "submit",
            ));
        }
        if cmd.counterparty.trim().is_empty() {
            return Err(DomainError::validation("counterparty cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("order must have at least one line"));
        }
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation("line quantity must be positive"));
            }
            if line.unit_value < 0 {
                return Err(DomainError::validation("line unit value cannot be negative"));
            }
            if !(0..=100).contains(&line.tax_percent) {
                return Err(DomainError::validation("tax percent must be within 0..=100"));
            }
        }

        let (subtotal, tax, total) = compute_totals(&cmd.lines)?;

        Ok(vec![OrderEvent::OrderSubmitted(OrderSubmitted {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            kind: cmd.kind,
            mode: cmd.mode,
            counterparty: cmd.counterparty.clone(),
            reference: make_reference(cmd.kind, cmd.order_id),
            lines: cmd.lines.clone(),
            subtotal,
            tax,
            total,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance_fulfillment(
        &self,
        cmd: &AdvanceFulfillment,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        // Replaying the goods-movement transition is a no-op: the effect the
        // caller wanted has already happened.
        if cmd.target == self.fulfillment && cmd.target.is_goods_movement() {
            return Ok(vec![]);
        }

        self.ensure_open()?;

        if self.fulfillment.successor(self.kind) != Some(cmd.target) {
            return Err(DomainError::state_conflict(
                self.fulfillment.as_str(),
                cmd.target.as_str(),
            ));
        }

        Ok(vec![OrderEvent::FulfillmentAdvanced(FulfillmentAdvanced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            from: self.fulfillment,
            to: cmd.target,
            goods_movement: cmd.target.is_goods_movement(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance_settlement(
        &self,
        cmd: &AdvanceSettlement,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        // Replaying the terminal confirmation is a no-op: the posting is
        // guarded by its own idempotency key downstream.
        if cmd.target == self.settlement && cmd.target == SettlementStatus::Confirmed {
            return Ok(vec![]);
        }

        self.ensure_open()?;

        if self.settlement.successor() != Some(cmd.target) {
            return Err(DomainError::state_conflict(
                self.settlement.as_str(),
                cmd.target.as_str(),
            ));
        }

        if cmd.target == SettlementStatus::Confirmed {
            let gate_met = match self.mode {
                SettlementMode::Direct => self.fulfillment.is_approved_or_later(self.kind),
                SettlementMode::Manual => self.fulfillment.is_goods_movement(),
            };
            if !gate_met {
                return Err(DomainError::state_conflict(
                    self.fulfillment.as_str(),
                    "settlement confirmation",
                ));
            }
        }

        Ok(vec![OrderEvent::SettlementAdvanced(SettlementAdvanced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            from: self.settlement,
            to: cmd.target,
            settled: cmd.target == SettlementStatus::Confirmed,
            total: self.total,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_open()?;

        // Rejection never reverses an already-applied stock movement; any
        // reversal is a separate, explicit compensation.
        Ok(vec![OrderEvent::OrderRejected(OrderRejected {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            fulfillment_was: self.fulfillment,
            settlement_was: self.settlement,
            reason: cmd.reason.clone(),
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

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_actor() -> UserId {
        UserId::new()
    }

    fn test_product() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn line(quantity: i64, unit_value: i64, tax_percent: i64) -> OrderLine {
        OrderLine {
            product_id: test_product(),
            quantity,
            unit_value,
            tax_percent,
        }
    }

    fn submit_cmd(kind: OrderKind, mode: SettlementMode, lines: Vec<OrderLine>) -> SubmitOrder {
        SubmitOrder {
            tenant_id: test_tenant_id(),
            order_id: test_order_id(),
            kind,
            mode,
            counterparty: "Table 4".to_string(),
            lines,
            actor: test_actor(),
            occurred_at: Utc::now(),
        }
    }

    fn submitted(kind: OrderKind, mode: SettlementMode, lines: Vec<OrderLine>) -> (Order, SubmitOrder) {
        let cmd = submit_cmd(kind, mode, lines);
        let mut order = Order::empty(cmd.order_id);
        let events = order.handle(&OrderCommand::SubmitOrder(cmd.clone())).unwrap();
        order.apply(&events[0]);
        (order, cmd)
    }

    fn advance(order: &mut Order, cmd: &SubmitOrder, target: FulfillmentStatus) {
        let events = order
            .handle(&OrderCommand::AdvanceFulfillment(AdvanceFulfillment {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                target,
                actor: cmd.actor,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        for e in &events {
            order.apply(e);
        }
    }

    fn settle(order: &mut Order, cmd: &SubmitOrder, target: SettlementStatus) -> Result<Vec<OrderEvent>, DomainError> {
        let events = order.handle(&OrderCommand::AdvanceSettlement(AdvanceSettlement {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            target,
            actor: cmd.actor,
            occurred_at: Utc::now(),
        }))?;
        for e in &events {
            order.apply(e);
        }
        Ok(events)
    }

    #[test]
    fn submit_computes_totals_server_side() {
        let (order, _) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(2, 1000, 10), line(1, 500, 10)],
        );
        assert_eq!(order.subtotal(), 2500);
        assert_eq!(order.tax(), 250);
        assert_eq!(order.total(), 2750);
        assert_eq!(order.fulfillment(), FulfillmentStatus::Pending);
        assert_eq!(order.settlement(), SettlementStatus::Unsettled);
        assert!(order.reference().starts_with("SO-"));
    }

    #[test]
    fn purchase_reference_uses_po_prefix() {
        let (order, _) = submitted(
            OrderKind::Purchase,
            SettlementMode::Manual,
            vec![line(10, 120, 0)],
        );
        assert!(order.reference().starts_with("PO-"));
        assert_eq!(order.fulfillment(), FulfillmentStatus::Submitted);
    }

    #[test]
    fn tax_truncates_per_line_before_summing() {
        // 3 * 333 = 999; 999 * 7 / 100 = 69 (truncated)
        let (order, _) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(3, 333, 7)],
        );
        assert_eq!(order.subtotal(), 999);
        assert_eq!(order.tax(), 69);
        assert_eq!(order.total(), 1068);
    }

    #[test]
    fn submit_rejects_empty_lines() {
        let cmd = submit_cmd(OrderKind::Sale, SettlementMode::Manual, vec![]);
        let order = Order::empty(cmd.order_id);
        let err = order.handle(&OrderCommand::SubmitOrder(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn submit_rejects_nonpositive_quantity() {
        let cmd = submit_cmd(OrderKind::Sale, SettlementMode::Manual, vec![line(0, 1000, 0)]);
        let order = Order::empty(cmd.order_id);
        let err = order.handle(&OrderCommand::SubmitOrder(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn submit_rejects_totals_that_overflow() {
        let cmd = submit_cmd(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(i64::MAX, 2, 0)],
        );
        let order = Order::empty(cmd.order_id);
        let err = order.handle(&OrderCommand::SubmitOrder(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        // Per-line totals that fit can still overflow when summed.
        let cmd = submit_cmd(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(1, i64::MAX, 0), line(1, i64::MAX, 0)],
        );
        let order = Order::empty(cmd.order_id);
        let err = order.handle(&OrderCommand::SubmitOrder(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn sale_fulfillment_walks_full_sequence() {
        let (mut order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(1, 100, 0)],
        );
        advance(&mut order, &cmd, FulfillmentStatus::Approved);
        advance(&mut order, &cmd, FulfillmentStatus::Preparing);
        advance(&mut order, &cmd, FulfillmentStatus::Ready);
        advance(&mut order, &cmd, FulfillmentStatus::Served);
        assert_eq!(order.fulfillment(), FulfillmentStatus::Served);
        assert_eq!(order.transitions().len(), 4);
    }

    #[test]
    fn skipping_a_fulfillment_stage_is_a_state_conflict() {
        let (order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(1, 100, 0)],
        );
        let err = order
            .handle(&OrderCommand::AdvanceFulfillment(AdvanceFulfillment {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                target: FulfillmentStatus::Ready,
                actor: cmd.actor,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict { .. }));
    }

    #[test]
    fn repeated_approve_is_a_state_conflict() {
        let (mut order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(1, 100, 0)],
        );
        advance(&mut order, &cmd, FulfillmentStatus::Approved);
        let err = order
            .handle(&OrderCommand::AdvanceFulfillment(AdvanceFulfillment {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                target: FulfillmentStatus::Approved,
                actor: cmd.actor,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict { .. }));
    }

    #[test]
    fn replayed_goods_movement_is_a_no_op() {
        let (mut order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(2, 1000, 0), line(1, 500, 0)],
        );
        advance(&mut order, &cmd, FulfillmentStatus::Approved);
        advance(&mut order, &cmd, FulfillmentStatus::Preparing);
        advance(&mut order, &cmd, FulfillmentStatus::Ready);
        advance(&mut order, &cmd, FulfillmentStatus::Served);
        let version_before = order.version();

        let events = order
            .handle(&OrderCommand::AdvanceFulfillment(AdvanceFulfillment {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                target: FulfillmentStatus::Served,
                actor: cmd.actor,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(order.version(), version_before);
    }

    #[test]
    fn stock_deltas_are_negative_for_sales_positive_for_purchases() {
        let (sale, _) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(2, 1000, 0)],
        );
        let (purchase, _) = submitted(
            OrderKind::Purchase,
            SettlementMode::Manual,
            vec![line(5, 120, 0)],
        );
        assert_eq!(sale.stock_deltas()[0].1, -2);
        assert_eq!(purchase.stock_deltas()[0].1, 5);
    }

    #[test]
    fn direct_mode_confirms_once_approved() {
        let (mut order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Direct,
            vec![line(1, 1000, 0)],
        );
        advance(&mut order, &cmd, FulfillmentStatus::Approved);
        settle(&mut order, &cmd, SettlementStatus::Processing).unwrap();
        let events = settle(&mut order, &cmd, SettlementStatus::Confirmed).unwrap();
        match &events[0] {
            OrderEvent::SettlementAdvanced(e) => {
                assert!(e.settled);
                assert_eq!(e.total, 1000);
            }
            _ => panic!("Expected SettlementAdvanced event"),
        }
        assert_eq!(order.settlement(), SettlementStatus::Confirmed);
    }

    #[test]
    fn direct_mode_cannot_confirm_before_approval() {
        let (mut order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Direct,
            vec![line(1, 1000, 0)],
        );
        settle(&mut order, &cmd, SettlementStatus::Processing).unwrap();
        let err = settle(&mut order, &cmd, SettlementStatus::Confirmed).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict { .. }));
    }

    #[test]
    fn manual_purchase_cannot_confirm_before_delivery() {
        let (mut order, cmd) = submitted(
            OrderKind::Purchase,
            SettlementMode::Manual,
            vec![line(10, 120, 0)],
        );
        advance(&mut order, &cmd, FulfillmentStatus::Confirmed);
        settle(&mut order, &cmd, SettlementStatus::Processing).unwrap();
        let err = settle(&mut order, &cmd, SettlementStatus::Confirmed).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict { .. }));

        advance(&mut order, &cmd, FulfillmentStatus::Shipped);
        advance(&mut order, &cmd, FulfillmentStatus::Delivered);
        assert!(settle(&mut order, &cmd, SettlementStatus::Confirmed).is_ok());
    }

    #[test]
    fn replayed_confirmation_is_a_no_op() {
        let (mut order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Direct,
            vec![line(1, 1000, 0)],
        );
        advance(&mut order, &cmd, FulfillmentStatus::Approved);
        settle(&mut order, &cmd, SettlementStatus::Processing).unwrap();
        settle(&mut order, &cmd, SettlementStatus::Confirmed).unwrap();
        let events = settle(&mut order, &cmd, SettlementStatus::Confirmed).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn reject_closes_both_axes() {
        let (mut order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(1, 1000, 0)],
        );
        advance(&mut order, &cmd, FulfillmentStatus::Approved);
        let events = order
            .handle(&OrderCommand::RejectOrder(RejectOrder {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                reason: "customer left".to_string(),
                actor: cmd.actor,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        order.apply(&events[0]);
        assert_eq!(order.fulfillment(), FulfillmentStatus::Cancelled);
        assert_eq!(order.settlement(), SettlementStatus::Cancelled);
        assert!(order.is_closed());
    }

    #[test]
    fn closed_order_rejects_further_mutation() {
        let (mut order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(1, 1000, 0)],
        );
        let events = order
            .handle(&OrderCommand::RejectOrder(RejectOrder {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                reason: "dup".to_string(),
                actor: cmd.actor,
                occurred_at: Utc::now(),
            }))
            .unwrap();
        order.apply(&events[0]);

        let err = order
            .handle(&OrderCommand::RejectOrder(RejectOrder {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                reason: "again".to_string(),
                actor: cmd.actor,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict { .. }));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (order, cmd) = submitted(
            OrderKind::Sale,
            SettlementMode::Manual,
            vec![line(1, 1000, 0)],
        );
        let before = order.clone();
        let _ = order.handle(&OrderCommand::AdvanceFulfillment(AdvanceFulfillment {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            target: FulfillmentStatus::Approved,
            actor: cmd.actor,
            occurred_at: Utc::now(),
        }));
        assert_eq!(order, before);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_line() -> impl Strategy<Value = OrderLine> {
            (1i64..1000, 0i64..100_000, 0i64..=100).prop_map(|(quantity, unit_value, tax_percent)| {
                OrderLine {
                    product_id: test_product(),
                    quantity,
                    unit_value,
                    tax_percent,
                }
            })
        }

        proptest! {
            /// Totals always satisfy `subtotal = Σ line.total` and
            /// `total = subtotal + tax`, regardless of input lines.
            #[test]
            fn totals_invariant_holds(lines in proptest::collection::vec(arb_line(), 1..10)) {
                let (order, _) = submitted(OrderKind::Sale, SettlementMode::Manual, lines.clone());
                let expected_subtotal: i64 =
                    lines.iter().map(|l| l.line_total().unwrap()).sum();
                let expected_tax: i64 = lines.iter().map(|l| l.line_tax().unwrap()).sum();
                prop_assert_eq!(order.subtotal(), expected_subtotal);
                prop_assert_eq!(order.tax(), expected_tax);
                prop_assert_eq!(order.total(), expected_subtotal + expected_tax);
            }

            /// Handle is deterministic: the same state and command always
            /// produce the same events.
            #[test]
            fn handle_is_deterministic(lines in proptest::collection::vec(arb_line(), 1..10)) {
                let (order, cmd) = submitted(OrderKind::Sale, SettlementMode::Manual, lines);
                let approve = OrderCommand::AdvanceFulfillment(AdvanceFulfillment {
                    tenant_id: cmd.tenant_id,
                    order_id: cmd.order_id,
                    target: FulfillmentStatus::Approved,
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                });
                prop_assert_eq!(order.handle(&approve), order.handle(&approve));
            }
        }
    }
}
