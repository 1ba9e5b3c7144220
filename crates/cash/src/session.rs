use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use counterflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use counterflow_events::Event;
use counterflow_orders::OrderId;

use crate::reconciliation::{self, ReconciliationReport};
use crate::remittance::RemittanceId;

/// Cash session identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub AggregateId);

impl SessionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementCategory {
    SaleSettlement,
    PurchaseSettlement,
    Expense,
    Deposit,
    Withdrawal,
    Adjustment,
    Remittance,
}

/// How a settlement was paid. Only cash tenders touch the physical drawer;
/// card and mobile accumulate for reporting but never enter the cash count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenderType {
    Cash,
    Card,
    Mobile,
}

/// One recorded drawer movement. `amount` is always non-negative; direction
/// is carried by `movement_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashMovement {
    pub session_id: SessionId,
    pub movement_type: MovementType,
    pub category: MovementCategory,
    pub amount: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate root: CashSession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashSession {
    id: SessionId,
    tenant_id: Option<TenantId>,
    operator: UserId,
    status: SessionStatus,
    opened_at: Option<DateTime<Utc>>,
    opening_balance: i64,
    cash_in: i64,
    cash_out: i64,
    cash_tender_total: i64,
    card_tender_total: i64,
    mobile_tender_total: i64,
    transaction_count: u64,
    settled_orders: HashSet<OrderId>,
    remitted: HashSet<RemittanceId>,
    closed_at: Option<DateTime<Utc>>,
    closing_balance: Option<i64>,
    report: Option<ReconciliationReport>,
    version: u64,
    created: bool,
}

impl CashSession {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: SessionId) -> Self {
        Self {
            id,
            tenant_id: None,
            operator: UserId::from_uuid(uuid::Uuid::nil()),
            status: SessionStatus::Open,
            opened_at: None,
            opening_balance: 0,
            cash_in: 0,
            cash_out: 0,
            cash_tender_total: 0,
            card_tender_total: 0,
            mobile_tender_total: 0,
            transaction_count: 0,
            settled_orders: HashSet::new(),
            remitted: HashSet::new(),
            closed_at: None,
            closing_balance: None,
            report: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SessionId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn operator(&self) -> UserId {
        self.operator
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn opening_balance(&self) -> i64 {
        self.opening_balance
    }

    pub fn cash_in(&self) -> i64 {
        self.cash_in
    }

    pub fn cash_out(&self) -> i64 {
        self.cash_out
    }

    pub fn cash_tender_total(&self) -> i64 {
        self.cash_tender_total
    }

    pub fn card_tender_total(&self) -> i64 {
        self.card_tender_total
    }

    pub fn mobile_tender_total(&self) -> i64 {
        self.mobile_tender_total
    }

    pub fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn closing_balance(&self) -> Option<i64> {
        self.closing_balance
    }

    pub fn report(&self) -> Option<&ReconciliationReport> {
        self.report.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn is_open(&self) -> bool {
        self.created && self.status == SessionStatus::Open
    }

    pub fn has_settled(&self, order_id: OrderId) -> bool {
        self.settled_orders.contains(&order_id)
    }

    /// Current computable drawer balance.
    pub fn cash_balance(&self) -> i64 {
        self.opening_balance + self.cash_in - self.cash_out
    }
}

impl AggregateRoot for CashSession {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenSession. At-most-one-open-session-per-operator is enforced
/// by the caller's operator index before dispatch; the aggregate itself only
/// guards against reopening its own stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSession {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub operator: UserId,
    pub opening_balance: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub movement_type: MovementType,
    pub category: MovementCategory,
    pub amount: i64,
    pub description: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostSettlement. The cash-side leg of a settlement confirmation;
/// idempotent per order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSettlement {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub order_id: OrderId,
    pub category: MovementCategory,
    pub tender: TenderType,
    pub amount: i64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: WithdrawCustody. The out-movement leg of a remittance, posted
/// at creation time so the same cash cannot be remitted twice. Idempotent
/// per remittance id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawCustody {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub remittance_id: RemittanceId,
    pub amount: i64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseSession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSession {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub declared_balance: i64,
    pub notes: String,
    pub tolerance: i64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    OpenSession(OpenSession),
    RecordMovement(RecordMovement),
    PostSettlement(PostSettlement),
    WithdrawCustody(WithdrawCustody),
    CloseSession(CloseSession),
}

/// Event: SessionOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpened {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub operator: UserId,
    pub opening_balance: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub tenant_id: TenantId,
    pub movement: CashMovement,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPosted {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub tender: TenderType,
    pub movement: CashMovement,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CustodyWithdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyWithdrawn {
    pub tenant_id: TenantId,
    pub remittance_id: RemittanceId,
    pub movement: CashMovement,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SessionClosed. Embeds the reconciliation report so the discrepancy
/// is part of the permanent session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosed {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub declared_balance: i64,
    pub notes: String,
    pub report: ReconciliationReport,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    SessionOpened(SessionOpened),
    MovementRecorded(MovementRecorded),
    SettlementPosted(SettlementPosted),
    CustodyWithdrawn(CustodyWithdrawn),
    SessionClosed(SessionClosed),
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionOpened(_) => "cash.session.opened",
            SessionEvent::MovementRecorded(_) => "cash.session.movement_recorded",
            SessionEvent::SettlementPosted(_) => "cash.session.settlement_posted",
            SessionEvent::CustodyWithdrawn(_) => "cash.session.custody_withdrawn",
            SessionEvent::SessionClosed(_) => "cash.session.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::SessionOpened(e) => e.occurred_at,
            SessionEvent::MovementRecorded(e) => e.occurred_at,
            SessionEvent::SettlementPosted(e) => e.occurred_at,
            SessionEvent::CustodyWithdrawn(e) => e.occurred_at,
            SessionEvent::SessionClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CashSession {
    type Command = SessionCommand;
    type Event = SessionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SessionEvent::SessionOpened(e) => {
                self.id = e.session_id;
                self.tenant_id = Some(e.tenant_id);
                self.operator = e.operator;
                self.status = SessionStatus::Open;
                self.opened_at = Some(e.occurred_at);
                self.opening_balance = e.opening_balance;
                self.created = true;
            }
            SessionEvent::MovementRecorded(e) => {
                self.apply_movement(&e.movement);
            }
            SessionEvent::SettlementPosted(e) => {
                match e.tender {
                    TenderType::Cash => {
                        self.cash_tender_total += e.movement.amount;
                        self.cash_in += e.movement.amount;
                    }
                    TenderType::Card => self.card_tender_total += e.movement.amount,
                    TenderType::Mobile => self.mobile_tender_total += e.movement.amount,
                }
                self.transaction_count += 1;
                self.settled_orders.insert(e.order_id);
            }
            SessionEvent::CustodyWithdrawn(e) => {
                self.apply_movement(&e.movement);
                self.remitted.insert(e.remittance_id);
            }
            SessionEvent::SessionClosed(e) => {
                self.status = SessionStatus::Closed;
                self.closed_at = Some(e.occurred_at);
                self.closing_balance = Some(e.declared_balance);
                self.report = Some(e.report);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SessionCommand::OpenSession(cmd) => self.handle_open(cmd),
            SessionCommand::RecordMovement(cmd) => self.handle_record(cmd),
            SessionCommand::PostSettlement(cmd) => self.handle_post_settlement(cmd),
            SessionCommand::WithdrawCustody(cmd) => self.handle_withdraw_custody(cmd),
            SessionCommand::CloseSession(cmd) => self.handle_close(cmd),
        }
    }
}

impl CashSession {
    fn apply_movement(&mut self, movement: &CashMovement) {
        match movement.movement_type {
            MovementType::In => self.cash_in += movement.amount,
            MovementType::Out => self.cash_out += movement.amount,
        }
        self.transaction_count += 1;
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::validation("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenSession) -> Result<Vec<SessionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::state_conflict("open", "open"));
        }
        if cmd.opening_balance < 0 {
            return Err(DomainError::validation("opening balance cannot be negative"));
        }

        Ok(vec![SessionEvent::SessionOpened(SessionOpened {
            tenant_id: cmd.tenant_id,
            session_id: cmd.session_id,
            operator: cmd.operator,
            opening_balance: cmd.opening_balance,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<SessionEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        if self.status == SessionStatus::Closed {
            return Err(DomainError::validation("session is closed"));
        }
        if cmd.amount <= 0 {
            return Err(DomainError::validation("movement amount must be positive"));
        }

        Ok(vec![SessionEvent::MovementRecorded(MovementRecorded {
            tenant_id: cmd.tenant_id,
            movement: CashMovement {
                session_id: cmd.session_id,
                movement_type: cmd.movement_type,
                category: cmd.category,
                amount: cmd.amount,
                description: cmd.description.clone(),
                created_at: cmd.occurred_at,
            },
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post_settlement(
        &self,
        cmd: &PostSettlement,
    ) -> Result<Vec<SessionEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        // Idempotency key is the order id: a retried posting is a no-op.
        if self.settled_orders.contains(&cmd.order_id) {
            return Ok(vec![]);
        }

        if self.status == SessionStatus::Closed {
            return Err(DomainError::state_conflict("closed", "settlement posting"));
        }
        if cmd.amount <= 0 {
            return Err(DomainError::validation("settlement amount must be positive"));
        }
        if !matches!(
            cmd.category,
            MovementCategory::SaleSettlement | MovementCategory::PurchaseSettlement
        ) {
            return Err(DomainError::validation(
                "settlement posting requires a settlement category",
            ));
        }

        Ok(vec![SessionEvent::SettlementPosted(SettlementPosted {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            tender: cmd.tender,
            movement: CashMovement {
                session_id: cmd.session_id,
                movement_type: MovementType::In,
                category: cmd.category,
                amount: cmd.amount,
                description: format!("settlement of order {}", cmd.order_id),
                created_at: cmd.occurred_at,
            },
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_withdraw_custody(
        &self,
        cmd: &WithdrawCustody,
    ) -> Result<Vec<SessionEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        // Idempotency key is the remittance id.
        if self.remitted.contains(&cmd.remittance_id) {
            return Ok(vec![]);
        }

        if self.status == SessionStatus::Closed {
            return Err(DomainError::state_conflict("closed", "custody withdrawal"));
        }
        if cmd.amount <= 0 {
            return Err(DomainError::validation("remittance amount must be positive"));
        }
        let available = self.cash_balance();
        if cmd.amount > available {
            return Err(DomainError::InsufficientCustody {
                available,
                requested: cmd.amount,
            });
        }

        Ok(vec![SessionEvent::CustodyWithdrawn(CustodyWithdrawn {
            tenant_id: cmd.tenant_id,
            remittance_id: cmd.remittance_id,
            movement: CashMovement {
                session_id: cmd.session_id,
                movement_type: MovementType::Out,
                category: MovementCategory::Remittance,
                amount: cmd.amount,
                description: format!("remittance {}", cmd.remittance_id),
                created_at: cmd.occurred_at,
            },
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseSession) -> Result<Vec<SessionEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        if self.status == SessionStatus::Closed {
            return Err(DomainError::state_conflict("closed", "close"));
        }

        // A mismatch never blocks closing; the discrepancy is frozen into
        // the session record for audit.
        let report = reconciliation::evaluate(
            self.opening_balance,
            self.cash_in,
            self.cash_out,
            cmd.declared_balance,
            cmd.tolerance,
        );

        Ok(vec![SessionEvent::SessionClosed(SessionClosed {
            tenant_id: cmd.tenant_id,
            session_id: cmd.session_id,
            declared_balance: cmd.declared_balance,
            notes: cmd.notes.clone(),
            report,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
