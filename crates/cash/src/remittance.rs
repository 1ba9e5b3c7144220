use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use counterflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use counterflow_events::Event;

use crate::session::SessionId;

/// Remittance identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemittanceId(pub AggregateId);

impl RemittanceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RemittanceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemittanceStatus {
    Pending,
    Received,
}

/// Aggregate root: Remittance.
///
/// The custody-side deduction happens against the sending session at
/// creation time; this aggregate only tracks the handover itself, so
/// accepting never moves money a second time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remittance {
    id: RemittanceId,
    tenant_id: Option<TenantId>,
    reference: String,
    from_operator: UserId,
    from_session: SessionId,
    to_supervisor: UserId,
    amount: i64,
    status: RemittanceStatus,
    created_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Remittance {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RemittanceId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: String::new(),
            from_operator: UserId::from_uuid(uuid::Uuid::nil()),
            from_session: SessionId::new(AggregateId::from_uuid(uuid::Uuid::nil())),
            to_supervisor: UserId::from_uuid(uuid::Uuid::nil()),
            amount: 0,
            status: RemittanceStatus::Pending,
            created_at: None,
            received_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RemittanceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn from_operator(&self) -> UserId {
        self.from_operator
    }

    pub fn from_session(&self) -> SessionId {
        self.from_session
    }

    pub fn to_supervisor(&self) -> UserId {
        self.to_supervisor
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn status(&self) -> RemittanceStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Remittance {
    type Id = RemittanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateRemittance. The caller withdraws custody from the sending
/// session first; this command only records the pending handover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRemittance {
    pub tenant_id: TenantId,
    pub remittance_id: RemittanceId,
    pub from_operator: UserId,
    pub from_session: SessionId,
    pub to_supervisor: UserId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptRemittance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRemittance {
    pub tenant_id: TenantId,
    pub remittance_id: RemittanceId,
    pub supervisor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemittanceCommand {
    CreateRemittance(CreateRemittance),
    AcceptRemittance(AcceptRemittance),
}

/// Event: RemittanceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemittanceCreated {
    pub tenant_id: TenantId,
    pub remittance_id: RemittanceId,
    pub reference: String,
    pub from_operator: UserId,
    pub from_session: SessionId,
    pub to_supervisor: UserId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RemittanceAccepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemittanceAccepted {
    pub tenant_id: TenantId,
    pub remittance_id: RemittanceId,
    pub supervisor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemittanceEvent {
    RemittanceCreated(RemittanceCreated),
    RemittanceAccepted(RemittanceAccepted),
}

impl Event for RemittanceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RemittanceEvent::RemittanceCreated(_) => "cash.remittance.created",
            RemittanceEvent::RemittanceAccepted(_) => "cash.remittance.accepted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RemittanceEvent::RemittanceCreated(e) => e.occurred_at,
            RemittanceEvent::RemittanceAccepted(e) => e.occurred_at,
        }
    }
}

fn make_reference(remittance_id: RemittanceId) -> String {
    let tail = remittance_id.0.as_uuid().simple().to_string();
    format!("REM-{}", &tail[tail.len() - 8..].to_uppercase())
}

impl Aggregate for Remittance {
    type Command = RemittanceCommand;
    type Event = RemittanceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RemittanceEvent::RemittanceCreated(e) => {
                self.id = e.remittance_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = e.reference.clone();
                self.from_operator = e.from_operator;
                self.from_session = e.from_session;
                self.to_supervisor = e.to_supervisor;
                self.amount = e.amount;
                self.status = RemittanceStatus::Pending;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            RemittanceEvent::RemittanceAccepted(e) => {
                self.status = RemittanceStatus::Received;
                self.received_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RemittanceCommand::CreateRemittance(cmd) => self.handle_create(cmd),
            RemittanceCommand::AcceptRemittance(cmd) => self.handle_accept(cmd),
        }
    }
}

impl Remittance {
    fn handle_create(&self, cmd: &CreateRemittance) -> Result<Vec<RemittanceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::state_conflict("pending", "create"));
        }
        if cmd.amount <= 0 {
            return Err(DomainError::validation("remittance amount must be positive"));
        }

        Ok(vec![RemittanceEvent::RemittanceCreated(RemittanceCreated {
            tenant_id: cmd.tenant_id,
            remittance_id: cmd.remittance_id,
            reference: make_reference(cmd.remittance_id),
            from_operator: cmd.from_operator,
            from_session: cmd.from_session,
            to_supervisor: cmd.to_supervisor,
            amount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_accept(&self, cmd: &AcceptRemittance) -> Result<Vec<RemittanceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(cmd.tenant_id) {
            return Err(DomainError::validation("tenant mismatch"));
        }
        if self.status == RemittanceStatus::Received {
            return Err(DomainError::state_conflict("received", "accept"));
        }

        Ok(vec![RemittanceEvent::RemittanceAccepted(RemittanceAccepted {
            tenant_id: cmd.tenant_id,
            remittance_id: cmd.remittance_id,
            supervisor: cmd.supervisor,
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

    fn test_remittance_id() -> RemittanceId {
        RemittanceId::new(AggregateId::new())
    }

    fn create_cmd(remittance_id: RemittanceId, amount: i64) -> CreateRemittance {
        CreateRemittance {
            tenant_id: test_tenant_id(),
            remittance_id,
            from_operator: UserId::new(),
            from_session: SessionId::new(AggregateId::new()),
            to_supervisor: UserId::new(),
            amount,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn create_emits_pending_remittance_with_reference() {
        let remittance_id = test_remittance_id();
        let mut remittance = Remittance::empty(remittance_id);
        let cmd = create_cmd(remittance_id, 3_000);

        let events = remittance
            .handle(&RemittanceCommand::CreateRemittance(cmd.clone()))
            .unwrap();
        remittance.apply(&events[0]);

        assert_eq!(remittance.status(), RemittanceStatus::Pending);
        assert_eq!(remittance.amount(), 3_000);
        assert!(remittance.reference().starts_with("REM-"));
        assert_eq!(remittance.to_supervisor(), cmd.to_supervisor);
    }

    #[test]
    fn create_rejects_nonpositive_amount() {
        let remittance_id = test_remittance_id();
        let remittance = Remittance::empty(remittance_id);
        let err = remittance
            .handle(&RemittanceCommand::CreateRemittance(create_cmd(remittance_id, 0)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn accept_marks_received_exactly_once() {
        let remittance_id = test_remittance_id();
        let mut remittance = Remittance::empty(remittance_id);
        let cmd = create_cmd(remittance_id, 3_000);
        let events = remittance
            .handle(&RemittanceCommand::CreateRemittance(cmd.clone()))
            .unwrap();
        remittance.apply(&events[0]);

        let accept = RemittanceCommand::AcceptRemittance(AcceptRemittance {
            tenant_id: cmd.tenant_id,
            remittance_id,
            supervisor: cmd.to_supervisor,
            occurred_at: Utc::now(),
        });
        let events = remittance.handle(&accept).unwrap();
        remittance.apply(&events[0]);
        assert_eq!(remittance.status(), RemittanceStatus::Received);
        assert!(remittance.received_at().is_some());

        let err = remittance.handle(&accept).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict { .. }));
    }

    #[test]
    fn accept_before_create_is_not_found() {
        let remittance_id = test_remittance_id();
        let remittance = Remittance::empty(remittance_id);
        let err = remittance
            .handle(&RemittanceCommand::AcceptRemittance(AcceptRemittance {
                tenant_id: test_tenant_id(),
                remittance_id,
                supervisor: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }
}
