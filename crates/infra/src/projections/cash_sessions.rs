use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use counterflow_cash::{
    CashMovement, MovementType, ReconciliationReport, SessionEvent, SessionId, SessionStatus,
    TenderType,
};
use counterflow_core::{TenantId, UserId};
use counterflow_events::EventEnvelope;

use crate::projections::{CursorCheck, ProjectionError, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "cash.session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashSessionReadModel {
    pub session_id: SessionId,
    pub operator: UserId,
    pub status: SessionStatus,
    pub opened_at: DateTime<Utc>,
    pub opening_balance: i64,
    pub cash_in: i64,
    pub cash_out: i64,
    pub cash_tender_total: i64,
    pub card_tender_total: i64,
    pub mobile_tender_total: i64,
    pub transaction_count: u64,
    pub movements: Vec<CashMovement>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closing_balance: Option<i64>,
    pub report: Option<ReconciliationReport>,
}

impl CashSessionReadModel {
    pub fn cash_balance(&self) -> i64 {
        self.opening_balance + self.cash_in - self.cash_out
    }

    fn record(&mut self, movement: CashMovement) {
        match movement.movement_type {
            MovementType::In => self.cash_in += movement.amount,
            MovementType::Out => self.cash_out += movement.amount,
        }
        self.transaction_count += 1;
        self.movements.push(movement);
    }
}

#[derive(Debug)]
pub struct CashSessionsProjection<S>
where
    S: TenantStore<SessionId, CashSessionReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> CashSessionsProjection<S>
where
    S: TenantStore<SessionId, CashSessionReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, session_id: &SessionId) -> Option<CashSessionReadModel> {
        self.store.get(tenant_id, session_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<CashSessionReadModel> {
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

        let ev: SessionEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let event_tenant = match &ev {
            SessionEvent::SessionOpened(e) => e.tenant_id,
            SessionEvent::MovementRecorded(e) => e.tenant_id,
            SessionEvent::SettlementPosted(e) => e.tenant_id,
            SessionEvent::CustodyWithdrawn(e) => e.tenant_id,
            SessionEvent::SessionClosed(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        match ev {
            SessionEvent::SessionOpened(e) => {
                self.store.upsert(
                    tenant_id,
                    e.session_id,
                    CashSessionReadModel {
                        session_id: e.session_id,
                        operator: e.operator,
                        status: SessionStatus::Open,
                        opened_at: e.occurred_at,
                        opening_balance: e.opening_balance,
                        cash_in: 0,
                        cash_out: 0,
                        cash_tender_total: 0,
                        card_tender_total: 0,
                        mobile_tender_total: 0,
                        transaction_count: 0,
                        movements: vec![],
                        closed_at: None,
                        closing_balance: None,
                        report: None,
                    },
                );
            }
            SessionEvent::MovementRecorded(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.movement.session_id) {
                    let session_id = e.movement.session_id;
                    rm.record(e.movement);
                    self.store.upsert(tenant_id, session_id, rm);
                }
            }
            SessionEvent::SettlementPosted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.movement.session_id) {
                    let session_id = e.movement.session_id;
                    match e.tender {
                        TenderType::Cash => {
                            rm.cash_tender_total += e.movement.amount;
                            rm.record(e.movement);
                        }
                        TenderType::Card => {
                            rm.card_tender_total += e.movement.amount;
                            rm.transaction_count += 1;
                        }
                        TenderType::Mobile => {
                            rm.mobile_tender_total += e.movement.amount;
                            rm.transaction_count += 1;
                        }
                    }
                    self.store.upsert(tenant_id, session_id, rm);
                }
            }
            SessionEvent::CustodyWithdrawn(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.movement.session_id) {
                    let session_id = e.movement.session_id;
                    rm.record(e.movement);
                    self.store.upsert(tenant_id, session_id, rm);
                }
            }
            SessionEvent::SessionClosed(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.session_id) {
                    rm.status = SessionStatus::Closed;
                    rm.closed_at = Some(e.occurred_at);
                    rm.closing_balance = Some(e.declared_balance);
                    rm.report = Some(e.report);
                    self.store.upsert(tenant_id, e.session_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
