use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use counterflow_cash::{RemittanceEvent, RemittanceId, RemittanceStatus, SessionId};
use counterflow_core::{TenantId, UserId};
use counterflow_events::EventEnvelope;

use crate::projections::{CursorCheck, ProjectionError, StreamCursors};
use crate::read_model::TenantStore;

pub const AGGREGATE_TYPE: &str = "cash.remittance";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemittanceReadModel {
    pub remittance_id: RemittanceId,
    pub reference: String,
    pub from_operator: UserId,
    pub from_session: SessionId,
    pub to_supervisor: UserId,
    pub amount: i64,
    pub status: RemittanceStatus,
    pub created_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RemittancesProjection<S>
where
    S: TenantStore<RemittanceId, RemittanceReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> RemittancesProjection<S>
where
    S: TenantStore<RemittanceId, RemittanceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        remittance_id: &RemittanceId,
    ) -> Option<RemittanceReadModel> {
        self.store.get(tenant_id, remittance_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<RemittanceReadModel> {
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

        let ev: RemittanceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let event_tenant = match &ev {
            RemittanceEvent::RemittanceCreated(e) => e.tenant_id,
            RemittanceEvent::RemittanceAccepted(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(ProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        match ev {
            RemittanceEvent::RemittanceCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.remittance_id,
                    RemittanceReadModel {
                        remittance_id: e.remittance_id,
                        reference: e.reference,
                        from_operator: e.from_operator,
                        from_session: e.from_session,
                        to_supervisor: e.to_supervisor,
                        amount: e.amount,
                        status: RemittanceStatus::Pending,
                        created_at: e.occurred_at,
                        received_at: None,
                    },
                );
            }
            RemittanceEvent::RemittanceAccepted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.remittance_id) {
                    rm.status = RemittanceStatus::Received;
                    rm.received_at = Some(e.occurred_at);
                    self.store.upsert(tenant_id, e.remittance_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
