//! Event-driven read models.
//!
//! Each projection consumes published envelopes for one aggregate type and
//! maintains a queryable view in a [`TenantStore`]. Projections track a
//! per-stream cursor and validate sequence monotonicity, so redelivered
//! envelopes are skipped and gaps are surfaced instead of silently applied.

pub mod cash_sessions;
pub mod orders;
pub mod remittances;
pub mod stock_levels;

pub use cash_sessions::{CashSessionReadModel, CashSessionsProjection};
pub use orders::{OrderReadModel, OrdersProjection};
pub use remittances::{RemittanceReadModel, RemittancesProjection};
pub use stock_levels::{StockLevelReadModel, StockLevelsProjection};

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use counterflow_core::{AggregateId, TenantId};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Per-stream sequence cursors with monotonicity checking.
#[derive(Debug, Default)]
pub(crate) struct StreamCursors {
    inner: RwLock<HashMap<CursorKey, u64>>,
}

/// Decision for one incoming envelope.
pub(crate) enum CursorCheck {
    /// Apply the event, then call `advance`.
    Apply,
    /// Already seen (redelivery); skip silently.
    Skip,
}

impl StreamCursors {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn check(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<CursorCheck, ProjectionError> {
        let last = {
            let cursors = self.inner.read().unwrap_or_else(|e| e.into_inner());
            cursors
                .get(&CursorKey {
                    tenant_id,
                    aggregate_id,
                })
                .copied()
                .unwrap_or(0)
        };
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorCheck::Skip);
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(CursorCheck::Apply)
    }

    pub(crate) fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        let mut cursors = self.inner.write().unwrap_or_else(|e| e.into_inner());
        cursors.insert(
            CursorKey {
                tenant_id,
                aggregate_id,
            },
            seq,
        );
    }

    pub(crate) fn clear_tenant(&self, tenant_id: TenantId) {
        let mut cursors = self.inner.write().unwrap_or_else(|e| e.into_inner());
        cursors.retain(|k, _| k.tenant_id != tenant_id);
    }
}
