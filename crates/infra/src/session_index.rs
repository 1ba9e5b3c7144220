//! Open-session bookkeeping per operator.
//!
//! The at-most-one-open-session-per-operator rule crosses aggregate
//! boundaries, so the session aggregate cannot enforce it alone. This index
//! is the claim point: the service layer claims the operator slot before
//! dispatching `OpenSession` and releases it on close. A claim is atomic
//! under the lock, so two concurrent opens for the same operator resolve to
//! exactly one winner.

use std::collections::HashMap;
use std::sync::RwLock;

use counterflow_core::{TenantId, UserId};
use counterflow_cash::SessionId;

#[derive(Debug, Default)]
pub struct OpenSessionIndex {
    open: RwLock<HashMap<(TenantId, UserId), SessionId>>,
}

impl OpenSessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the operator's open-session slot. Returns the already-open
    /// session id if the slot is taken.
    pub fn claim(
        &self,
        tenant_id: TenantId,
        operator: UserId,
        session_id: SessionId,
    ) -> Result<(), SessionId> {
        let mut open = self.open.write().unwrap_or_else(|e| e.into_inner());
        match open.get(&(tenant_id, operator)) {
            Some(existing) => Err(*existing),
            None => {
                open.insert((tenant_id, operator), session_id);
                Ok(())
            }
        }
    }

    /// Release the slot. Only the session holding it may release it;
    /// a stale release (after a newer claim) is ignored.
    pub fn release(&self, tenant_id: TenantId, operator: UserId, session_id: SessionId) {
        let mut open = self.open.write().unwrap_or_else(|e| e.into_inner());
        if open.get(&(tenant_id, operator)) == Some(&session_id) {
            open.remove(&(tenant_id, operator));
        }
    }

    pub fn open_session_for(&self, tenant_id: TenantId, operator: UserId) -> Option<SessionId> {
        let open = self.open.read().unwrap_or_else(|e| e.into_inner());
        open.get(&(tenant_id, operator)).copied()
    }
}
