use axum::http::StatusCode;

use counterflow_auth::{Capability, CommandAuthorization};
use counterflow_core::AggregateId;

use crate::app::errors;
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

/// Associates required capabilities with a command for the authz guard.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Capability>,
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_capabilities(&self) -> &[Capability] {
        &self.required
    }
}

/// Capability gate for routes that carry no dispatchable command (reads,
/// pure evaluations).
pub fn require(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    capability: &'static str,
) -> Result<(), axum::response::Response> {
    let guard = CmdAuth {
        inner: (),
        required: vec![Capability::from_static(capability)],
    };
    authz::authorize_command(tenant, principal, &guard)
        .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}

pub fn parse_aggregate_id(
    raw: &str,
    what: &'static str,
) -> Result<AggregateId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {what} id"),
        )
    })
}
