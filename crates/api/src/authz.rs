//! API-side authorization guard for commands.
//!
//! Capability checks happen at the command boundary (before dispatch) so the
//! domain aggregates and infra stay auth-agnostic.

use counterflow_auth::{
    authorize, AuthzError, CommandAuthorization, Principal, TenantMembership,
};

use crate::context::{PrincipalContext, TenantContext};

/// Check authorization for a command in the current request context.
///
/// Called **before** dispatching a command.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    // Role-derived capabilities are resolved inside `authorize`; explicit
    // per-membership grants would come from a policy store, which this
    // deployment does not carry.
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        capabilities: Vec::new(),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership,
    };

    for cap in command.required_capabilities() {
        authorize(&principal, cap)?;
    }

    Ok(())
}
