use std::collections::HashSet;

use thiserror::Error;

use counterflow_core::TenantId;

use crate::{Capability, PrincipalId, TenantMembership};

/// A fully resolved principal for authorization decisions.
///
/// Construction of this object is intentionally decoupled from storage and
/// transport: the API layer derives memberships from verified token claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing capability '{0}'")]
    Forbidden(String),
}

/// Command-side authorization contract (checked at the command boundary).
///
/// The API layer enforces these requirements before dispatching.
pub trait CommandAuthorization {
    fn required_capabilities(&self) -> &[Capability];
}

/// Authorize a principal within its active tenant context.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Capability) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let effective: HashSet<&str> = principal
        .membership
        .capabilities
        .iter()
        .map(|c| c.as_str())
        .chain(
            principal
                .membership
                .roles
                .iter()
                .flat_map(|r| capabilities_for_role(r.as_str()))
                .map(|c| c.as_str()),
        )
        .collect();

    if effective.contains("*") || effective.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Default role-to-capability mapping.
///
/// Unknown roles resolve to no capabilities; explicit grants on the
/// membership still apply.
pub fn capabilities_for_role(role: &str) -> &'static [Capability] {
    const SERVER: &[Capability] = &[
        Capability::from_static("orders.create"),
        Capability::from_static("orders.advance"),
        Capability::from_static("orders.read"),
        Capability::from_static("stock.read"),
    ];
    const CASHIER: &[Capability] = &[
        Capability::from_static("orders.read"),
        Capability::from_static("orders.settle.process"),
        Capability::from_static("orders.settle.confirm"),
        Capability::from_static("sessions.open"),
        Capability::from_static("sessions.movement"),
        Capability::from_static("sessions.close"),
        Capability::from_static("sessions.read"),
        Capability::from_static("remittances.create"),
        Capability::from_static("reconciliation.evaluate"),
    ];
    const MANAGER: &[Capability] = &[Capability::WILDCARD];
    const SUPPLIER: &[Capability] = &[
        Capability::from_static("orders.advance"),
        Capability::from_static("orders.read"),
    ];

    match role {
        "server" => SERVER,
        "cashier" => CASHIER,
        "manager" => MANAGER,
        "supplier" => SUPPLIER,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    fn principal_with(roles: Vec<Role>, caps: Vec<Capability>) -> Principal {
        let tenant = TenantId::new();
        Principal {
            principal_id: PrincipalId::new(),
            active_tenant_id: tenant,
            membership: TenantMembership {
                tenant_id: tenant,
                roles,
                capabilities: caps,
            },
        }
    }

    #[test]
    fn manager_role_grants_everything() {
        let p = principal_with(vec![Role::manager()], vec![]);
        assert!(authorize(&p, &Capability::from_static("orders.approve")).is_ok());
        assert!(authorize(&p, &Capability::from_static("remittances.accept")).is_ok());
    }

    #[test]
    fn server_cannot_settle() {
        let p = principal_with(vec![Role::server()], vec![]);
        assert!(authorize(&p, &Capability::from_static("orders.create")).is_ok());
        assert_eq!(
            authorize(&p, &Capability::from_static("orders.settle.confirm")),
            Err(AuthzError::Forbidden("orders.settle.confirm".into()))
        );
    }

    #[test]
    fn explicit_capability_grant_applies_without_role() {
        let p = principal_with(vec![], vec![Capability::from_static("sessions.close")]);
        assert!(authorize(&p, &Capability::from_static("sessions.close")).is_ok());
    }

    #[test]
    fn tenant_mismatch_rejected_before_capability_check() {
        let mut p = principal_with(vec![Role::manager()], vec![]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Capability::from_static("orders.read")),
            Err(AuthzError::TenantMismatch)
        );
    }
}
