use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are intentionally opaque strings at this layer; mapping roles to
/// capabilities lives in [`crate::authorize::capabilities_for_role`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Front-of-house staff: creates orders, advances fulfillment.
    pub fn server() -> Self {
        Self::new("server")
    }

    /// Cash-handling staff: sessions, movements, remittance handoff.
    pub fn cashier() -> Self {
        Self::new("cashier")
    }

    /// Supervisory role with the wildcard capability.
    pub fn manager() -> Self {
        Self::new("manager")
    }

    /// External party advancing purchase-side fulfillment.
    pub fn supplier() -> Self {
        Self::new("supplier")
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
