//! `counterflow-auth` — pure authentication/authorization boundary.
//!
//! The core never authenticates; it only checks the capability set attached
//! to an incoming request. This crate is decoupled from HTTP and storage.

pub mod authorize;
pub mod capability;
pub mod claims;
pub mod jwt;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize, capabilities_for_role};
pub use capability::Capability;
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
