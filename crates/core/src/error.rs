//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Infrastructure
/// concerns belong elsewhere. Every variant carries enough structure for the
/// caller to decide whether to re-read state and retry, or surface to a human.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or inconsistent input, rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Illegal or out-of-order transition, or a race lost against another
    /// actor. Carries what was observed vs. what was attempted.
    #[error("state conflict: {attempted} not permitted from {current}")]
    StateConflict { current: String, attempted: String },

    /// A sale would drive a stock level negative under the active policy.
    #[error("insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// A remittance exceeds the cash currently held by the session.
    #[error("insufficient custody: available {available}, requested {requested}")]
    InsufficientCustody { available: i64, requested: i64 },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn state_conflict(current: impl Into<String>, attempted: impl Into<String>) -> Self {
        Self::StateConflict {
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
