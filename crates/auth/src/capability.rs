use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// A capability string naming an operation family, e.g. `orders.approve`.
///
/// The wildcard capability `*` grants everything and is reserved for
/// manager-level roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(Cow<'static, str>);

impl Capability {
    pub const WILDCARD: Capability = Capability(Cow::Borrowed("*"));

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == "*"
    }

    /// Whether this capability satisfies a required one.
    pub fn grants(&self, required: &Capability) -> bool {
        self.is_wildcard() || self.0 == required.0
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Capability {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for Capability {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}
