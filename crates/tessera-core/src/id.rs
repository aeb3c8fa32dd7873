//! Typed identifier wrappers for tenants and queues.

use crate::validation::rules;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

/// Rejected identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}': {reason}")]
pub struct IdError {
    /// Which identifier was rejected ("tenant id", "queue name").
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
    /// Machine-readable reason.
    pub reason: &'static str,
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parses and validates the identifier.
            pub fn parse(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                match rules::valid_identifier(&value) {
                    Ok(()) => Ok(Self(value)),
                    Err(reason) => Err(IdError {
                        kind: $kind,
                        value,
                        reason,
                    }),
                }
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier!(
    /// Tenant identifier. Opaque apart from the identifier rules.
    TenantId,
    "tenant id"
);

identifier!(
    /// Queue (scheduler) name, unique within a tenant.
    QueueName,
    "queue name"
);
