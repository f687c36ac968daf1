//! Strongly-typed ids for engine entities.
//!
//! Ids wrap ULIDs, so they sort by mint time; listing executions oldest-first
//! falls out of ordering by id. Display prefixes each kind (`exec_…`,
//! `evt_…`) and parsing accepts either the prefixed form or a bare ULID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when a string is not a valid id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Which id kind was being parsed.
    pub id_type: &'static str,
    /// Why parsing failed.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Strips an optional `{prefix}_` and parses the remainder as a ULID.
fn parse_prefixed(id_type: &'static str, prefix: &str, raw: &str) -> Result<Ulid, ParseIdError> {
    let ulid_part = raw
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(raw);
    Ulid::from_str(ulid_part).map_err(|e| ParseIdError {
        id_type,
        reason: e.to_string(),
    })
}

/// Declares a ULID-backed id with a display prefix.
///
/// The generated surface is deliberately small: mint, display, parse, and
/// the derives the engine relies on (ordering for oldest-first listings,
/// hashing for lookup tables, transparent serde).
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Mints a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(stringify!($name), $prefix, s).map(Self)
            }
        }
    };
}

entity_id!(
    /// One live run of a workflow.
    ExecutionId => "exec"
);

entity_id!(
    /// An event published on the bus.
    EventId => "evt"
);

entity_id!(
    /// A streaming client attached to the bus.
    ClientId => "client"
);

entity_id!(
    /// An in-process bus subscription.
    SubscriptionId => "sub"
);
