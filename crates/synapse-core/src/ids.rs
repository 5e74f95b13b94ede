//! Opaque identifiers for market entities.
//!
//! Agent ids are derived deterministically from the client's public key
//! (see [`crate::identity`]); job and bid ids are prefixed UUIDv4
//! strings minted by the exchange. All relations between entities are id
//! references into process-owned maps, never owning pointers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh id with the entity prefix.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4()))
            }

            /// Wraps an existing opaque id string.
            #[must_use]
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

opaque_id!(
    /// Stable agent identity, equal across sessions and restarts for a
    /// fixed public key.
    AgentId,
    "agent"
);

opaque_id!(
    /// Unique job identifier.
    JobId,
    "job"
);

opaque_id!(
    /// Unique bid identifier.
    BidId,
    "bid"
);
