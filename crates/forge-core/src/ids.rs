//! Identifier newtypes.
//!
//! Every row the engine touches is keyed by a UUID. Wrapping each key in its
//! own type keeps a `BuildingId` from being passed where a `TradeId` is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            #[inline]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Trade row identifier.
    TradeId
);
uuid_id!(
    /// Building row identifier.
    BuildingId
);
uuid_id!(
    /// Player account identifier.
    UserId
);
uuid_id!(
    /// Character row identifier.
    CharacterId
);
uuid_id!(
    /// Global dungeon run identifier.
    RunId
);
uuid_id!(
    /// Character dungeon enrollment identifier.
    EnrollmentId
);
uuid_id!(
    /// Dungeon damage event identifier.
    EventId
);
