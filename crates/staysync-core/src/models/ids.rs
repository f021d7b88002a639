//! Identifier newtypes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new unique ID using UUID v7
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Get the string representation of this ID
            #[must_use]
            pub fn as_str(&self) -> String {
                self.0.to_string()
            }

            /// Raw 16-byte form
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
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

define_id!(
    /// Identifier of a bookable listing
    ListingId
);
define_id!(
    /// Identifier of a listing-to-channel binding
    ChannelLinkId
);
define_id!(
    /// Identifier of a reservation or manual block
    EventId
);
define_id!(
    /// Identifier of a recorded overlap
    ConflictId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn id_parse_round_trips_through_display() {
        let id = ConflictId::new();
        let parsed: ConflictId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn id_serializes_as_plain_string() {
        let id = ListingId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn bytes_round_trip() {
        let id = ChannelLinkId::new();
        assert_eq!(ChannelLinkId::from_bytes(*id.as_bytes()), id);
    }
}
