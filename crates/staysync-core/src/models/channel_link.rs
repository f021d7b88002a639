//! Channel link model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ChannelLinkId, EventSource, ListingId};
use crate::error::Error;

/// External booking platform a listing is advertised on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    ChannelA,
    ChannelB,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::ChannelA, Self::ChannelB];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChannelA => "CHANNEL_A",
            Self::ChannelB => "CHANNEL_B",
        }
    }

    /// Event source for reservations imported from this channel
    #[must_use]
    pub const fn source(self) -> EventSource {
        match self {
            Self::ChannelA => EventSource::ChannelA,
            Self::ChannelB => EventSource::ChannelB,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown channel `{s}`")))
    }
}

/// Binding of a listing to one external channel identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLink {
    pub id: ChannelLinkId,
    pub listing_id: ListingId,
    pub channel: Channel,
    /// Signed token embedded in the export URL
    pub export_token: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_wire_names() {
        assert_eq!(
            serde_json::to_string(&Channel::ChannelA).unwrap(),
            "\"CHANNEL_A\""
        );
        assert_eq!("CHANNEL_B".parse::<Channel>().unwrap(), Channel::ChannelB);
        assert!("MANUAL".parse::<Channel>().is_err());
    }

    #[test]
    fn channel_maps_to_event_source() {
        assert_eq!(Channel::ChannelA.source(), EventSource::ChannelA);
        assert_eq!(Channel::ChannelB.source(), EventSource::ChannelB);
    }
}
