//! Event model: channel reservations and manual blocks

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Channel, EventId, ListingId};
use crate::error::{Error, Result};

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    ChannelA,
    ChannelB,
    /// Staff-entered block, always a hard commitment
    Manual,
}

impl EventSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChannelA => "CHANNEL_A",
            Self::ChannelB => "CHANNEL_B",
            Self::Manual => "MANUAL",
        }
    }

    /// Channel this source imports from, `None` for manual blocks
    #[must_use]
    pub const fn channel(self) -> Option<Channel> {
        match self {
            Self::ChannelA => Some(Channel::ChannelA),
            Self::ChannelB => Some(Channel::ChannelB),
            Self::Manual => None,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CHANNEL_A" => Ok(Self::ChannelA),
            "CHANNEL_B" => Ok(Self::ChannelB),
            "MANUAL" => Ok(Self::Manual),
            other => Err(Error::validation(format!("unknown event source `{other}`"))),
        }
    }
}

/// Lifecycle state of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Active,
    /// Lost a conflict resolution; kept for audit, never exported
    Shadowed,
    Cancelled,
}

impl EventStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Shadowed => "SHADOWED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Allowed-transition table
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Shadowed | Self::Cancelled) | (Self::Shadowed, Self::Cancelled)
        )
    }

    /// Validate a transition, returning the target on success
    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::invalid_state(format!(
                "event cannot move from {self} to {next}"
            )))
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "SHADOWED" => Ok(Self::Shadowed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(Error::validation(format!("unknown event status `{other}`"))),
        }
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    /// Build an interval at millisecond precision, rejecting empty or
    /// inverted ranges
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let start = start.trunc_subsecs(3);
        let end = end.trunc_subsecs(3);
        if start >= end {
            return Err(Error::validation("start must be before end"));
        }
        Ok(Self { start, end })
    }

    /// Half-open overlap; touching intervals do not overlap
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// A reservation or manual block occupying `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub listing_id: ListingId,
    pub source: EventSource,
    /// Channel-side reservation UID, used for idempotent re-import
    pub external_uid: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: EventStatus,
    /// Staff note on manual blocks; never exported
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Channel-reported description, shown to operators only
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub guest_name: Option<String>,
}

impl Event {
    /// Create a new active event
    #[must_use]
    pub fn new(
        listing_id: ListingId,
        source: EventSource,
        external_uid: Option<String>,
        interval: Interval,
        note: Option<String>,
    ) -> Self {
        let now = crate::util::now();
        Self {
            id: EventId::new(),
            listing_id,
            source,
            external_uid,
            start: interval.start,
            end: interval.end,
            status: EventStatus::Active,
            note,
            created_at: now,
            updated_at: now,
            summary: None,
            guest_name: None,
        }
    }

    /// Attach the operator-facing details a channel sent with a reservation
    #[must_use]
    pub fn with_guest_details(mut self, summary: Option<String>, guest_name: Option<String>) -> Self {
        self.summary = summary;
        self.guest_name = guest_name;
        self
    }

    #[must_use]
    pub const fn interval(&self) -> Interval {
        Interval {
            start: self.start,
            end: self.end,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }
}
