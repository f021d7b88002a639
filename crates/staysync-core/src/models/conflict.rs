//! Conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ConflictId, EventId, ListingId};
use crate::error::{Error, Result};

/// Lifecycle state of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

impl ConflictStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Resolved => "RESOLVED",
        }
    }

    /// `RESOLVED` is terminal
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!((self, next), (Self::Open, Self::Resolved))
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OPEN" => Ok(Self::Open),
            "RESOLVED" => Ok(Self::Resolved),
            other => Err(Error::validation(format!(
                "unknown conflict status `{other}`"
            ))),
        }
    }
}

/// Detected overlap between exactly two events of one listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub listing_id: ListingId,
    pub event_a_id: EventId,
    pub event_b_id: EventId,
    pub status: ConflictStatus,
    pub winner_event_id: Option<EventId>,
    /// Operator's free-text reason recorded at resolution
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    /// Open a conflict between `event_a` (the newer event) and `event_b`
    #[must_use]
    pub fn open(listing_id: ListingId, event_a_id: EventId, event_b_id: EventId) -> Self {
        Self {
            id: ConflictId::new(),
            listing_id,
            event_a_id,
            event_b_id,
            status: ConflictStatus::Open,
            winner_event_id: None,
            resolution_note: None,
            created_at: crate::util::now(),
            resolved_at: None,
        }
    }

    #[must_use]
    pub fn involves(&self, event_id: EventId) -> bool {
        self.event_a_id == event_id || self.event_b_id == event_id
    }

    /// The counterpart of `event_id`, or `None` if it is not a participant
    #[must_use]
    pub fn other(&self, event_id: EventId) -> Option<EventId> {
        if self.event_a_id == event_id {
            Some(self.event_b_id)
        } else if self.event_b_id == event_id {
            Some(self.event_a_id)
        } else {
            None
        }
    }

    /// Event that lost, once resolved
    #[must_use]
    pub fn loser_event_id(&self) -> Option<EventId> {
        self.winner_event_id.and_then(|winner| self.other(winner))
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }
}
