//! Listing model

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::ListingId;
use crate::error::{Error, Result};

/// Maximum display name length (characters)
pub const MAX_NAME_LEN: usize = 100;

/// Timezone applied when a listing is created without one
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// A bookable unit advertised on one or more channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Unique identifier
    pub id: ListingId,
    /// Display name
    pub name: String,
    /// IANA timezone name, e.g. `Europe/Lisbon`
    pub timezone: String,
    /// Inactive listings reject imports and revoke their feeds
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Create a new active listing after validating name and timezone
    pub fn new(name: &str, timezone: Option<&str>) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("listing name must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::validation(format!(
                "listing name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        let timezone = timezone.map_or(DEFAULT_TIMEZONE, str::trim);
        parse_timezone(timezone)?;

        Ok(Self {
            id: ListingId::new(),
            name: name.to_string(),
            timezone: timezone.to_string(),
            active: true,
            created_at: crate::util::now(),
        })
    }

    /// Parsed timezone of this listing
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::validation(format!("unknown timezone `{name}`")))
}
