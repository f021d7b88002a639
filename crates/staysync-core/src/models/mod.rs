//! Data models for staysync

mod channel_link;
mod conflict;
mod event;
mod ids;
mod listing;

pub use channel_link::{Channel, ChannelLink};
pub use conflict::{Conflict, ConflictStatus};
pub use event::{Event, EventSource, EventStatus, Interval};
pub use ids::{ChannelLinkId, ConflictId, EventId, ListingId};
pub use listing::{parse_timezone, Listing, DEFAULT_TIMEZONE, MAX_NAME_LEN};
