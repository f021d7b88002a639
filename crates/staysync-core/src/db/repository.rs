//! Event store: listing-scoped persistence for listings, channel links,
//! events and conflicts

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{
    Channel, ChannelLink, ChannelLinkId, Conflict, ConflictId, ConflictStatus, Event, EventId,
    EventSource, EventStatus, Listing, ListingId,
};

/// Optional filters for listing conflicts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictFilter {
    pub listing_id: Option<ListingId>,
    pub status: Option<ConflictStatus>,
}

/// Trait for event store operations
///
/// Implementations run inside the transaction opened by
/// [`Database`](super::Database), so a sequence of calls made from one
/// unit of work commits atomically.
pub trait EventStore {
    /// Insert a new listing
    fn insert_listing(&self, listing: &Listing) -> Result<()>;

    /// Get a listing by ID
    fn get_listing(&self, id: ListingId) -> Result<Option<Listing>>;

    /// Every listing, oldest first
    fn list_listings(&self) -> Result<Vec<Listing>>;

    /// Set a listing's active flag
    fn set_listing_active(&self, id: ListingId, active: bool) -> Result<()>;

    /// Insert a channel link; fails when an active link for the same
    /// (listing, channel) exists
    fn insert_channel_link(&self, link: &ChannelLink) -> Result<()>;

    /// Get a channel link by ID
    fn get_channel_link(&self, id: ChannelLinkId) -> Result<Option<ChannelLink>>;

    /// Active link of a listing for one channel
    fn find_active_channel_link(
        &self,
        listing_id: ListingId,
        channel: Channel,
    ) -> Result<Option<ChannelLink>>;

    /// All links of a listing, oldest first
    fn list_channel_links(&self, listing_id: ListingId) -> Result<Vec<ChannelLink>>;

    /// Set a channel link's active flag
    fn set_channel_link_active(&self, id: ChannelLinkId, active: bool) -> Result<()>;

    /// Insert a new event
    fn insert_event(&self, event: &Event) -> Result<()>;

    /// Get an event by ID
    fn get_event(&self, id: EventId) -> Result<Option<Event>>;

    /// Active or shadowed event carrying the given external reservation UID
    fn find_live_event_by_uid(
        &self,
        listing_id: ListingId,
        source: EventSource,
        external_uid: &str,
    ) -> Result<Option<Event>>;

    /// All events of a listing in every status, ordered by start
    fn list_events(&self, listing_id: ListingId) -> Result<Vec<Event>>;

    /// Active events of a listing, ordered by start then ID
    fn list_active_events(&self, listing_id: ListingId) -> Result<Vec<Event>>;

    /// Move an event from `from` to `to`, enforcing the transition table
    fn set_event_status(
        &self,
        id: EventId,
        from: EventStatus,
        to: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Insert a new open conflict
    fn insert_conflict(&self, conflict: &Conflict) -> Result<()>;

    /// Get a conflict by ID
    fn get_conflict(&self, id: ConflictId) -> Result<Option<Conflict>>;

    /// Open conflict covering the unordered pair, if any
    fn find_open_conflict(&self, first: EventId, second: EventId) -> Result<Option<Conflict>>;

    /// Conflicts matching the filter, newest first
    fn list_conflicts(&self, filter: ConflictFilter) -> Result<Vec<Conflict>>;

    /// Conflicts referencing an event, newest first
    fn list_conflicts_for_event(&self, event_id: EventId) -> Result<Vec<Conflict>>;

    /// Persist a resolution; fails if the conflict is no longer open
    fn mark_conflict_resolved(&self, conflict: &Conflict) -> Result<()>;
}

/// `SQLite` implementation of `EventStore`
pub struct SqliteEventStore<'a> {
    conn: &'a Connection,
}

const EVENT_COLUMNS: &str = "id, listing_id, source, external_uid, start_at, end_at, status, \
                             note, created_at, updated_at, summary, guest_name";

const CONFLICT_COLUMNS: &str = "id, listing_id, event_a_id, event_b_id, status, \
                                winner_event_id, resolution_note, created_at, resolved_at";

const LINK_COLUMNS: &str = "id, listing_id, channel, export_token, active, created_at";

impl<'a> SqliteEventStore<'a> {
    /// Create a new store over the given connection or transaction
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        self.conn
    }

    fn parse_listing(row: &Row<'_>) -> rusqlite::Result<Listing> {
        Ok(Listing {
            id: parse_column(row, 0)?,
            name: row.get(1)?,
            timezone: row.get(2)?,
            active: row.get::<_, i32>(3)? != 0,
            created_at: timestamp(row, 4)?,
        })
    }

    fn parse_link(row: &Row<'_>) -> rusqlite::Result<ChannelLink> {
        Ok(ChannelLink {
            id: parse_column(row, 0)?,
            listing_id: parse_column(row, 1)?,
            channel: parse_column(row, 2)?,
            export_token: row.get(3)?,
            active: row.get::<_, i32>(4)? != 0,
            created_at: timestamp(row, 5)?,
        })
    }

    fn parse_event(row: &Row<'_>) -> rusqlite::Result<Event> {
        Ok(Event {
            id: parse_column(row, 0)?,
            listing_id: parse_column(row, 1)?,
            source: parse_column(row, 2)?,
            external_uid: row.get(3)?,
            start: timestamp(row, 4)?,
            end: timestamp(row, 5)?,
            status: parse_column(row, 6)?,
            note: row.get(7)?,
            created_at: timestamp(row, 8)?,
            updated_at: timestamp(row, 9)?,
            summary: row.get(10)?,
            guest_name: row.get(11)?,
        })
    }

    fn parse_conflict(row: &Row<'_>) -> rusqlite::Result<Conflict> {
        Ok(Conflict {
            id: parse_column(row, 0)?,
            listing_id: parse_column(row, 1)?,
            event_a_id: parse_column(row, 2)?,
            event_b_id: parse_column(row, 3)?,
            status: parse_column(row, 4)?,
            winner_event_id: parse_optional_column(row, 5)?,
            resolution_note: row.get(6)?,
            created_at: timestamp(row, 7)?,
            resolved_at: optional_timestamp(row, 8)?,
        })
    }

    fn query_events(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(sql)?;
        let events = stmt
            .query_map(params, Self::parse_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn query_conflicts(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(sql)?;
        let conflicts = stmt
            .query_map(params, Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }
}

impl EventStore for SqliteEventStore<'_> {
    fn insert_listing(&self, listing: &Listing) -> Result<()> {
        self.conn.execute(
            "INSERT INTO listings (id, name, timezone, active, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                listing.id.as_str(),
                listing.name,
                listing.timezone,
                i32::from(listing.active),
                listing.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn get_listing(&self, id: ListingId) -> Result<Option<Listing>> {
        let listing = self
            .conn
            .query_row(
                "SELECT id, name, timezone, active, created_at FROM listings WHERE id = ?",
                params![id.as_str()],
                Self::parse_listing,
            )
            .optional()?;
        Ok(listing)
    }

    fn list_listings(&self) -> Result<Vec<Listing>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, timezone, active, created_at FROM listings
             ORDER BY created_at ASC, id ASC",
        )?;
        let listings = stmt
            .query_map([], Self::parse_listing)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(listings)
    }

    fn set_listing_active(&self, id: ListingId, active: bool) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE listings SET active = ? WHERE id = ?",
            params![i32::from(active), id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!("listing {id}")));
        }
        Ok(())
    }

    fn insert_channel_link(&self, link: &ChannelLink) -> Result<()> {
        if link.active
            && self
                .find_active_channel_link(link.listing_id, link.channel)?
                .is_some()
        {
            return Err(Error::invalid_state(format!(
                "listing {} already has an active {} link",
                link.listing_id, link.channel
            )));
        }
        self.conn.execute(
            "INSERT INTO channel_links (id, listing_id, channel, export_token, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                link.id.as_str(),
                link.listing_id.as_str(),
                link.channel.as_str(),
                link.export_token,
                i32::from(link.active),
                link.created_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn get_channel_link(&self, id: ChannelLinkId) -> Result<Option<ChannelLink>> {
        let link = self
            .conn
            .query_row(
                &format!("SELECT {LINK_COLUMNS} FROM channel_links WHERE id = ?"),
                params![id.as_str()],
                Self::parse_link,
            )
            .optional()?;
        Ok(link)
    }

    fn find_active_channel_link(
        &self,
        listing_id: ListingId,
        channel: Channel,
    ) -> Result<Option<ChannelLink>> {
        let link = self
            .conn
            .query_row(
                &format!(
                    "SELECT {LINK_COLUMNS} FROM channel_links
                     WHERE listing_id = ? AND channel = ? AND active = 1"
                ),
                params![listing_id.as_str(), channel.as_str()],
                Self::parse_link,
            )
            .optional()?;
        Ok(link)
    }

    fn list_channel_links(&self, listing_id: ListingId) -> Result<Vec<ChannelLink>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LINK_COLUMNS} FROM channel_links
             WHERE listing_id = ?
             ORDER BY created_at ASC, id ASC"
        ))?;
        let links = stmt
            .query_map(params![listing_id.as_str()], Self::parse_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    fn set_channel_link_active(&self, id: ChannelLinkId, active: bool) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE channel_links SET active = ? WHERE id = ?",
            params![i32::from(active), id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!("channel link {id}")));
        }
        Ok(())
    }

    fn insert_event(&self, event: &Event) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                event.id.as_str(),
                event.listing_id.as_str(),
                event.source.as_str(),
                event.external_uid,
                event.start.timestamp_millis(),
                event.end.timestamp_millis(),
                event.status.as_str(),
                event.note,
                event.created_at.timestamp_millis(),
                event.updated_at.timestamp_millis(),
                event.summary,
                event.guest_name
            ],
        )?;
        Ok(())
    }

    fn get_event(&self, id: EventId) -> Result<Option<Event>> {
        let event = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"),
                params![id.as_str()],
                Self::parse_event,
            )
            .optional()?;
        Ok(event)
    }

    fn find_live_event_by_uid(
        &self,
        listing_id: ListingId,
        source: EventSource,
        external_uid: &str,
    ) -> Result<Option<Event>> {
        let event = self
            .conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE listing_id = ? AND source = ? AND external_uid = ?
                       AND status IN ('ACTIVE', 'SHADOWED')"
                ),
                params![listing_id.as_str(), source.as_str(), external_uid],
                Self::parse_event,
            )
            .optional()?;
        Ok(event)
    }

    fn list_events(&self, listing_id: ListingId) -> Result<Vec<Event>> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE listing_id = ?
                 ORDER BY start_at ASC, id ASC"
            ),
            params![listing_id.as_str()],
        )
    }

    fn list_active_events(&self, listing_id: ListingId) -> Result<Vec<Event>> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE listing_id = ? AND status = 'ACTIVE'
                 ORDER BY start_at ASC, id ASC"
            ),
            params![listing_id.as_str()],
        )
    }

    fn set_event_status(
        &self,
        id: EventId,
        from: EventStatus,
        to: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        from.transition(to)?;
        let rows = self.conn.execute(
            "UPDATE events SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            params![to.as_str(), at.timestamp_millis(), id.as_str(), from.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::invalid_state(format!(
                "event {id} is no longer {from}"
            )));
        }
        Ok(())
    }

    fn insert_conflict(&self, conflict: &Conflict) -> Result<()> {
        self.conn.execute(
            "INSERT INTO conflicts (id, listing_id, event_a_id, event_b_id, pair_key, status,
                                    winner_event_id, resolution_note, created_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.id.as_str(),
                conflict.listing_id.as_str(),
                conflict.event_a_id.as_str(),
                conflict.event_b_id.as_str(),
                pair_key(conflict.event_a_id, conflict.event_b_id),
                conflict.status.as_str(),
                conflict.winner_event_id.map(|id| id.as_str()),
                conflict.resolution_note,
                conflict.created_at.timestamp_millis(),
                conflict.resolved_at.map(|at| at.timestamp_millis())
            ],
        )?;
        Ok(())
    }

    fn get_conflict(&self, id: ConflictId) -> Result<Option<Conflict>> {
        let conflict = self
            .conn
            .query_row(
                &format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?"),
                params![id.as_str()],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn find_open_conflict(&self, first: EventId, second: EventId) -> Result<Option<Conflict>> {
        let conflict = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts
                     WHERE pair_key = ? AND status = 'OPEN'"
                ),
                params![pair_key(first, second)],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn list_conflicts(&self, filter: ConflictFilter) -> Result<Vec<Conflict>> {
        self.query_conflicts(
            &format!(
                "SELECT {CONFLICT_COLUMNS} FROM conflicts
                 WHERE (?1 IS NULL OR listing_id = ?1) AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, id DESC"
            ),
            params![
                filter.listing_id.map(|id| id.as_str()),
                filter.status.map(ConflictStatus::as_str)
            ],
        )
    }

    fn list_conflicts_for_event(&self, event_id: EventId) -> Result<Vec<Conflict>> {
        self.query_conflicts(
            &format!(
                "SELECT {CONFLICT_COLUMNS} FROM conflicts
                 WHERE event_a_id = ?1 OR event_b_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ),
            params![event_id.as_str()],
        )
    }

    fn mark_conflict_resolved(&self, conflict: &Conflict) -> Result<()> {
        if conflict.status != ConflictStatus::Resolved {
            return Err(Error::invalid_state(format!(
                "conflict {} is not resolved",
                conflict.id
            )));
        }
        let rows = self.conn.execute(
            "UPDATE conflicts
             SET status = ?, winner_event_id = ?, resolution_note = ?, resolved_at = ?
             WHERE id = ? AND status = 'OPEN'",
            params![
                conflict.status.as_str(),
                conflict.winner_event_id.map(|id| id.as_str()),
                conflict.resolution_note,
                conflict.resolved_at.map(|at| at.timestamp_millis()),
                conflict.id.as_str()
            ],
        )?;
        if rows == 0 {
            return Err(Error::invalid_state(format!(
                "conflict {} is not open",
                conflict.id
            )));
        }
        Ok(())
    }
}

/// Order-independent key identifying an event pair
fn pair_key(first: EventId, second: EventId) -> String {
    let (low, high) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };
    format!("{low}:{high}")
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| {
        value.parse().map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
        })
    })
    .transpose()
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let millis: Option<i64> = row.get(idx)?;
    millis
        .map(|value| {
            DateTime::from_timestamp_millis(value)
                .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Interval;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, 0, 0, 0).unwrap()
    }

    fn listing(db: &Database) -> Listing {
        let listing = Listing::new("Room 1", None).unwrap();
        db.write(|store| store.insert_listing(&listing)).unwrap();
        listing
    }

    fn event(listing: &Listing, source: EventSource, uid: Option<&str>, from: u32, to: u32) -> Event {
        Event::new(
            listing.id,
            source,
            uid.map(str::to_string),
            Interval::new(day(from), day(to)).unwrap(),
            None,
        )
    }

    fn link(listing: &Listing, channel: Channel) -> ChannelLink {
        ChannelLink {
            id: ChannelLinkId::new(),
            listing_id: listing.id,
            channel,
            export_token: format!("token-{}", ChannelLinkId::new()),
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_listing_round_trip_and_deactivate() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);

        let fetched = db.read(|store| store.get_listing(listing.id)).unwrap();
        assert_eq!(fetched.as_ref().map(|l| l.name.as_str()), Some("Room 1"));

        db.write(|store| store.set_listing_active(listing.id, false))
            .unwrap();
        let fetched = db
            .read(|store| store.get_listing(listing.id))
            .unwrap()
            .unwrap();
        assert!(!fetched.active);
    }

    #[test]
    fn test_list_listings_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.read(|store| store.list_listings()).unwrap().is_empty());

        let first = listing(&db);
        let mut second = Listing::new("Room 2", Some("Europe/Lisbon")).unwrap();
        second.created_at = first.created_at + chrono::Duration::milliseconds(5);
        db.write(|store| store.insert_listing(&second)).unwrap();

        let ids: Vec<_> = db
            .read(|store| store.list_listings())
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_missing_listing_update_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .write(|store| store.set_listing_active(ListingId::new(), false))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_event_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);
        let created = event(&listing, EventSource::ChannelA, Some("uid-1"), 1, 3);

        db.write(|store| store.insert_event(&created)).unwrap();
        let fetched = db.read(|store| store.get_event(created.id)).unwrap();

        // Millisecond precision survives storage
        assert_eq!(fetched, Some(created));
    }

    #[test]
    fn test_guest_details_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);
        let created = event(&listing, EventSource::ChannelB, Some("uid-9"), 4, 6)
            .with_guest_details(Some("Family of four".into()), Some("R. Okafor".into()));

        db.write(|store| store.insert_event(&created)).unwrap();
        let fetched = db
            .read(|store| store.get_event(created.id))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.summary.as_deref(), Some("Family of four"));
        assert_eq!(fetched.guest_name.as_deref(), Some("R. Okafor"));
    }

    #[test]
    fn test_live_uid_lookup_ignores_cancelled() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);
        let created = event(&listing, EventSource::ChannelA, Some("uid-1"), 1, 3);
        db.write(|store| store.insert_event(&created)).unwrap();

        let found = db
            .read(|store| store.find_live_event_by_uid(listing.id, EventSource::ChannelA, "uid-1"))
            .unwrap();
        assert_eq!(found.map(|e| e.id), Some(created.id));

        let other_source = db
            .read(|store| store.find_live_event_by_uid(listing.id, EventSource::ChannelB, "uid-1"))
            .unwrap();
        assert!(other_source.is_none());

        db.write(|store| {
            store.set_event_status(
                created.id,
                EventStatus::Active,
                EventStatus::Cancelled,
                Utc::now(),
            )
        })
        .unwrap();
        let found = db
            .read(|store| store.find_live_event_by_uid(listing.id, EventSource::ChannelA, "uid-1"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_set_event_status_enforces_transitions() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);
        let created = event(&listing, EventSource::Manual, None, 1, 3);
        db.write(|store| store.insert_event(&created)).unwrap();

        // Stale `from` status
        let err = db
            .write(|store| {
                store.set_event_status(
                    created.id,
                    EventStatus::Shadowed,
                    EventStatus::Cancelled,
                    Utc::now(),
                )
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // Transition not in the table
        let err = db
            .write(|store| {
                store.set_event_status(
                    created.id,
                    EventStatus::Active,
                    EventStatus::Active,
                    Utc::now(),
                )
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_active_events_exclude_other_statuses() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);
        let first = event(&listing, EventSource::ChannelA, Some("a"), 1, 3);
        let second = event(&listing, EventSource::ChannelB, Some("b"), 5, 7);
        db.write(|store| {
            store.insert_event(&second)?;
            store.insert_event(&first)?;
            store.set_event_status(
                second.id,
                EventStatus::Active,
                EventStatus::Shadowed,
                Utc::now(),
            )
        })
        .unwrap();

        let active = db.read(|store| store.list_active_events(listing.id)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);

        let all = db.read(|store| store.list_events(listing.id)).unwrap();
        assert_eq!(
            all.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[test]
    fn test_only_one_active_link_per_channel() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);
        let first = link(&listing, Channel::ChannelA);
        db.write(|store| store.insert_channel_link(&first)).unwrap();

        let err = db
            .write(|store| store.insert_channel_link(&link(&listing, Channel::ChannelA)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // Other channel is fine
        db.write(|store| store.insert_channel_link(&link(&listing, Channel::ChannelB)))
            .unwrap();

        // After deactivation a replacement may be created
        db.write(|store| store.set_channel_link_active(first.id, false))
            .unwrap();
        db.write(|store| store.insert_channel_link(&link(&listing, Channel::ChannelA)))
            .unwrap();

        let links = db.read(|store| store.list_channel_links(listing.id)).unwrap();
        assert_eq!(links.len(), 3);
        let active = db
            .read(|store| store.find_active_channel_link(listing.id, Channel::ChannelA))
            .unwrap()
            .unwrap();
        assert_ne!(active.id, first.id);
    }

    #[test]
    fn test_open_conflict_lookup_is_order_independent() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);
        let a = event(&listing, EventSource::ChannelA, Some("a"), 1, 3);
        let b = event(&listing, EventSource::ChannelB, Some("b"), 2, 4);
        let conflict = Conflict::open(listing.id, b.id, a.id);
        db.write(|store| {
            store.insert_event(&a)?;
            store.insert_event(&b)?;
            store.insert_conflict(&conflict)
        })
        .unwrap();

        let found = db.read(|store| store.find_open_conflict(a.id, b.id)).unwrap();
        assert_eq!(found.map(|c| c.id), Some(conflict.id));

        // The partial unique index rejects a second open conflict for the pair
        let duplicate = Conflict::open(listing.id, a.id, b.id);
        assert!(db.write(|store| store.insert_conflict(&duplicate)).is_err());
    }

    #[test]
    fn test_resolve_conflict_persists_and_is_single_shot() {
        let db = Database::open_in_memory().unwrap();
        let listing = listing(&db);
        let a = event(&listing, EventSource::ChannelA, Some("a"), 1, 3);
        let b = event(&listing, EventSource::ChannelB, Some("b"), 2, 4);
        let mut conflict = Conflict::open(listing.id, b.id, a.id);
        db.write(|store| {
            store.insert_event(&a)?;
            store.insert_event(&b)?;
            store.insert_conflict(&conflict)
        })
        .unwrap();

        conflict.status = ConflictStatus::Resolved;
        conflict.winner_event_id = Some(a.id);
        conflict.resolution_note = Some("keep A".to_string());
        conflict.resolved_at = Some(day(5));
        db.write(|store| store.mark_conflict_resolved(&conflict))
            .unwrap();

        let fetched = db
            .read(|store| store.get_conflict(conflict.id))
            .unwrap()
            .unwrap();
        assert_eq!(fetched, conflict);

        let err = db
            .write(|store| store.mark_conflict_resolved(&conflict))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_list_conflicts_filters() {
        let db = Database::open_in_memory().unwrap();
        let first_listing = listing(&db);
        let second_listing = listing(&db);
        let a = event(&first_listing, EventSource::ChannelA, Some("a"), 1, 3);
        let b = event(&first_listing, EventSource::ChannelB, Some("b"), 2, 4);
        let c = event(&second_listing, EventSource::ChannelA, Some("c"), 1, 3);
        let d = event(&second_listing, EventSource::Manual, None, 2, 4);
        let first = Conflict::open(first_listing.id, b.id, a.id);
        let second = Conflict::open(second_listing.id, d.id, c.id);
        db.write(|store| {
            for e in [&a, &b, &c, &d] {
                store.insert_event(e)?;
            }
            store.insert_conflict(&first)?;
            store.insert_conflict(&second)
        })
        .unwrap();

        let all = db
            .read(|store| store.list_conflicts(ConflictFilter::default()))
            .unwrap();
        assert_eq!(all.len(), 2);

        let scoped = db
            .read(|store| {
                store.list_conflicts(ConflictFilter {
                    listing_id: Some(second_listing.id),
                    status: None,
                })
            })
            .unwrap();
        assert_eq!(scoped.iter().map(|c| c.id).collect::<Vec<_>>(), vec![second.id]);

        let resolved = db
            .read(|store| {
                store.list_conflicts(ConflictFilter {
                    listing_id: None,
                    status: Some(ConflictStatus::Resolved),
                })
            })
            .unwrap();
        assert!(resolved.is_empty());

        let for_event = db.read(|store| store.list_conflicts_for_event(a.id)).unwrap();
        assert_eq!(for_event.len(), 1);
    }
}
