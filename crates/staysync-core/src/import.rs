//! Import gateway: validated intake of channel reservations and manual
//! blocks.
//!
//! Every function here takes an [`EventStore`] that is already inside the
//! listing transaction, so insert, detect and record commit together.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::db::EventStore;
use crate::detect;
use crate::resolve;
use crate::error::{Error, Result};
use crate::models::{
    Conflict, ConflictId, Event, EventId, EventSource, EventStatus, Interval, Listing, ListingId,
};
use crate::util::normalize_text_option;

/// Longest accepted external reservation UID
pub const MAX_EXTERNAL_UID_LEN: usize = 255;

/// Longest accepted staff note on a manual block
pub const MAX_NOTE_LEN: usize = 500;

/// Longest accepted reservation summary or guest name
pub const MAX_GUEST_DETAIL_LEN: usize = 200;

/// Reservation reported by a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPayload {
    pub source: EventSource,
    pub external_uid: String,
    /// RFC 3339 instant or `YYYY-MM-DD` (midnight in the listing timezone)
    pub start: String,
    pub end: String,
    /// Operator-facing details; never exported in feeds
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub guest_name: Option<String>,
}

/// Staff-entered block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// What an import did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    /// First sighting of this reservation
    Created,
    /// Known reservation with new dates; the previous event was cancelled
    Modified,
    /// Identical replay, nothing changed
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub outcome: ImportOutcome,
    pub event: Event,
    /// Event cancelled by a modification
    pub replaced_event_id: Option<EventId>,
    /// Conflicts opened by this call
    pub conflicts: Vec<ConflictId>,
}

/// Ingest a channel reservation for a listing
pub fn import_event(
    store: &impl EventStore,
    listing_id: ListingId,
    payload: &ImportPayload,
) -> Result<ImportResult> {
    let listing = writable_listing(store, listing_id)?;
    let channel = payload.source.channel().ok_or_else(|| {
        Error::validation("imported events must come from a channel, not MANUAL")
    })?;
    if store
        .find_active_channel_link(listing_id, channel)?
        .is_none()
    {
        return Err(Error::not_found(format!(
            "listing {listing_id} has no active {channel} link"
        )));
    }

    let external_uid = validate_external_uid(&payload.external_uid)?;
    let interval = parse_interval(&payload.start, &payload.end, listing.tz()?)?;
    let summary = guest_detail("summary", payload.summary.clone())?;
    let guest_name = guest_detail("guest_name", payload.guest_name.clone())?;

    let mut replaced_event_id = None;
    if let Some(existing) =
        store.find_live_event_by_uid(listing_id, payload.source, &external_uid)?
    {
        if existing.interval() == interval {
            tracing::debug!(
                listing = %listing_id,
                event = %existing.id,
                source = %payload.source,
                "Idempotent import replay"
            );
            return Ok(ImportResult {
                outcome: ImportOutcome::Unchanged,
                event: existing,
                replaced_event_id: None,
                conflicts: Vec::new(),
            });
        }

        let now = crate::util::now();
        store.set_event_status(existing.id, existing.status, EventStatus::Cancelled, now)?;
        resolve::settle_counterparts(store, existing.id, now)?;
        replaced_event_id = Some(existing.id);
    }

    let event = Event::new(
        listing_id,
        payload.source,
        Some(external_uid),
        interval,
        None,
    )
    .with_guest_details(summary, guest_name);
    store.insert_event(&event)?;
    let conflicts = record_conflicts(store, &event)?;

    let outcome = if replaced_event_id.is_some() {
        ImportOutcome::Modified
    } else {
        ImportOutcome::Created
    };
    tracing::info!(
        listing = %listing_id,
        event = %event.id,
        source = %event.source,
        outcome = ?outcome,
        conflicts = conflicts.len(),
        "Imported channel reservation"
    );

    Ok(ImportResult {
        outcome,
        event,
        replaced_event_id,
        conflicts,
    })
}

/// Record a manual block; always conflicts with overlapping active events
pub fn create_block(
    store: &impl EventStore,
    listing_id: ListingId,
    payload: &BlockPayload,
) -> Result<ImportResult> {
    let listing = writable_listing(store, listing_id)?;
    let interval = parse_interval(&payload.start, &payload.end, listing.tz()?)?;
    let note = normalize_text_option(payload.note.clone());
    if note
        .as_ref()
        .is_some_and(|note| note.chars().count() > MAX_NOTE_LEN)
    {
        return Err(Error::validation(format!(
            "note must be at most {MAX_NOTE_LEN} characters"
        )));
    }

    let event = Event::new(listing_id, EventSource::Manual, None, interval, note);
    store.insert_event(&event)?;
    let conflicts = record_conflicts(store, &event)?;

    tracing::info!(
        listing = %listing_id,
        event = %event.id,
        conflicts = conflicts.len(),
        "Created manual block"
    );

    Ok(ImportResult {
        outcome: ImportOutcome::Created,
        event,
        replaced_event_id: None,
        conflicts,
    })
}

/// Explicitly cancel an active or shadowed event
///
/// Open conflicts that reference the event stay open for the operator, but
/// no longer hold back the shadowing of counterparts that lost elsewhere.
pub fn cancel_event(store: &impl EventStore, event_id: EventId) -> Result<Event> {
    let mut event = store
        .get_event(event_id)?
        .ok_or_else(|| Error::not_found(format!("event {event_id}")))?;

    let now = crate::util::now();
    store.set_event_status(event.id, event.status, EventStatus::Cancelled, now)?;
    event.status = EventStatus::Cancelled;
    event.updated_at = now;
    resolve::settle_counterparts(store, event.id, now)?;

    tracing::info!(listing = %event.listing_id, event = %event.id, "Cancelled event");
    Ok(event)
}

/// Open a conflict for every active event clashing with `candidate` that is
/// not already covered by an open conflict
pub fn record_conflicts(store: &impl EventStore, candidate: &Event) -> Result<Vec<ConflictId>> {
    let active = store.list_active_events(candidate.listing_id)?;
    let mut opened = Vec::new();
    for other in detect::find_conflicts(candidate, &active) {
        if store.find_open_conflict(candidate.id, other.id)?.is_some() {
            continue;
        }
        let conflict = Conflict::open(candidate.listing_id, candidate.id, other.id);
        store.insert_conflict(&conflict)?;
        tracing::info!(
            listing = %candidate.listing_id,
            conflict = %conflict.id,
            event_a = %candidate.id,
            event_b = %other.id,
            "Detected booking conflict"
        );
        opened.push(conflict.id);
    }
    Ok(opened)
}

/// Parse an interval boundary: an RFC 3339 instant, or a calendar date
/// meaning midnight in the listing's timezone
pub fn parse_boundary(raw: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return local_midnight(date, tz);
    }
    Err(Error::validation(format!(
        "`{raw}` is neither an RFC 3339 timestamp nor a YYYY-MM-DD date"
    )))
}

/// Start of `date` in `tz`, as a UTC instant
pub fn local_midnight(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>> {
    let naive = date.and_time(NaiveTime::MIN);
    naive
        .and_local_timezone(tz)
        .earliest()
        // Zones that skip midnight on a DST change start the day an hour later
        .or_else(|| (naive + Duration::hours(1)).and_local_timezone(tz).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| Error::validation(format!("{date} has no midnight in {tz}")))
}

fn parse_interval(start: &str, end: &str, tz: Tz) -> Result<Interval> {
    let start = parse_boundary(start, tz)?;
    let end = parse_boundary(end, tz)?;
    Interval::new(start, end)
}

fn validate_external_uid(raw: &str) -> Result<String> {
    let uid = raw.trim();
    if uid.is_empty() {
        return Err(Error::validation("external_uid must not be empty"));
    }
    if uid.len() > MAX_EXTERNAL_UID_LEN {
        return Err(Error::validation(format!(
            "external_uid must be at most {MAX_EXTERNAL_UID_LEN} bytes"
        )));
    }
    if uid.chars().any(char::is_control) {
        return Err(Error::validation(
            "external_uid must not contain control characters",
        ));
    }
    Ok(uid.to_string())
}

fn guest_detail(field: &str, raw: Option<String>) -> Result<Option<String>> {
    let value = normalize_text_option(raw);
    if value
        .as_ref()
        .is_some_and(|value| value.chars().count() > MAX_GUEST_DETAIL_LEN)
    {
        return Err(Error::validation(format!(
            "{field} must be at most {MAX_GUEST_DETAIL_LEN} characters"
        )));
    }
    Ok(value)
}

fn writable_listing(store: &impl EventStore, listing_id: ListingId) -> Result<Listing> {
    let listing = store
        .get_listing(listing_id)?
        .ok_or_else(|| Error::not_found(format!("listing {listing_id}")))?;
    if !listing.active {
        return Err(Error::validation(format!(
            "listing {listing_id} is inactive"
        )));
    }
    Ok(listing)
}
