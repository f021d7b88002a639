//! Conflict resolution.
//!
//! Choosing a winner closes the conflict and shadows the loser. Shadowing
//! is deferred while the loser still takes part in another open conflict
//! with an active event: it stays active, and therefore exported, until
//! every live conflict it is in has been decided. Whenever a resolution or a
//! cancellation leaves an event without live open conflicts, an active
//! event that lost any of its conflicts is shadowed then.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::EventStore;
use crate::error::{Error, Result};
use crate::import::MAX_NOTE_LEN;
use crate::models::{Conflict, ConflictId, ConflictStatus, EventId, EventStatus};
use crate::util::normalize_text_option;

/// Outcome of resolving one conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub conflict: Conflict,
    /// Events moved to `SHADOWED` by this resolution
    pub shadowed: Vec<EventId>,
    /// Losers kept active because they still have open conflicts
    pub deferred: Vec<EventId>,
}

/// Resolve an open conflict in favour of `winner`
pub fn resolve_conflict(
    store: &impl EventStore,
    conflict_id: ConflictId,
    winner: EventId,
    note: Option<String>,
) -> Result<Resolution> {
    let mut conflict = store
        .get_conflict(conflict_id)?
        .ok_or_else(|| Error::not_found(format!("conflict {conflict_id}")))?;

    if !conflict.status.can_transition_to(ConflictStatus::Resolved) {
        return Err(Error::invalid_state(format!(
            "conflict {conflict_id} is already {}",
            conflict.status
        )));
    }
    let loser = conflict.other(winner).ok_or_else(|| {
        Error::validation(format!(
            "event {winner} is not a participant in conflict {conflict_id}"
        ))
    })?;

    let winning_event = store
        .get_event(winner)?
        .ok_or_else(|| Error::not_found(format!("event {winner}")))?;
    if winning_event.status == EventStatus::Cancelled {
        return Err(Error::invalid_state(format!(
            "cancelled event {winner} cannot win a conflict"
        )));
    }

    let note = normalize_text_option(note);
    if note
        .as_ref()
        .is_some_and(|note| note.chars().count() > MAX_NOTE_LEN)
    {
        return Err(Error::validation(format!(
            "resolution note must be at most {MAX_NOTE_LEN} characters"
        )));
    }

    let now = crate::util::now();
    conflict.status = ConflictStatus::Resolved;
    conflict.winner_event_id = Some(winner);
    conflict.resolution_note = note;
    conflict.resolved_at = Some(now);
    store.mark_conflict_resolved(&conflict)?;

    let mut resolution = Resolution {
        conflict,
        shadowed: Vec::new(),
        deferred: Vec::new(),
    };
    for participant in [loser, winner] {
        match settle(store, participant, now)? {
            Settled::Shadowed => resolution.shadowed.push(participant),
            Settled::Deferred => resolution.deferred.push(participant),
            Settled::Unchanged => {}
        }
    }

    tracing::info!(
        listing = %resolution.conflict.listing_id,
        conflict = %conflict_id,
        winner = %winner,
        shadowed = resolution.shadowed.len(),
        deferred = resolution.deferred.len(),
        "Resolved conflict"
    );
    Ok(resolution)
}

/// What [`settle`] did to an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Shadowed,
    Deferred,
    Unchanged,
}

/// Shadow `event_id` if it is active, lost a conflict and is not a party to
/// any open conflict with another active event
///
/// Open conflicts whose counterpart has been cancelled or shadowed no longer
/// hold the event back.
fn settle(store: &impl EventStore, event_id: EventId, at: DateTime<Utc>) -> Result<Settled> {
    let Some(event) = store.get_event(event_id)? else {
        return Ok(Settled::Unchanged);
    };
    if !event.is_active() {
        return Ok(Settled::Unchanged);
    }

    let conflicts = store.list_conflicts_for_event(event_id)?;
    let lost = conflicts
        .iter()
        .any(|conflict| !conflict.is_open() && conflict.loser_event_id() == Some(event_id));
    if !lost {
        return Ok(Settled::Unchanged);
    }

    for conflict in conflicts.iter().filter(|conflict| conflict.is_open()) {
        let Some(other) = conflict.other(event_id) else {
            continue;
        };
        if store.get_event(other)?.is_some_and(|counterpart| counterpart.is_active()) {
            tracing::debug!(event = %event_id, "Deferring shadow until open conflicts are decided");
            return Ok(Settled::Deferred);
        }
    }

    store.set_event_status(event_id, EventStatus::Active, EventStatus::Shadowed, at)?;
    Ok(Settled::Shadowed)
}

/// Re-check the live counterparts of a just-cancelled event
///
/// A loser whose shadowing was deferred only by its open conflict with
/// `cancelled` is shadowed now. Returns the events shadowed.
pub(crate) fn settle_counterparts(
    store: &impl EventStore,
    cancelled: EventId,
    at: DateTime<Utc>,
) -> Result<Vec<EventId>> {
    let mut shadowed = Vec::new();
    for conflict in store.list_conflicts_for_event(cancelled)? {
        if !conflict.is_open() {
            continue;
        }
        let Some(other) = conflict.other(cancelled) else {
            continue;
        };
        if settle(store, other, at)? == Settled::Shadowed {
            tracing::info!(
                listing = %conflict.listing_id,
                event = %other,
                cancelled = %cancelled,
                "Shadowed deferred loser after counterpart was cancelled"
            );
            shadowed.push(other);
        }
    }
    Ok(shadowed)
}
