//! Conflict detection over a listing's active events.
//!
//! Everything here is pure: callers hand in the events and decide what to
//! persist. Recording happens inside the listing transaction (see
//! [`crate::import`]).

use crate::models::{Event, EventSource};

/// Whether events from these two sources can conflict.
///
/// Different channels always can. A manual block is a hard commitment and
/// conflicts with anything, including another manual block. Two events from
/// the same channel never do; duplicates there are settled by UID matching.
#[must_use]
pub fn sources_conflict(first: EventSource, second: EventSource) -> bool {
    first != second || first == EventSource::Manual
}

/// Whether two events are in conflict: both active, overlapping under
/// half-open semantics, with conflicting sources.
#[must_use]
pub fn in_conflict(first: &Event, second: &Event) -> bool {
    first.id != second.id
        && first.is_active()
        && second.is_active()
        && sources_conflict(first.source, second.source)
        && first.interval().overlaps(&second.interval())
}

/// Existing events that conflict with `candidate`.
///
/// `existing` may contain the candidate itself and non-active events; both
/// are skipped.
#[must_use]
pub fn find_conflicts<'a>(candidate: &Event, existing: &'a [Event]) -> Vec<&'a Event> {
    existing
        .iter()
        .filter(|other| in_conflict(candidate, other))
        .collect()
}

/// Every conflicting pair within `events`, each pair reported once.
///
/// `events` need not be sorted.
#[must_use]
pub fn overlapping_pairs(events: &[Event]) -> Vec<(&Event, &Event)> {
    let mut sorted: Vec<&Event> = events.iter().filter(|event| event.is_active()).collect();
    sorted.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));

    let mut pairs = Vec::new();
    for (index, first) in sorted.iter().enumerate() {
        for second in &sorted[index + 1..] {
            // Sorted by start: nothing further can overlap `first`.
            if second.start >= first.end {
                break;
            }
            if sources_conflict(first.source, second.source) {
                pairs.push((*first, *second));
            }
        }
    }
    pairs
}
