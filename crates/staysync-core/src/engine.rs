//! `SyncEngine`: the entry point that wires storage, detection, resolution,
//! tokens and feeds together.
//!
//! Every state-changing call that can open or settle a conflict runs inside
//! [`Database::write_listing`] for the affected listing.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::db::{ConflictFilter, Database, EventStore};
use crate::detect;
use crate::error::{Error, Result};
use crate::feed;
use crate::import::{self, BlockPayload, ImportPayload, ImportResult};
use crate::models::{
    Channel, ChannelLink, ChannelLinkId, Conflict, ConflictId, Event, EventId, Listing, ListingId,
};
use crate::resolve::{self, Resolution};
use crate::token::TokenSigner;

/// Consistency report for one listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub listing_id: ListingId,
    pub active_events: usize,
    pub conflicting_pairs: usize,
    /// Conflicting active pairs with no conflict record at all
    pub unrecorded: Vec<(EventId, EventId)>,
}

impl AuditReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.unrecorded.is_empty()
    }
}

/// Facade over the booking store
pub struct SyncEngine {
    db: Database,
    signer: TokenSigner,
}

impl SyncEngine {
    pub fn new(db: Database, signer: TokenSigner) -> Self {
        Self { db, signer }
    }

    /// Open the database at `path` (`:memory:` for a throwaway store)
    pub fn open(path: impl AsRef<Path>, secret: impl AsRef<[u8]>) -> Result<Self> {
        let signer = TokenSigner::new(secret)?;
        let path = path.as_ref();
        let db = if path == Path::new(":memory:") {
            Database::open_in_memory()?
        } else {
            Database::open(path)?
        };
        Ok(Self::new(db, signer))
    }

    // Listings

    pub fn create_listing(&self, name: &str, timezone: Option<&str>) -> Result<Listing> {
        let listing = Listing::new(name, timezone)?;
        self.db.write(|store| store.insert_listing(&listing))?;
        tracing::info!(listing = %listing.id, timezone = %listing.timezone, "Created listing");
        Ok(listing)
    }

    pub fn get_listing(&self, listing_id: ListingId) -> Result<Listing> {
        self.db.read(|store| require_listing(store, listing_id))
    }

    /// Every listing, active or not, oldest first
    pub fn list_listings(&self) -> Result<Vec<Listing>> {
        self.db.read(|store| store.list_listings())
    }

    /// Deactivate a listing: imports are rejected and its feeds revoked
    pub fn deactivate_listing(&self, listing_id: ListingId) -> Result<Listing> {
        let listing = self.db.write_listing(listing_id, |store| {
            let mut listing = require_listing(store, listing_id)?;
            if !listing.active {
                return Err(Error::invalid_state(format!(
                    "listing {listing_id} is already inactive"
                )));
            }
            store.set_listing_active(listing_id, false)?;
            listing.active = false;
            Ok(listing)
        })?;
        tracing::info!(listing = %listing_id, "Deactivated listing");
        Ok(listing)
    }

    // Channel links

    /// Link a listing to a channel and issue its feed token
    pub fn create_channel_link(&self, listing_id: ListingId, channel: Channel) -> Result<ChannelLink> {
        let id = ChannelLinkId::new();
        let link = ChannelLink {
            id,
            listing_id,
            channel,
            export_token: self.signer.sign(id),
            active: true,
            created_at: crate::util::now(),
        };
        self.db.write_listing(listing_id, |store| {
            let listing = require_listing(store, listing_id)?;
            if !listing.active {
                return Err(Error::validation(format!(
                    "listing {listing_id} is inactive"
                )));
            }
            store.insert_channel_link(&link)
        })?;
        tracing::info!(listing = %listing_id, link = %id, channel = %channel, "Created channel link");
        Ok(link)
    }

    pub fn list_channel_links(&self, listing_id: ListingId) -> Result<Vec<ChannelLink>> {
        self.db.read(|store| {
            require_listing(store, listing_id)?;
            store.list_channel_links(listing_id)
        })
    }

    /// Deactivate a link, revoking its token immediately
    pub fn deactivate_channel_link(&self, link_id: ChannelLinkId) -> Result<ChannelLink> {
        let link = self.db.write(|store| {
            let mut link = store
                .get_channel_link(link_id)?
                .ok_or_else(|| Error::not_found(format!("channel link {link_id}")))?;
            if !link.active {
                return Err(Error::invalid_state(format!(
                    "channel link {link_id} is already inactive"
                )));
            }
            store.set_channel_link_active(link_id, false)?;
            link.active = false;
            Ok(link)
        })?;
        tracing::info!(listing = %link.listing_id, link = %link_id, "Deactivated channel link");
        Ok(link)
    }

    // Events

    pub fn import_event(&self, listing_id: ListingId, payload: &ImportPayload) -> Result<ImportResult> {
        self.db
            .write_listing(listing_id, |store| import::import_event(store, listing_id, payload))
    }

    pub fn create_block(&self, listing_id: ListingId, payload: &BlockPayload) -> Result<ImportResult> {
        self.db
            .write_listing(listing_id, |store| import::create_block(store, listing_id, payload))
    }

    pub fn cancel_event(&self, event_id: EventId) -> Result<Event> {
        let listing_id = self
            .db
            .read(|store| store.get_event(event_id))?
            .ok_or_else(|| Error::not_found(format!("event {event_id}")))?
            .listing_id;
        self.db
            .write_listing(listing_id, |store| import::cancel_event(store, event_id))
    }

    /// Every event of a listing in every status, ordered by start
    pub fn list_events(&self, listing_id: ListingId) -> Result<Vec<Event>> {
        self.db.read(|store| {
            require_listing(store, listing_id)?;
            store.list_events(listing_id)
        })
    }

    // Conflicts

    /// Conflicts matching `filter`, newest first
    pub fn list_conflicts(&self, filter: ConflictFilter) -> Result<Vec<Conflict>> {
        self.db.read(|store| store.list_conflicts(filter))
    }

    pub fn get_conflict(&self, conflict_id: ConflictId) -> Result<Conflict> {
        self.db.read(|store| {
            store
                .get_conflict(conflict_id)?
                .ok_or_else(|| Error::not_found(format!("conflict {conflict_id}")))
        })
    }

    pub fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        winner: EventId,
        note: Option<String>,
    ) -> Result<Resolution> {
        let listing_id = self.get_conflict(conflict_id)?.listing_id;
        self.db.write_listing(listing_id, |store| {
            resolve::resolve_conflict(store, conflict_id, winner, note.clone())
        })
    }

    // Feeds

    /// iCalendar document for the channel link `token` was issued for
    pub fn render_feed(&self, token: &str) -> Result<String> {
        self.db
            .read(|store| feed::compose_feed(store, &self.signer, token))
    }

    /// Check that every conflicting pair of active events has a conflict
    /// record, open or resolved
    pub fn audit_listing(&self, listing_id: ListingId) -> Result<AuditReport> {
        let (events, conflicts) = self.db.read(|store| {
            require_listing(store, listing_id)?;
            let events = store.list_active_events(listing_id)?;
            let conflicts = store.list_conflicts(ConflictFilter {
                listing_id: Some(listing_id),
                status: None,
            })?;
            Ok((events, conflicts))
        })?;

        let recorded: HashSet<(EventId, EventId)> = conflicts
            .iter()
            .map(|conflict| ordered(conflict.event_a_id, conflict.event_b_id))
            .collect();
        let pairs = detect::overlapping_pairs(&events);
        let unrecorded: Vec<_> = pairs
            .iter()
            .map(|(first, second)| ordered(first.id, second.id))
            .filter(|pair| !recorded.contains(pair))
            .collect();

        if !unrecorded.is_empty() {
            tracing::warn!(
                listing = %listing_id,
                unrecorded = unrecorded.len(),
                "Audit found conflicting events without a conflict record"
            );
        }
        Ok(AuditReport {
            listing_id,
            active_events: events.len(),
            conflicting_pairs: pairs.len(),
            unrecorded,
        })
    }
}

fn require_listing(store: &impl EventStore, listing_id: ListingId) -> Result<Listing> {
    store
        .get_listing(listing_id)?
        .ok_or_else(|| Error::not_found(format!("listing {listing_id}")))
}

fn ordered(first: EventId, second: EventId) -> (EventId, EventId) {
    if first <= second {
        (first, second)
    } else {
        (second, first)
    }
}
