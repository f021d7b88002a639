//! iCalendar export feeds.
//!
//! A feed is what one channel sees of a listing: its own active stays as
//! `Reserved`, and every other active event (the other channel, manual
//! blocks) as opaque `Not available` time. Shadowed and cancelled events are
//! never rendered. Output depends only on stored state, so an unchanged
//! listing renders byte-identical documents.

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::db::EventStore;
use crate::error::{Error, Result};
use crate::models::{Channel, Event, Listing};
use crate::token::TokenSigner;

const PRODID: &str = "-//staysync//Channel Sync//EN";
const UID_DOMAIN: &str = "staysync";
const OWN_SUMMARY: &str = "Reserved";
const BLOCKED_SUMMARY: &str = "Not available";

/// Content lines longer than this many octets are folded
const MAX_LINE_OCTETS: usize = 75;

/// Render the feed authorized by `token`
///
/// Any failure to authorize (bad signature, unknown or inactive link,
/// inactive listing) is an auth error.
pub fn compose_feed(store: &impl EventStore, signer: &TokenSigner, token: &str) -> Result<String> {
    let link_id = signer.verify(token).inspect_err(|err| {
        tracing::warn!(error = %err, "Rejected feed token");
    })?;

    let link = store
        .get_channel_link(link_id)?
        .filter(|link| link.active)
        .ok_or_else(|| {
            tracing::warn!(link = %link_id, "Feed requested for revoked link");
            Error::auth("feed has been revoked")
        })?;
    let listing = store
        .get_listing(link.listing_id)?
        .filter(|listing| listing.active)
        .ok_or_else(|| {
            tracing::warn!(listing = %link.listing_id, "Feed requested for inactive listing");
            Error::auth("feed has been revoked")
        })?;

    let events = store.list_active_events(listing.id)?;
    let calendar = render_calendar(&listing, link.channel, &events)?;
    tracing::debug!(
        listing = %listing.id,
        channel = %link.channel,
        events = events.len(),
        "Composed feed"
    );
    Ok(calendar)
}

/// Render the calendar `channel` sees for `listing`
///
/// Non-active events in `events` are skipped.
pub fn render_calendar(listing: &Listing, channel: Channel, events: &[Event]) -> Result<String> {
    let tz = listing.tz()?;
    let mut visible: Vec<&Event> = events.iter().filter(|event| event.is_active()).collect();
    visible.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));

    let mut out = String::new();
    push_line(&mut out, "BEGIN:VCALENDAR");
    push_line(&mut out, "VERSION:2.0");
    push_line(&mut out, &format!("PRODID:{PRODID}"));
    push_line(&mut out, "CALSCALE:GREGORIAN");
    push_line(&mut out, "METHOD:PUBLISH");
    push_line(
        &mut out,
        &format!("X-WR-CALNAME:{}", escape_text(&listing.name)),
    );
    push_line(&mut out, &format!("X-WR-TIMEZONE:{}", listing.timezone));

    for event in visible {
        let own = event.source.channel() == Some(channel);
        let (start, end) = all_day_span(event, tz);
        let stamp = format_stamp(event.updated_at);

        push_line(&mut out, "BEGIN:VEVENT");
        push_line(&mut out, &format!("UID:{}@{UID_DOMAIN}", event.id));
        push_line(&mut out, &format!("DTSTAMP:{stamp}"));
        push_line(&mut out, &format!("LAST-MODIFIED:{stamp}"));
        push_line(&mut out, &format!("DTSTART;VALUE=DATE:{}", format_date(start)));
        push_line(&mut out, &format!("DTEND;VALUE=DATE:{}", format_date(end)));
        push_line(
            &mut out,
            &format!(
                "SUMMARY:{}",
                if own { OWN_SUMMARY } else { BLOCKED_SUMMARY }
            ),
        );
        push_line(&mut out, "TRANSP:OPAQUE");
        push_line(&mut out, "STATUS:CONFIRMED");
        push_line(&mut out, "END:VEVENT");
    }

    push_line(&mut out, "END:VCALENDAR");
    Ok(out)
}

/// Local calendar dates covered by an event; the end date is exclusive
/// and at least one day after the start
fn all_day_span(event: &Event, tz: Tz) -> (NaiveDate, NaiveDate) {
    let start = event.start.with_timezone(&tz).date_naive();
    let end = event.end.with_timezone(&tz).date_naive();
    let end = if end > start {
        end
    } else {
        start.checked_add_days(Days::new(1)).unwrap_or(start)
    };
    (start, end)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn format_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Escape a TEXT value
fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Append a content line, folded at 75 octets without splitting a
/// UTF-8 sequence, terminated by CRLF
fn push_line(out: &mut String, line: &str) {
    let mut width = 0;
    for ch in line.chars() {
        let len = ch.len_utf8();
        if width + len > MAX_LINE_OCTETS {
            out.push_str("\r\n ");
            // The leading space counts toward the continuation line
            width = 1;
        }
        out.push(ch);
        width += len;
    }
    out.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::import::{cancel_event, import_event, ImportPayload};
    use crate::models::{ChannelLink, ChannelLinkId, EventSource, EventStatus, Interval};
    use crate::resolve::resolve_conflict;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const SECRET: &str = "feed-tests-secret-0123456789abcdef";

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn event(listing: &Listing, source: EventSource, from: DateTime<Utc>, to: DateTime<Utc>) -> Event {
        let uid = (source != EventSource::Manual).then(|| format!("{source}-{from}"));
        let mut event = Event::new(listing.id, source, uid, Interval::new(from, to).unwrap(), None);
        event.updated_at = Utc.with_ymd_and_hms(2024, 5, 20, 8, 30, 0).unwrap();
        event
    }

    fn vevents(calendar: &str) -> Vec<&str> {
        calendar
            .split("BEGIN:VEVENT\r\n")
            .skip(1)
            .collect()
    }

    #[test]
    fn renders_own_and_blocked_events() {
        let listing = Listing::new("Loft", None).unwrap();
        let own = event(&listing, EventSource::ChannelA, at(1, 0), at(3, 0));
        let other = event(&listing, EventSource::ChannelB, at(5, 0), at(7, 0))
            .with_guest_details(Some("Honeymoon".into()), Some("A. Lindqvist".into()));
        let mut manual = event(&listing, EventSource::Manual, at(8, 0), at(9, 0));
        manual.note = Some("plumber visit".to_string());

        let calendar =
            render_calendar(&listing, Channel::ChannelA, &[other.clone(), manual, own.clone()])
                .unwrap();

        assert!(calendar.starts_with("BEGIN:VCALENDAR\r\nVERSION:2.0\r\n"));
        assert!(calendar.ends_with("END:VCALENDAR\r\n"));
        assert!(!calendar.contains("plumber"));
        assert!(!calendar.contains("Honeymoon"));
        assert!(!calendar.contains("Lindqvist"));

        let events = vevents(&calendar);
        assert_eq!(events.len(), 3);
        assert!(events[0].contains(&format!("UID:{}@staysync\r\n", own.id)));
        assert!(events[0].contains("DTSTART;VALUE=DATE:20240601\r\n"));
        assert!(events[0].contains("DTEND;VALUE=DATE:20240603\r\n"));
        assert!(events[0].contains("SUMMARY:Reserved\r\n"));
        assert!(events[0].contains("DTSTAMP:20240520T083000Z\r\n"));
        assert!(events[1].contains(&format!("UID:{}@staysync\r\n", other.id)));
        assert!(events[1].contains("SUMMARY:Not available\r\n"));
        assert!(events[2].contains("SUMMARY:Not available\r\n"));
    }

    #[test]
    fn skips_shadowed_and_cancelled() {
        let listing = Listing::new("Loft", None).unwrap();
        let mut shadowed = event(&listing, EventSource::ChannelB, at(1, 0), at(3, 0));
        shadowed.status = EventStatus::Shadowed;
        let mut cancelled = event(&listing, EventSource::Manual, at(4, 0), at(5, 0));
        cancelled.status = EventStatus::Cancelled;

        let calendar =
            render_calendar(&listing, Channel::ChannelA, &[shadowed, cancelled]).unwrap();
        assert!(vevents(&calendar).is_empty());
    }

    #[test]
    fn dates_follow_listing_timezone() {
        let listing = Listing::new("Harbour", Some("Pacific/Auckland")).unwrap();
        // 2024-06-01 13:00 UTC is 2024-06-02 01:00 in Auckland (UTC+12)
        let stay = event(&listing, EventSource::ChannelB, at(1, 13), at(3, 13));
        let calendar = render_calendar(&listing, Channel::ChannelB, &[stay]).unwrap();

        assert!(calendar.contains("DTSTART;VALUE=DATE:20240602\r\n"));
        assert!(calendar.contains("DTEND;VALUE=DATE:20240604\r\n"));
        assert!(calendar.contains("X-WR-TIMEZONE:Pacific/Auckland\r\n"));
    }

    #[test]
    fn short_events_span_at_least_one_day() {
        let listing = Listing::new("Loft", None).unwrap();
        let visit = event(&listing, EventSource::Manual, at(4, 9), at(4, 11));
        let calendar = render_calendar(&listing, Channel::ChannelA, &[visit]).unwrap();

        assert!(calendar.contains("DTSTART;VALUE=DATE:20240604\r\n"));
        assert!(calendar.contains("DTEND;VALUE=DATE:20240605\r\n"));
    }

    #[test]
    fn long_names_are_escaped_and_folded() {
        let name = format!("Seaside; cottage, {}", "é".repeat(60));
        let listing = Listing::new(&name, None).unwrap();
        let calendar = render_calendar(&listing, Channel::ChannelA, &[]).unwrap();

        for line in calendar.split("\r\n") {
            assert!(line.len() <= MAX_LINE_OCTETS, "line too long: {line}");
        }
        let unfolded = calendar.replace("\r\n ", "");
        assert!(unfolded.contains("X-WR-CALNAME:Seaside\\; cottage\\, é"));
    }

    struct Fixture {
        db: Database,
        signer: TokenSigner,
        listing: Listing,
        token_a: String,
        token_b: String,
        link_a: ChannelLinkId,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let signer = TokenSigner::new(SECRET).unwrap();
        let listing = Listing::new("Room 7", None).unwrap();
        let mut tokens = Vec::new();
        db.write(|store| {
            store.insert_listing(&listing)?;
            tokens.clear();
            for channel in Channel::ALL {
                let id = ChannelLinkId::new();
                let token = signer.sign(id);
                store.insert_channel_link(&ChannelLink {
                    id,
                    listing_id: listing.id,
                    channel,
                    export_token: token.clone(),
                    active: true,
                    created_at: crate::util::now(),
                })?;
                tokens.push((id, token));
            }
            Ok(())
        })
        .unwrap();
        let (link_a, token_a) = tokens[0].clone();
        let (_, token_b) = tokens[1].clone();
        Fixture {
            db,
            signer,
            listing,
            token_a,
            token_b,
            link_a,
        }
    }

    impl Fixture {
        fn feed(&self, token: &str) -> Result<String> {
            self.db
                .read(|store| compose_feed(store, &self.signer, token))
        }

        fn import(&self, source: EventSource, uid: &str, start: &str, end: &str) -> Event {
            let payload = ImportPayload {
                source,
                external_uid: uid.to_string(),
                start: start.to_string(),
                end: end.to_string(),
                summary: None,
                guest_name: None,
            };
            self.db
                .write_listing(self.listing.id, |store| {
                    import_event(store, self.listing.id, &payload)
                })
                .unwrap()
                .event
        }
    }

    #[test]
    fn resolved_loser_leaves_every_feed() {
        let fx = fixture();
        let a = fx.import(EventSource::ChannelA, "A-1", "2024-06-01", "2024-06-03");
        let b = fx.import(EventSource::ChannelB, "B-1", "2024-06-02", "2024-06-04");
        let a_uid = format!("UID:{}@staysync", a.id);
        let b_uid = format!("UID:{}@staysync", b.id);

        // Unresolved conflicts keep both events visible
        let before = fx.feed(&fx.token_a).unwrap();
        assert!(before.contains(&a_uid) && before.contains(&b_uid));

        let conflict = fx
            .db
            .read(|store| store.find_open_conflict(a.id, b.id))
            .unwrap()
            .unwrap();
        fx.db
            .write_listing(fx.listing.id, |store| {
                resolve_conflict(store, conflict.id, a.id, None)
            })
            .unwrap();

        let feed_a = fx.feed(&fx.token_a).unwrap();
        assert!(feed_a.contains(&a_uid));
        assert!(!feed_a.contains(&b_uid));
        assert!(feed_a.contains("SUMMARY:Reserved"));

        let feed_b = fx.feed(&fx.token_b).unwrap();
        assert!(feed_b.contains(&a_uid));
        assert!(!feed_b.contains(&b_uid));
        assert!(feed_b.contains("SUMMARY:Not available"));
        assert!(!feed_b.contains("SUMMARY:Reserved"));
    }

    #[test]
    fn feed_is_byte_identical_without_changes() {
        let fx = fixture();
        fx.import(EventSource::ChannelA, "A-1", "2024-06-01", "2024-06-03");
        fx.import(EventSource::ChannelB, "B-1", "2024-06-10", "2024-06-12");

        let first = fx.feed(&fx.token_a).unwrap();
        let second = fx.feed(&fx.token_a).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cancelled_events_disappear() {
        let fx = fixture();
        let a = fx.import(EventSource::ChannelA, "A-1", "2024-06-01", "2024-06-03");
        fx.db
            .write_listing(fx.listing.id, |store| cancel_event(store, a.id))
            .unwrap();
        let feed = fx.feed(&fx.token_b).unwrap();
        assert!(!feed.contains(&a.id.to_string()));
    }

    #[test]
    fn bad_or_revoked_tokens_are_auth_errors() {
        let fx = fixture();
        let forged = TokenSigner::new("another-secret-another-secret-xx!")
            .unwrap()
            .sign(fx.link_a);
        assert!(matches!(fx.feed(&forged), Err(Error::Auth(_))));
        assert!(matches!(fx.feed("garbage"), Err(Error::Auth(_))));

        // Valid signature for a link that was never stored
        let unknown = fx.signer.sign(ChannelLinkId::new());
        assert!(matches!(fx.feed(&unknown), Err(Error::Auth(_))));

        fx.db
            .write(|store| store.set_channel_link_active(fx.link_a, false))
            .unwrap();
        assert!(matches!(fx.feed(&fx.token_a), Err(Error::Auth(_))));
        assert!(fx.feed(&fx.token_b).is_ok());

        fx.db
            .write(|store| store.set_listing_active(fx.listing.id, false))
            .unwrap();
        assert!(matches!(fx.feed(&fx.token_b), Err(Error::Auth(_))));
    }
}
