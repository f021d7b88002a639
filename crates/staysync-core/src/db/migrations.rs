//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Migration to version 1: listings, channel links, events, conflicts
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            timezone TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_links (
            id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL REFERENCES listings(id),
            channel TEXT NOT NULL CHECK (channel IN ('CHANNEL_A', 'CHANNEL_B')),
            export_token TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );
        -- One active link per (listing, channel)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_links_active
            ON channel_links(listing_id, channel) WHERE active = 1;

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL REFERENCES listings(id),
            source TEXT NOT NULL CHECK (source IN ('CHANNEL_A', 'CHANNEL_B', 'MANUAL')),
            external_uid TEXT,
            start_at INTEGER NOT NULL,
            end_at INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'SHADOWED', 'CANCELLED')),
            note TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (start_at < end_at),
            CHECK ((source = 'MANUAL') = (external_uid IS NULL))
        );
        CREATE INDEX IF NOT EXISTS idx_events_listing_status
            ON events(listing_id, status, start_at);
        -- Only one live (active or shadowed) event per external reservation
        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_live_uid
            ON events(listing_id, source, external_uid)
            WHERE external_uid IS NOT NULL AND status IN ('ACTIVE', 'SHADOWED');

        CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL REFERENCES listings(id),
            event_a_id TEXT NOT NULL REFERENCES events(id),
            event_b_id TEXT NOT NULL REFERENCES events(id),
            pair_key TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('OPEN', 'RESOLVED')),
            winner_event_id TEXT REFERENCES events(id),
            resolution_note TEXT,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER,
            CHECK (event_a_id <> event_b_id)
        );
        CREATE INDEX IF NOT EXISTS idx_conflicts_listing
            ON conflicts(listing_id, status, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_conflicts_event_a ON conflicts(event_a_id);
        CREATE INDEX IF NOT EXISTS idx_conflicts_event_b ON conflicts(event_b_id);
        -- At most one open conflict per unordered event pair
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_open_pair
            ON conflicts(pair_key) WHERE status = 'OPEN';

        INSERT INTO schema_version (version) VALUES (1);",
    )?;

    tx.commit()?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: operator-facing guest details on events
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "ALTER TABLE events ADD COLUMN summary TEXT;
        ALTER TABLE events ADD COLUMN guest_name TEXT;

        INSERT INTO schema_version (version) VALUES (2);",
    )?;

    tx.commit()?;

    tracing::info!("Migrated database to version 2");
    Ok(())
}
