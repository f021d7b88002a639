//! Database connection management

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};

use super::migrations;
use super::repository::SqliteEventStore;
use crate::error::Result;
use crate::models::ListingId;

/// Pause before the single retry of a transaction that hit a lock
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// How long `SQLite` waits on a competing writer before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Database wrapper owning the `SQLite` connection
///
/// All access goes through one connection guarded by a mutex, so writers
/// never interleave inside this process. The lock is process-wide: writes
/// to different listings queue behind each other and reads wait for an
/// in-flight write. Each write runs as a `BEGIN IMMEDIATE` transaction,
/// which also serializes against other processes sharing the database file.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run read-only work against a consistent snapshot
    pub fn read<T>(&self, work: impl FnOnce(&SqliteEventStore<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = work(&SqliteEventStore::new(&tx))?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a write that is not tied to a single listing (e.g. creating one)
    pub fn write<T>(&self, work: impl FnMut(&SqliteEventStore<'_>) -> Result<T>) -> Result<T> {
        self.transact(None, work)
    }

    /// Run a conflict-producing unit of work for one listing atomically
    ///
    /// Insert, detect and record steps executed by `work` commit together or
    /// not at all. `listing_id` only labels the transaction in logs; the
    /// exclusion itself comes from the connection lock. A transient lock failure is retried once after a short
    /// backoff; any other error rolls back and is returned as is.
    pub fn write_listing<T>(
        &self,
        listing_id: ListingId,
        work: impl FnMut(&SqliteEventStore<'_>) -> Result<T>,
    ) -> Result<T> {
        self.transact(Some(listing_id), work)
    }

    fn transact<T>(
        &self,
        listing_id: Option<ListingId>,
        mut work: impl FnMut(&SqliteEventStore<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock();
        let mut retried = false;
        loop {
            match run_immediate(&mut conn, &mut work) {
                Err(err) if err.is_transient() && !retried => {
                    tracing::warn!(
                        listing = ?listing_id,
                        error = %err,
                        "Transaction hit a lock, retrying once"
                    );
                    retried = true;
                    std::thread::sleep(RETRY_BACKOFF);
                }
                result => return result,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction drops the transaction, which rolls it back,
        // so the connection itself is still usable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_immediate<T>(
    conn: &mut Connection,
    work: &mut impl FnMut(&SqliteEventStore<'_>) -> Result<T>,
) -> Result<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = work(&SqliteEventStore::new(&tx))?;
    tx.commit()?;
    Ok(value)
}

/// Configure `SQLite` pragmas
fn configure(conn: &Connection) -> Result<()> {
    // WAL is unavailable for in-memory databases; the pragma then reports
    // "memory" and is harmless.
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .ok();
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
