//! Database layer for staysync

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{ConflictFilter, EventStore, SqliteEventStore};
