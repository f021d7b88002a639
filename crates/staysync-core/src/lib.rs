//! staysync-core - Core library for StaySync
//!
//! Keeps one listing's availability consistent across two booking channels
//! and staff-entered blocks. Channel reservations come in through
//! [`import`], overlapping bookings are detected as conflicts, an operator
//! resolves them, and each channel pulls an iCalendar [`feed`] that shows
//! everything else as blocked time.
//!
//! [`SyncEngine`] is the entry point used by the HTTP API.

pub mod db;
pub mod detect;
pub mod engine;
pub mod error;
pub mod feed;
pub mod import;
pub mod models;
pub mod resolve;
pub mod token;
pub mod util;

pub use engine::{AuditReport, SyncEngine};
pub use error::{Error, ErrorKind, Result};
pub use import::{BlockPayload, ImportOutcome, ImportPayload, ImportResult};
pub use resolve::Resolution;
pub use token::TokenSigner;
