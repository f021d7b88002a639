//! Shared utility functions used across multiple modules.

use chrono::{DateTime, SubsecRound, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Current time at the millisecond precision used for storage.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
