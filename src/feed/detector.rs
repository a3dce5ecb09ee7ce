//! Change detection between a stored fingerprint and a parsed document.

use chrono::{DateTime, Utc};

use super::types::ParsedFeed;

/// Decide whether a parsed document carries new content.
///
/// A document without a modification timestamp always counts as changed.
/// Otherwise any difference from the stored fingerprint counts, including a
/// timestamp that moved backwards.
pub fn has_changed(stored: Option<DateTime<Utc>>, parsed: &ParsedFeed) -> bool {
    match parsed.modified_at {
        None => true,
        Some(modified_at) => stored != Some(modified_at),
    }
}
