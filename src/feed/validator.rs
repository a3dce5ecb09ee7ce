//! Acceptance rules for parsed feeds.
//!
//! All checks are synchronous and deterministic. A rejection applies to the
//! content of one fetch, never to the feed going forward.

use thiserror::Error;

use super::fetcher::FetchOutcome;
use super::types::ParsedFeed;

/// Reason a parsed feed was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// The fetch failed or the channel metadata is incomplete.
    #[error("invalid feed")]
    InvalidFeed,

    /// The document has no entries.
    #[error("feed has no items")]
    NoItems,

    /// An entry has neither a title nor a description.
    #[error("feed has invalid item(s)")]
    InvalidItems,

    /// An entry has no identifier.
    #[error("guid is missing in some items")]
    MissingGuid,
}

impl ValidationError {
    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidFeed => "invalid_feed",
            ValidationError::NoItems => "no_items",
            ValidationError::InvalidItems => "invalid_items",
            ValidationError::MissingGuid => "missing_guid",
        }
    }
}

/// Validate the result of a fetch, returning the parsed feed when accepted.
pub fn validate_fetch(outcome: &FetchOutcome) -> Result<&ParsedFeed, ValidationError> {
    match outcome {
        FetchOutcome::Parsed(parsed) => {
            validate(parsed)?;
            Ok(parsed)
        }
        FetchOutcome::Malformed(_) | FetchOutcome::Unreachable(_) => {
            Err(ValidationError::InvalidFeed)
        }
    }
}

/// Validate a parsed feed. The first violated rule wins.
pub fn validate(parsed: &ParsedFeed) -> Result<(), ValidationError> {
    let channel = &parsed.channel;
    if !present(&channel.title) || !present(&channel.link) || !present(&channel.description) {
        return Err(ValidationError::InvalidFeed);
    }

    if parsed.items.is_empty() {
        return Err(ValidationError::NoItems);
    }

    // Entries are checked in document order; the first bad entry decides.
    for item in &parsed.items {
        if !present(&item.title) && !present(&item.description) {
            return Err(ValidationError::InvalidItems);
        }
        if item.guid.trim().is_empty() {
            return Err(ValidationError::MissingGuid);
        }
    }

    Ok(())
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::{Channel, ParsedItem};

    fn valid_feed() -> ParsedFeed {
        ParsedFeed::new("Title", "https://example.com", "Description")
            .with_item(ParsedItem::new("1").with_title("First"))
            .with_item(ParsedItem::new("2").with_description("Second body"))
    }

    #[test]
    fn test_valid_feed_accepted() {
        assert_eq!(validate(&valid_feed()), Ok(()));
    }

    #[test]
    fn test_missing_channel_fields() {
        for field in ["title", "link", "description"] {
            let mut feed = valid_feed();
            match field {
                "title" => feed.channel.title = None,
                "link" => feed.channel.link = Some(String::new()),
                _ => feed.channel.description = Some("   ".to_string()),
            }
            assert_eq!(
                validate(&feed),
                Err(ValidationError::InvalidFeed),
                "missing {field}"
            );
        }
    }

    #[test]
    fn test_channel_checked_before_items() {
        let feed = ParsedFeed {
            channel: Channel::default(),
            ..ParsedFeed::default()
        };
        assert_eq!(validate(&feed), Err(ValidationError::InvalidFeed));
    }

    #[test]
    fn test_no_items() {
        let feed = ParsedFeed::new("Title", "https://example.com", "Description");
        assert_eq!(validate(&feed), Err(ValidationError::NoItems));
    }

    #[test]
    fn test_item_without_title_and_description() {
        let feed = valid_feed().with_item(ParsedItem::new("3").with_link("https://example.com/3"));
        assert_eq!(validate(&feed), Err(ValidationError::InvalidItems));
    }

    #[test]
    fn test_all_items_invalid() {
        let feed = ParsedFeed::new("Title", "https://example.com", "Description")
            .with_item(ParsedItem::new("1"))
            .with_item(ParsedItem::new("2"));
        assert_eq!(validate(&feed), Err(ValidationError::InvalidItems));
    }

    #[test]
    fn test_missing_guid() {
        let feed = valid_feed().with_item(ParsedItem::new("").with_title("No id"));
        assert_eq!(validate(&feed), Err(ValidationError::MissingGuid));
    }

    #[test]
    fn test_first_bad_entry_decides() {
        let guid_first = valid_feed()
            .with_item(ParsedItem::new("").with_title("No id"))
            .with_item(ParsedItem::new("4"));
        assert_eq!(validate(&guid_first), Err(ValidationError::MissingGuid));

        let content_first = valid_feed()
            .with_item(ParsedItem::new("3"))
            .with_item(ParsedItem::new("").with_title("No id"));
        assert_eq!(validate(&content_first), Err(ValidationError::InvalidItems));
    }

    #[test]
    fn test_entry_without_content_or_guid_is_invalid_item() {
        let feed = valid_feed().with_item(ParsedItem::new(""));
        assert_eq!(validate(&feed), Err(ValidationError::InvalidItems));
    }

    #[test]
    fn test_validate_fetch() {
        let parsed = FetchOutcome::Parsed(valid_feed());
        assert!(validate_fetch(&parsed).is_ok());

        let malformed = FetchOutcome::Malformed("not xml".to_string());
        assert_eq!(validate_fetch(&malformed), Err(ValidationError::InvalidFeed));

        let unreachable = FetchOutcome::Unreachable("timed out".to_string());
        assert_eq!(validate_fetch(&unreachable), Err(ValidationError::InvalidFeed));

        let empty = FetchOutcome::Parsed(ParsedFeed::new("T", "https://example.com", "D"));
        assert_eq!(validate_fetch(&empty), Err(ValidationError::NoItems));
    }

    #[test]
    fn test_codes() {
        assert_eq!(ValidationError::InvalidFeed.code(), "invalid_feed");
        assert_eq!(ValidationError::NoItems.code(), "no_items");
        assert_eq!(ValidationError::InvalidItems.code(), "invalid_items");
        assert_eq!(ValidationError::MissingGuid.code(), "missing_guid");
    }
}
