//! Feed sources.
//!
//! A [`FeedSource`] turns a URL into a [`FetchOutcome`]. It never returns an
//! error: unreachable hosts and unusable documents are outcomes that the
//! validator and the orchestrator act upon.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Link;
use feed_rs::parser;
use reqwest::header::LAST_MODIFIED;
use reqwest::Client;
use tracing::debug;

use super::types::{Channel, ParsedFeed, ParsedItem};
use crate::config::FetchConfig;
use crate::{FeedsyncError, Result};

/// Result of fetching a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The document was retrieved and parsed.
    Parsed(ParsedFeed),
    /// The source answered, but not with a usable feed document.
    Malformed(String),
    /// The source could not be reached (connection failure, timeout).
    Unreachable(String),
}

impl FetchOutcome {
    /// Short description for logs and stored errors.
    pub fn describe(&self) -> String {
        match self {
            FetchOutcome::Parsed(parsed) => format!("parsed {} item(s)", parsed.items.len()),
            FetchOutcome::Malformed(reason) => format!("malformed document: {reason}"),
            FetchOutcome::Unreachable(reason) => format!("unreachable: {reason}"),
        }
    }
}

/// Something that can fetch feed documents.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the document at `url`.
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// HTTP feed source with timeouts, a redirect limit and a size cap.
pub struct HttpFeedSource {
    client: Client,
    max_feed_size: u64,
    allow_private_hosts: bool,
}

impl HttpFeedSource {
    /// Create a source from the fetch configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FeedsyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    async fn download(&self, url: &str) -> std::result::Result<(Vec<u8>, Option<DateTime<Utc>>), FetchOutcome> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchOutcome::Unreachable(describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchOutcome::Malformed(format!("HTTP status {status}")));
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        if let Some(length) = response.content_length() {
            if length > self.max_feed_size {
                return Err(FetchOutcome::Malformed(too_large(length, self.max_feed_size)));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchOutcome::Unreachable(describe_request_error(&e)))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_feed_size {
                return Err(FetchOutcome::Malformed(too_large(
                    body.len() as u64,
                    self.max_feed_size,
                )));
            }
        }

        Ok((body, last_modified))
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        if let Err(e) = validate_url(url, self.allow_private_hosts) {
            return FetchOutcome::Unreachable(e.to_string());
        }

        let (body, last_modified) = match self.download(url).await {
            Ok(downloaded) => downloaded,
            Err(outcome) => return outcome,
        };
        debug!(url, bytes = body.len(), "downloaded feed document");

        match parse_document(&body, last_modified) {
            Ok(parsed) => FetchOutcome::Parsed(parsed),
            Err(e) => FetchOutcome::Malformed(e.to_string()),
        }
    }
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {e}")
    } else {
        e.to_string()
    }
}

fn too_large(size: u64, max: u64) -> String {
    format!("feed too large: {size} bytes (max {max} bytes)")
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an RSS, Atom or JSON Feed document.
///
/// `last_modified` is the transport-level modification time; when present it
/// takes precedence over the channel timestamps as the change fingerprint.
/// Entries without their own identifier get an empty guid.
pub fn parse_document(bytes: &[u8], last_modified: Option<DateTime<Utc>>) -> Result<ParsedFeed> {
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| FeedsyncError::Malformed(format!("failed to parse feed: {e}")))?;

    let channel = Channel {
        title: feed.title.map(|t| t.content.trim().to_string()),
        link: site_link(&feed.links),
        description: feed.description.map(|d| d.content.trim().to_string()),
    };

    let items = feed
        .entries
        .into_iter()
        .map(|entry| ParsedItem {
            guid: entry.id.trim().to_string(),
            title: entry.title.map(|t| t.content.trim().to_string()),
            link: entry.links.first().map(|l| l.href.clone()),
            description: entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body)),
            published_at: entry.published,
        })
        .collect();

    Ok(ParsedFeed {
        channel,
        modified_at: last_modified.or(feed.updated).or(feed.published),
        items,
    })
}

/// Pick the website link of a channel, skipping Atom `rel="self"` links.
fn site_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

/// Check that a URL can be followed.
///
/// Only http and https are accepted and a host is required. Unless
/// `allow_private_hosts` is set, loopback, private and link-local addresses
/// and internal host names are refused.
pub fn validate_url(url: &str, allow_private_hosts: bool) -> Result<url::Url> {
    let parsed = url::Url::parse(url).map_err(|e| FeedsyncError::InvalidUrl(format!("{url}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FeedsyncError::InvalidUrl(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host()
        .ok_or_else(|| FeedsyncError::InvalidUrl(format!("{url}: missing host")))?;

    if allow_private_hosts {
        return Ok(parsed);
    }

    let refused = match host {
        url::Host::Domain(domain) => is_internal_hostname(domain),
        url::Host::Ipv4(ip) => is_private_ip(&IpAddr::V4(ip)),
        url::Host::Ipv6(ip) => is_private_ip(&IpAddr::V6(ip)),
    };
    if refused {
        return Err(FeedsyncError::InvalidUrl(format!("private host refused: {host}")));
    }

    Ok(parsed)
}

fn is_internal_hostname(host: &str) -> bool {
    const SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".lan", ".home"];
    let host = host.to_ascii_lowercase();
    host == "localhost" || SUFFIXES.iter().any(|s| host.ends_with(s))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link-local
        }
    }
}
