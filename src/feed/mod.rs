//! Feed ingestion: fetching, parsing, date handling, and orchestration.
//!
//! The pipeline runs fetch → parse → date-filter per configured URL:
//!
//! - [`dates`] - permissive multi-format date parsing to UTC
//! - [`fetcher`] - HTTP retrieval with header-profile rotation and backoff
//! - [`parser`] - dual-dialect XML parsing with a lenient recovery pass
//! - [`reader`] - per-run orchestration, skip rules, filtering, sorting
//! - [`diagnostics`] - standalone per-feed probe reports
//!
//! Feeds are operated by third parties and are routinely malformed,
//! mislabeled, or hostile to unfamiliar clients; every layer here is
//! built to contain a single feed's failure rather than propagate it.

pub mod dates;
pub mod diagnostics;
pub mod fetcher;
pub mod parser;
pub mod reader;

use chrono::{DateTime, Utc};

pub use dates::parse_date;
pub use fetcher::{FeedFetcher, FetchError, HeaderProfile, HEADER_PROFILES};
pub use parser::{parse_feed, ParseOutcome};
pub use reader::{FeedReader, RunReport, RunStats};

/// Sentinel title for items whose source omits one.
pub const NO_TITLE: &str = "No Title";

/// A single article extracted from a feed. Immutable after
/// construction; `summary` is filled in later by the summarizer, never
/// by the feed layer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FeedItem {
    /// Article headline; [`NO_TITLE`] when the source omits one.
    pub title: String,
    /// Plain-text body with HTML stripped; falls back to the title.
    pub description: String,
    /// Canonical article URL; empty when the source omits it.
    pub link: String,
    /// UTC publication instant; `None` when no date field parsed.
    /// Items with `None` survive parsing (diagnostics report them) but
    /// never pass a date-range filter.
    pub published_at: Option<DateTime<Utc>>,
    /// Human-readable feed title, or the feed URL as fallback.
    pub source: String,
    /// AI-generated summary, absent at fetch time.
    pub summary: Option<String>,
}

/// Which syndication dialect a document turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Dialect {
    Rss,
    Atom,
    Unknown,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Rss => write!(f, "RSS"),
            Dialect::Atom => write!(f, "Atom"),
            Dialect::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Runtime classification of a configured feed URL, consulted before
/// any fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceClass {
    Normal,
    /// Known to reject all client identities; fetching wastes attempts.
    KnownBlocked,
    /// Reachable but permanently yields zero items.
    KnownEmpty,
}
