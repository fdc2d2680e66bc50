use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};

use crate::config::ReaderConfig;
use crate::feed::fetcher::FeedFetcher;
use crate::feed::{parser, FeedItem, SourceClass};

/// Aggregate counters for one reading run. Every configured URL lands
/// in exactly one of `fetched`, `failed`, or `skipped`.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RunStats {
    pub feeds_total: usize,
    /// Feeds that returned a body we could hand to the parser.
    pub feeds_fetched: usize,
    /// Feeds where every fetch attempt failed.
    pub feeds_failed: usize,
    /// Feeds skipped before any network attempt (known-blocked or
    /// known-empty).
    pub feeds_skipped: usize,
    /// Items parsed across all feeds, before date filtering.
    pub items_parsed: usize,
    /// Items whose publication date fell inside the window.
    pub items_in_window: usize,
    /// Items carrying no parseable date; these never enter the window.
    pub items_undated: usize,
}

/// Everything one run produced: the filtered, sorted items plus the
/// stats and the exact window applied, so downstream rendering can
/// state what period the digest covers.
#[derive(Debug)]
pub struct RunReport {
    /// Items inside the window, sorted newest first.
    pub items: Vec<FeedItem>,
    pub stats: RunStats,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// URLs that failed every fetch attempt, with the error rendered.
    pub failures: Vec<(String, String)>,
}

/// Orchestrates one run over a list of feed URLs: skip classification,
/// bounded-concurrency fetching, parsing, date-window filtering, and a
/// global newest-first sort.
///
/// One misbehaving feed never affects another: each URL's fetch+parse
/// runs in its own future, and any failure is folded into the stats
/// instead of propagating.
pub struct FeedReader {
    fetcher: FeedFetcher,
    known_blocked: HashSet<String>,
    known_empty: HashSet<String>,
    concurrency: usize,
}

/// Per-feed result, private to the run loop.
enum FeedOutcome {
    Fetched { items: Vec<FeedItem> },
    Failed { url: String, error: String },
    Skipped,
}

impl FeedReader {
    pub fn new(fetcher: FeedFetcher, config: &ReaderConfig) -> Self {
        Self {
            fetcher,
            known_blocked: config.known_blocked.iter().cloned().collect(),
            known_empty: config.known_empty.iter().cloned().collect(),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Classifies a URL against the configured skip lists. Consulted
    /// before any fetch; a skipped feed costs zero network attempts.
    pub fn classify(&self, url: &str) -> SourceClass {
        if self.known_blocked.contains(url) {
            SourceClass::KnownBlocked
        } else if self.known_empty.contains(url) {
            SourceClass::KnownEmpty
        } else {
            SourceClass::Normal
        }
    }

    /// Reads all feeds with the window anchored at the current instant.
    pub async fn read(&self, urls: &[String], days: u32) -> RunReport {
        self.read_at(urls, days, Utc::now()).await
    }

    /// Reads all feeds against a rolling window of `days * 24h` ending
    /// at `now`. The explicit anchor exists so tests can pin the clock.
    pub async fn read_at(&self, urls: &[String], days: u32, now: DateTime<Utc>) -> RunReport {
        let window_start = now - Duration::hours(24 * i64::from(days));
        let window_end = now;

        tracing::info!(
            feeds = urls.len(),
            days = days,
            window_start = %window_start,
            window_end = %window_end,
            "Starting feed run"
        );

        let outcomes: Vec<FeedOutcome> = stream::iter(urls.iter())
            .map(|url| self.read_one(url))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut stats = RunStats {
            feeds_total: urls.len(),
            ..Default::default()
        };
        let mut failures = Vec::new();
        let mut items = Vec::new();

        for outcome in outcomes {
            match outcome {
                FeedOutcome::Fetched { items: parsed } => {
                    stats.feeds_fetched += 1;
                    stats.items_parsed += parsed.len();
                    for item in parsed {
                        match item.published_at {
                            Some(ts) if ts >= window_start && ts <= window_end => {
                                stats.items_in_window += 1;
                                items.push(item);
                            }
                            Some(_) => {}
                            None => stats.items_undated += 1,
                        }
                    }
                }
                FeedOutcome::Failed { url, error } => {
                    stats.feeds_failed += 1;
                    failures.push((url, error));
                }
                FeedOutcome::Skipped => stats.feeds_skipped += 1,
            }
        }

        // Newest first; undated items never reach this point. Ties keep
        // a stable order so repeated runs render identically.
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        tracing::info!(
            fetched = stats.feeds_fetched,
            failed = stats.feeds_failed,
            skipped = stats.feeds_skipped,
            in_window = stats.items_in_window,
            "Feed run complete"
        );

        RunReport {
            items,
            stats,
            window_start,
            window_end,
            failures,
        }
    }

    async fn read_one(&self, url: &str) -> FeedOutcome {
        match self.classify(url) {
            SourceClass::KnownBlocked => {
                tracing::debug!(url = %url, "Skipping known-blocked feed");
                return FeedOutcome::Skipped;
            }
            SourceClass::KnownEmpty => {
                tracing::debug!(url = %url, "Skipping known-empty feed");
                return FeedOutcome::Skipped;
            }
            SourceClass::Normal => {}
        }

        let fetched = match self.fetcher.fetch(url).await {
            Ok(f) => f,
            Err(e) => {
                return FeedOutcome::Failed {
                    url: url.to_string(),
                    error: e.to_string(),
                }
            }
        };

        let outcome = parser::parse_feed(&fetched.body, url);
        tracing::debug!(
            url = %url,
            dialect = %outcome.dialect,
            strategy = outcome.strategy.unwrap_or("none"),
            items = outcome.items.len(),
            "Feed parsed"
        );
        FeedOutcome::Fetched {
            items: outcome.items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetch_config() -> FetchConfig {
        FetchConfig {
            max_retries: 1,
            request_timeout: StdDuration::from_secs(5),
            backoff_base: StdDuration::from_millis(5),
            max_body_bytes: 1024 * 1024,
        }
    }

    fn reader_config() -> ReaderConfig {
        ReaderConfig {
            known_blocked: Vec::new(),
            known_empty: Vec::new(),
            concurrency: 4,
        }
    }

    fn reader(config: ReaderConfig) -> FeedReader {
        FeedReader::new(
            FeedFetcher::new(reqwest::Client::new(), fetch_config()),
            &config,
        )
    }

    fn rss_with_dates(dates: &[&str]) -> String {
        let items: String = dates
            .iter()
            .enumerate()
            .map(|(i, d)| {
                format!(
                    "<item><title>Item {i}</title><link>https://example.com/{i}</link>\
                     <pubDate>{d}</pubDate></item>"
                )
            })
            .collect();
        format!("<rss><channel><title>Test</title>{items}</channel></rss>")
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 24, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_window_filters_and_sorts_newest_first() {
        let server = MockServer::start().await;
        // Against a 1-day window ending at `fixed_now`: 25h ago falls
        // out, 23h and 1h ago stay in.
        let body = rss_with_dates(&[
            "Fri, 23 May 2025 11:00:00 +0000", // 25h ago
            "Fri, 23 May 2025 13:00:00 +0000", // 23h ago
            "Sat, 24 May 2025 11:00:00 +0000", // 1h ago
        ]);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let urls = vec![format!("{}/feed", server.uri())];
        let report = reader(reader_config()).read_at(&urls, 1, fixed_now()).await;

        assert_eq!(report.stats.items_parsed, 3);
        assert_eq!(report.stats.items_in_window, 2);
        assert_eq!(report.items.len(), 2);
        assert!(report.items[0].published_at > report.items[1].published_at);
        assert_eq!(report.items[0].title, "Item 2");
        assert_eq!(report.items[1].title, "Item 1");
    }

    #[tokio::test]
    async fn test_undated_items_counted_but_excluded() {
        let server = MockServer::start().await;
        let body = "<rss><channel>\
            <item><title>No date</title></item>\
            <item><title>Dated</title><pubDate>Sat, 24 May 2025 08:00:00 +0000</pubDate></item>\
            </channel></rss>";
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let urls = vec![format!("{}/feed", server.uri())];
        let report = reader(reader_config()).read_at(&urls, 1, fixed_now()).await;

        assert_eq!(report.stats.items_undated, 1);
        assert_eq!(report.stats.items_in_window, 1);
        assert_eq!(report.items.len(), 1);
    }

    #[tokio::test]
    async fn test_one_failing_feed_does_not_poison_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_with_dates(&[
                "Sat, 24 May 2025 08:00:00 +0000",
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let urls = vec![
            format!("{}/good", server.uri()),
            format!("{}/bad", server.uri()),
        ];
        let report = reader(reader_config()).read_at(&urls, 1, fixed_now()).await;

        assert_eq!(report.stats.feeds_fetched, 1);
        assert_eq!(report.stats.feeds_failed, 1);
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].0.ends_with("/bad"));
    }

    #[tokio::test]
    async fn test_skip_lists_cost_zero_requests() {
        let server = MockServer::start().await;
        // Any request at all fails the expectation
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let blocked = format!("{}/blocked", server.uri());
        let empty = format!("{}/empty", server.uri());
        let config = ReaderConfig {
            known_blocked: vec![blocked.clone()],
            known_empty: vec![empty.clone()],
            concurrency: 2,
        };
        let urls = vec![blocked, empty];
        let report = reader(config).read_at(&urls, 1, fixed_now()).await;

        assert_eq!(report.stats.feeds_skipped, 2);
        assert_eq!(report.stats.feeds_fetched, 0);
        assert_eq!(report.stats.feeds_failed, 0);
    }

    #[tokio::test]
    async fn test_classify() {
        let config = ReaderConfig {
            known_blocked: vec!["https://a.example/feed".into()],
            known_empty: vec!["https://b.example/feed".into()],
            concurrency: 1,
        };
        let r = reader(config);
        assert_eq!(r.classify("https://a.example/feed"), SourceClass::KnownBlocked);
        assert_eq!(r.classify("https://b.example/feed"), SourceClass::KnownEmpty);
        assert_eq!(r.classify("https://c.example/feed"), SourceClass::Normal);
    }

    #[tokio::test]
    async fn test_window_boundaries_inclusive() {
        let server = MockServer::start().await;
        // Exactly at window start (now - 24h) and exactly at now
        let body = rss_with_dates(&[
            "Fri, 23 May 2025 12:00:00 +0000",
            "Sat, 24 May 2025 12:00:00 +0000",
        ]);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let urls = vec![format!("{}/feed", server.uri())];
        let report = reader(reader_config()).read_at(&urls, 1, fixed_now()).await;
        assert_eq!(report.stats.items_in_window, 2);
    }
}
