//! Standalone feed health probing.
//!
//! The digest pipeline deliberately swallows per-feed failures; when a
//! feed goes quiet the operator needs a tool that reports *why*. The
//! probe fetches each URL once through the normal fetcher, parses it,
//! and records which client identity worked, which parsing strategy
//! matched, what date formats the feed emits, and a few sample items.
//! The aggregate summary is what gets printed (as JSON) by the
//! `--diagnose` mode.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::feed::fetcher::{FeedFetcher, HEADER_PROFILES};
use crate::feed::{parser, Dialect};

/// How many items a probe keeps as samples.
const SAMPLE_ITEMS: usize = 3;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SampleItem {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Everything learned about one feed URL.
#[derive(Debug, serde::Serialize)]
pub struct FeedProbe {
    pub url: String,
    /// Whether any fetch attempt produced a response body.
    pub accessible: bool,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub feed_type: Dialect,
    pub items_found: usize,
    pub sample_items: Vec<SampleItem>,
    /// Distinct date-format classifications seen in the document.
    pub date_formats: Vec<String>,
    /// Name of the header profile that got through, when one did.
    pub working_profile: Option<String>,
    /// Item-location strategy that matched, when one did.
    pub parsing_strategy: Option<String>,
    pub error: Option<String>,
}

/// Aggregate over a full probe run.
#[derive(Debug, serde::Serialize)]
pub struct DiagnosticsSummary {
    pub total_feeds: usize,
    pub accessible: usize,
    pub with_items: usize,
    /// Fraction of feeds that were accessible and yielded items.
    pub success_rate: f64,
    pub feed_types: BTreeMap<String, usize>,
    pub parsing_strategies: BTreeMap<String, usize>,
    pub working_profiles: BTreeMap<String, usize>,
    /// Feeds where every fetch attempt failed.
    pub blocked_urls: Vec<String>,
    /// Feeds that responded but yielded zero items.
    pub empty_urls: Vec<String>,
    pub working_urls: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct DiagnosticsReport {
    pub probes: Vec<FeedProbe>,
    pub summary: DiagnosticsSummary,
}

pub struct FeedDiagnostics {
    fetcher: FeedFetcher,
    concurrency: usize,
}

impl FeedDiagnostics {
    pub fn new(fetcher: FeedFetcher, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Probes every URL and aggregates the results. Probe order in the
    /// report matches input order.
    pub async fn run(&self, urls: &[String]) -> DiagnosticsReport {
        let probes: Vec<FeedProbe> = stream::iter(urls.iter())
            .map(|url| self.probe(url))
            .buffered(self.concurrency)
            .collect()
            .await;
        let summary = summarize(&probes);
        DiagnosticsReport { probes, summary }
    }

    /// Probes a single feed URL through the normal fetch/parse path.
    pub async fn probe(&self, url: &str) -> FeedProbe {
        let fetched = match self.fetcher.fetch(url).await {
            Ok(f) => f,
            Err(e) => {
                return FeedProbe {
                    url: url.to_string(),
                    accessible: false,
                    status_code: None,
                    content_type: None,
                    feed_type: Dialect::Unknown,
                    items_found: 0,
                    sample_items: Vec::new(),
                    date_formats: Vec::new(),
                    working_profile: None,
                    parsing_strategy: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let outcome = parser::parse_feed(&fetched.body, url);

        let mut date_formats: Vec<String> = outcome
            .date_samples
            .iter()
            .map(|raw| classify_date_format(raw).to_string())
            .collect();
        date_formats.sort();
        date_formats.dedup();

        let sample_items = outcome
            .items
            .iter()
            .take(SAMPLE_ITEMS)
            .map(|item| SampleItem {
                title: item.title.clone(),
                link: item.link.clone(),
                published_at: item.published_at,
            })
            .collect();

        FeedProbe {
            url: url.to_string(),
            accessible: true,
            status_code: Some(fetched.status),
            content_type: fetched.content_type,
            feed_type: outcome.dialect,
            items_found: outcome.items.len(),
            sample_items,
            date_formats,
            working_profile: Some(HEADER_PROFILES[fetched.profile_index].name.to_string()),
            parsing_strategy: outcome.strategy.map(str::to_string),
            error: outcome.failure,
        }
    }
}

fn summarize(probes: &[FeedProbe]) -> DiagnosticsSummary {
    let mut feed_types = BTreeMap::new();
    let mut parsing_strategies = BTreeMap::new();
    let mut working_profiles = BTreeMap::new();
    let mut blocked_urls = Vec::new();
    let mut empty_urls = Vec::new();
    let mut working_urls = Vec::new();

    for probe in probes {
        if !probe.accessible {
            blocked_urls.push(probe.url.clone());
            continue;
        }
        *feed_types
            .entry(probe.feed_type.to_string())
            .or_insert(0usize) += 1;
        if let Some(strategy) = &probe.parsing_strategy {
            *parsing_strategies.entry(strategy.clone()).or_insert(0usize) += 1;
        }
        if let Some(profile) = &probe.working_profile {
            *working_profiles.entry(profile.clone()).or_insert(0usize) += 1;
        }
        if probe.items_found == 0 {
            empty_urls.push(probe.url.clone());
        } else {
            working_urls.push(probe.url.clone());
        }
    }

    let total_feeds = probes.len();
    let accessible = total_feeds - blocked_urls.len();
    let with_items = working_urls.len();
    let success_rate = if total_feeds == 0 {
        0.0
    } else {
        with_items as f64 / total_feeds as f64
    };

    DiagnosticsSummary {
        total_feeds,
        accessible,
        with_items,
        success_rate,
        feed_types,
        parsing_strategies,
        working_profiles,
        blocked_urls,
        empty_urls,
        working_urls,
    }
}

/// Names the format family a raw date string belongs to. Mirrors the
/// ladder in [`crate::feed::dates`] but reports the rung instead of the
/// parsed value.
pub fn classify_date_format(raw: &str) -> &'static str {
    let raw = raw.trim();
    if raw.is_empty() {
        return "empty";
    }
    if DateTime::parse_from_rfc2822(raw).is_ok() {
        return "rfc2822";
    }
    if NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ").is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ").is_ok()
    {
        return "iso8601_utc";
    }
    if DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z").is_ok()
        || DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z").is_ok()
    {
        return "iso8601_offset";
    }
    if NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").is_ok() {
        return "datetime_space";
    }
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(raw, "%d %b %Y").is_ok()
    {
        return "date_only";
    }
    "unrecognized"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn diagnostics() -> FeedDiagnostics {
        let config = FetchConfig {
            max_retries: 1,
            request_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(5),
            max_body_bytes: 1024 * 1024,
        };
        FeedDiagnostics::new(FeedFetcher::new(reqwest::Client::new(), config), 2)
    }

    #[test]
    fn test_classify_date_format() {
        assert_eq!(
            classify_date_format("Fri, 23 May 2025 10:00:00 +0000"),
            "rfc2822"
        );
        assert_eq!(classify_date_format("2025-05-23T10:00:00Z"), "iso8601_utc");
        assert_eq!(
            classify_date_format("2025-05-23T10:00:00+02:00"),
            "iso8601_offset"
        );
        assert_eq!(
            classify_date_format("2025-05-23 10:00:00"),
            "datetime_space"
        );
        assert_eq!(classify_date_format("2025-05-23"), "date_only");
        assert_eq!(classify_date_format("whenever"), "unrecognized");
        assert_eq!(classify_date_format(""), "empty");
    }

    #[tokio::test]
    async fn test_probe_healthy_feed() {
        let server = MockServer::start().await;
        let body = "<rss><channel><title>T</title>\
            <item><title>A</title><link>https://example.com/a</link>\
            <pubDate>Fri, 23 May 2025 10:00:00 +0000</pubDate></item>\
            <item><title>B</title><link>https://example.com/b</link>\
            <pubDate>2025-05-23T11:00:00Z</pubDate></item>\
            </channel></rss>";
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("Content-Type", "text/xml"),
            )
            .mount(&server)
            .await;

        let probe = diagnostics().probe(&format!("{}/feed", server.uri())).await;
        assert!(probe.accessible);
        assert_eq!(probe.status_code, Some(200));
        assert_eq!(probe.feed_type, Dialect::Rss);
        assert_eq!(probe.items_found, 2);
        assert_eq!(probe.sample_items.len(), 2);
        assert_eq!(probe.working_profile.as_deref(), Some("browser"));
        assert_eq!(probe.parsing_strategy.as_deref(), Some("rss_deep_item"));
        assert_eq!(probe.date_formats, vec!["iso8601_utc", "rfc2822"]);
        assert!(probe.error.is_none());
    }

    #[tokio::test]
    async fn test_probe_unreachable_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let probe = diagnostics().probe(&format!("{}/feed", server.uri())).await;
        assert!(!probe.accessible);
        assert_eq!(probe.items_found, 0);
        assert!(probe.error.is_some());
    }

    #[tokio::test]
    async fn test_run_summary_buckets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<rss><channel><item><title>A</title></item></channel></rss>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss><channel></channel></rss>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blocked"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let urls = vec![
            format!("{}/good", server.uri()),
            format!("{}/empty", server.uri()),
            format!("{}/blocked", server.uri()),
        ];
        let report = diagnostics().run(&urls).await;

        assert_eq!(report.summary.total_feeds, 3);
        assert_eq!(report.summary.accessible, 2);
        assert_eq!(report.summary.with_items, 1);
        assert!((report.summary.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.summary.working_urls, vec![urls[0].clone()]);
        assert_eq!(report.summary.empty_urls, vec![urls[1].clone()]);
        assert_eq!(report.summary.blocked_urls, vec![urls[2].clone()]);
        assert_eq!(report.summary.feed_types.get("RSS"), Some(&2));
        // Probe order matches input order
        assert_eq!(report.probes[0].url, urls[0]);

        // The whole report serializes for --diagnose output
        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(json.contains("success_rate"));
    }
}
