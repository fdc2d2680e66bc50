use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::config::FetchConfig;

/// A coherent client identity: one bundle of request headers presented
/// together. Feeds run inconsistent bot filtering, and a profile that
/// one feed accepts gets another feed's requests dropped, so the
/// fetcher rotates through profiles instead of committing to one.
#[derive(Debug, Clone, Copy)]
pub struct HeaderProfile {
    /// Short name used in logs and diagnostics.
    pub name: &'static str,
    pub user_agent: &'static str,
    pub accept: &'static str,
    pub accept_language: &'static str,
    /// `Cache-Control` hint, when the profile sends one.
    pub cache_control: Option<&'static str>,
}

/// Ordered profile table: the realistic modern-browser identity first
/// (accepted by most feeds), then a minimal generic fallback that
/// stricter feeds prefer over anything browser-shaped.
pub const HEADER_PROFILES: &[HeaderProfile] = &[
    HeaderProfile {
        name: "browser",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        accept: "application/rss+xml, application/xml, text/xml, application/atom+xml, */*",
        accept_language: "en-US,en;q=0.9",
        cache_control: Some("no-cache"),
    },
    HeaderProfile {
        name: "generic",
        user_agent: "Mozilla/5.0 (compatible; NewsDigestReader/1.0)",
        accept: "*/*",
        accept_language: "en",
        cache_control: None,
    },
];

/// Errors that can occur while fetching a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Every header profile failed on every retry attempt
    #[error("Feed unreachable after {attempts} attempts: {url}")]
    Unreachable { url: String, attempts: u32 },
}

/// Outcome of one successful fetch: the body plus which identity and
/// response metadata won, for diagnostics.
#[derive(Debug)]
pub struct FetchedFeed {
    pub body: Vec<u8>,
    pub status: u16,
    pub content_type: Option<String>,
    /// Index into [`HEADER_PROFILES`] of the profile that succeeded.
    pub profile_index: usize,
}

/// HTTP fetcher for feed URLs: rotating header profiles, bounded
/// retries, exponential backoff with jitter, and a body size cap.
///
/// Holds a shared `reqwest::Client` so connection pools are reused
/// across feeds; per-feed state (attempt counts, backoff) lives on the
/// stack of each `fetch` call, which keeps concurrent fetches isolated.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, config: FetchConfig) -> Self {
        Self { client, config }
    }

    /// Fetches a feed URL, trying each header profile in order on every
    /// retry attempt.
    ///
    /// A 2xx response from any profile wins immediately. Non-2xx
    /// responses and network failures are swallowed per attempt; after
    /// `max_retries` rounds with no success the terminal error
    /// identifies the URL and the total attempt count. The caller is
    /// expected to treat that as "feed unreachable", not as fatal.
    pub async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let mut last_failure: Option<FetchError> = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                tracing::debug!(
                    url = %url,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            for (idx, profile) in HEADER_PROFILES.iter().enumerate() {
                match self.try_profile(url, idx, profile).await {
                    Ok(fetched) => {
                        tracing::debug!(
                            url = %url,
                            profile = profile.name,
                            attempt = attempt,
                            bytes = fetched.body.len(),
                            "Feed fetched"
                        );
                        return Ok(fetched);
                    }
                    Err(e) => {
                        tracing::debug!(
                            url = %url,
                            profile = profile.name,
                            attempt = attempt,
                            error = %e,
                            "Fetch attempt failed"
                        );
                        last_failure = Some(e);
                    }
                }
            }
        }

        let attempts = self.config.max_retries * HEADER_PROFILES.len() as u32;
        if let Some(cause) = last_failure {
            tracing::warn!(url = %url, attempts = attempts, cause = %cause, "Feed unreachable");
        }
        Err(FetchError::Unreachable {
            url: url.to_string(),
            attempts,
        })
    }

    async fn try_profile(
        &self,
        url: &str,
        profile_index: usize,
        profile: &HeaderProfile,
    ) -> Result<FetchedFeed, FetchError> {
        let request = self
            .client
            .get(url)
            .headers(profile_headers(url, profile));

        let response = tokio::time::timeout(self.config.request_timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if let Some(len) = response.content_length() {
            if len as usize > self.config.max_body_bytes {
                return Err(FetchError::ResponseTooLarge);
            }
        }

        let body = response.bytes().await.map_err(FetchError::Network)?;
        if body.len() > self.config.max_body_bytes {
            return Err(FetchError::ResponseTooLarge);
        }

        Ok(FetchedFeed {
            body: body.to_vec(),
            status: status.as_u16(),
            content_type,
            profile_index,
        })
    }

    /// Delay before retry round `attempt` (1-based): `base * 2^(n-1)`
    /// plus uniform jitter of up to one base delay, so parallel feeds
    /// don't retry in lockstep and don't trip rate limiters with a
    /// repeated cadence.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base;
        let exp = base.saturating_mul(2u32.saturating_pow(attempt - 1));
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Builds the header map for one profile, deriving `Host` and `Referer`
/// from the target URL the way a browser session would carry them.
fn profile_headers(url: &str, profile: &HeaderProfile) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut insert = |name: reqwest::header::HeaderName, value: &str| {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(name, v);
        }
    };

    insert(reqwest::header::USER_AGENT, profile.user_agent);
    insert(reqwest::header::ACCEPT, profile.accept);
    insert(reqwest::header::ACCEPT_LANGUAGE, profile.accept_language);
    if let Some(cc) = profile.cache_control {
        insert(reqwest::header::CACHE_CONTROL, cc);
    }

    if let Ok(parsed) = Url::parse(url) {
        if let Some(host) = parsed.host_str() {
            insert(
                reqwest::header::REFERER,
                &format!("{}://{}", parsed.scheme(), host),
            );
        }
    }

    headers
}
