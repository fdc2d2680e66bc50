//! Configuration loading for the digest pipeline.
//!
//! Settings come from an optional TOML file — a missing file yields
//! `Config::default()` — with environment variables overriding the two
//! secrets (`GEMINI_API_KEY`, `SMTP_PASSWORD`). Unknown keys are
//! ignored by serde but logged as warnings to catch typos. The feed URL
//! list lives in a separate flat file, one URL per line, with `#`
//! comments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::util::validate_feed_url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

fn de_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_secs)
}

fn de_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

/// HTTP fetch tuning knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retry rounds per feed; every round tries all header profiles.
    pub max_retries: u32,

    /// Per-request timeout.
    #[serde(rename = "request_timeout_secs", deserialize_with = "de_secs")]
    pub request_timeout: Duration,

    /// Base delay for exponential backoff between retry rounds.
    #[serde(rename = "backoff_base_ms", deserialize_with = "de_millis")]
    pub backoff_base: Duration,

    /// Response body size cap in bytes.
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout: Duration::from_secs(15),
            backoff_base: Duration::from_millis(500),
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Run orchestration: skip lists and fetch concurrency.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// URLs known to reject all client identities; never fetched.
    pub known_blocked: Vec<String>,

    /// URLs known to permanently yield zero items; never fetched.
    pub known_empty: Vec<String>,

    /// Feeds fetched in parallel.
    pub concurrency: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            known_blocked: Vec::new(),
            known_empty: Vec::new(),
            concurrency: 8,
        }
    }
}

/// Digest shaping and file locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Window size in days (rolling, ending now).
    pub days: u32,

    /// Flat file listing feed URLs, one per line.
    pub feeds_file: PathBuf,

    /// Where the file transport writes the rendered digest.
    pub output_file: PathBuf,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            days: 1,
            feeds_file: PathBuf::from("feeds.txt"),
            output_file: PathBuf::from("digest.html"),
        }
    }
}

/// Text-generation service settings. `api_key` empty means
/// summarization is disabled and items ship with descriptions only.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// API key; `GEMINI_API_KEY` env var takes precedence.
    pub api_key: SecretString,

    pub base_url: String,

    /// Models tried in order; the cursor moves past failing ones.
    pub models: Vec<String>,

    /// Prompt with `{title}`, `{description}`, `{source}` placeholders.
    pub prompt_template: String,

    /// Prompt for the promotional social post, with an `{articles}`
    /// placeholder receiving the run's headline listing.
    pub social_prompt_template: String,

    pub max_retries: u32,

    #[serde(rename = "retry_delay_ms", deserialize_with = "de_millis")]
    pub retry_delay: Duration,

    #[serde(rename = "request_timeout_secs", deserialize_with = "de_secs")]
    pub request_timeout: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: SecretString::from(""),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            models: vec![
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-flash-8b".to_string(),
            ],
            prompt_template: "Summarize this news article in two sentences.\n\
                              Title: {title}\nContent: {description}\nSource: {source}"
                .to_string(),
            social_prompt_template: "Write a short, engaging social media post promoting \
                                     today's news digest. Highlight the main themes.\n\
                                     Articles:\n{articles}"
                .to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SummarizerConfig {
    pub fn enabled(&self) -> bool {
        !self.api_key.expose_secret().is_empty()
    }
}

/// Outgoing mail settings. The crate renders the message; actual SMTP
/// transmission happens behind the `Transport` seam.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender: String,
    /// `SMTP_PASSWORD` env var takes precedence.
    pub password: Option<SecretString>,
    pub recipients: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            sender: String::new(),
            password: None,
            recipients: Vec::new(),
        }
    }
}

/// Top-level configuration, constructed once in `main` and passed down
/// by reference.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub reader: ReaderConfig,
    pub digest: DigestConfig,
    pub summarizer: SummarizerConfig,
    pub email: EmailConfig,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Loads configuration from a TOML file and applies environment
    /// overrides for secrets.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line info
    /// - Unknown top-level keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Size check before reading, so a corrupted or hostile file
        // can't exhaust memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default().with_env_overrides());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default().with_env_overrides());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default().with_env_overrides());
        }

        // Detect probable typos at the top level before lenient parsing
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["fetch", "reader", "digest", "summarizer", "email"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                self.summarizer.api_key = SecretString::from(key);
            }
        }
        if let Ok(password) = std::env::var("SMTP_PASSWORD") {
            if !password.is_empty() {
                self.email.password = Some(SecretString::from(password));
            }
        }
        self
    }
}

/// Loads the feed URL list from a flat file.
///
/// Blank lines and `#` comments are skipped. Lines that fail URL
/// validation are logged and dropped rather than aborting the run; one
/// typo in a hand-maintained list shouldn't take the digest down.
pub fn load_feed_urls(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut urls = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match validate_feed_url(line) {
            Ok(_) => urls.push(line.to_string()),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    url = %line,
                    error = %e,
                    "Skipping invalid feed URL"
                );
            }
        }
    }

    tracing::info!(path = %path.display(), feeds = urls.len(), "Loaded feed list");
    Ok(urls)
}
