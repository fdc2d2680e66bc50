//! Text-generation client for per-article summaries.
//!
//! Talks to a Gemini-style `generateContent` REST endpoint. The service
//! rate-limits and degrades per model, so the client carries an ordered
//! model list and an explicit [`ModelCursor`]: once a model starts
//! failing the cursor moves past it for the rest of the run instead of
//! re-trying the dead model for every remaining article.
//!
//! Summarization is best-effort by contract. A failed article gets the
//! [`SUMMARY_FAILURE`] sentinel and the run continues; the digest ships
//! either way.

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::SummarizerConfig;
use crate::digest::DigestError;
use crate::feed::FeedItem;

/// Sentinel summary for articles the service could not summarize.
pub const SUMMARY_FAILURE: &str = "Summary unavailable for this article.";

/// Cap on headlines fed into the social-post prompt.
const MAX_SOCIAL_ITEMS: usize = 10;

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Position in the configured model list. Threaded explicitly through
/// calls so fallback state is visible to the caller and testable; there
/// is no hidden rotation inside the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelCursor(usize);

impl ModelCursor {
    pub fn index(&self) -> usize {
        self.0
    }

    fn advance(&mut self) {
        self.0 += 1;
    }
}

pub struct Summarizer {
    client: reqwest::Client,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(client: reqwest::Client, config: SummarizerConfig) -> Self {
        Self { client, config }
    }

    /// Summarizes one article, falling through the model list from the
    /// cursor's position. Advances the cursor past models that fail so
    /// later articles start at the first model still known to work.
    /// Never errors: total failure yields [`SUMMARY_FAILURE`].
    pub async fn summarize_item(&self, item: &FeedItem, cursor: &mut ModelCursor) -> String {
        let prompt = self.render_prompt(item);

        while let Some(model) = self.config.models.get(cursor.index()) {
            match self.generate(model, &prompt).await {
                Ok(text) => return text,
                Err(e) => {
                    tracing::warn!(
                        model = %model,
                        title = %item.title,
                        error = %e,
                        "Model failed, falling back to next"
                    );
                    cursor.advance();
                }
            }
        }

        tracing::warn!(title = %item.title, "All models exhausted for article");
        SUMMARY_FAILURE.to_string()
    }

    /// Fills `summary` on every item in place, sharing one cursor
    /// across the batch.
    pub async fn summarize_all(&self, items: &mut [FeedItem]) {
        let mut cursor = ModelCursor::default();
        for item in items.iter_mut() {
            let summary = self.summarize_item(item, &mut cursor).await;
            item.summary = Some(summary);
        }
    }

    /// Generates one promotional social post covering the run's
    /// articles. Unlike per-article summaries there is no sentinel:
    /// failure (or an empty run) yields `None` and the digest ships
    /// without the section.
    pub async fn social_content(
        &self,
        items: &[FeedItem],
        cursor: &mut ModelCursor,
    ) -> Option<String> {
        if items.is_empty() {
            return None;
        }

        let listing: String = items
            .iter()
            .take(MAX_SOCIAL_ITEMS)
            .map(|item| format!("- {} ({})\n", item.title, item.source))
            .collect();
        let prompt = self
            .config
            .social_prompt_template
            .replace("{articles}", &listing);

        while let Some(model) = self.config.models.get(cursor.index()) {
            match self.generate(model, &prompt).await {
                Ok(text) => return Some(text),
                Err(e) => {
                    tracing::warn!(
                        model = %model,
                        error = %e,
                        "Model failed for social post, falling back to next"
                    );
                    cursor.advance();
                }
            }
        }

        tracing::warn!("All models exhausted for social post; omitting it");
        None
    }

    /// One tiny generation against the first configured model. Used by
    /// the connection-test mode to validate endpoint and key before a
    /// real run.
    pub async fn check_connection(&self) -> Result<(), DigestError> {
        let model = self
            .config
            .models
            .first()
            .ok_or(DigestError::ModelsExhausted)?;
        self.generate(model, "Reply with the single word OK.")
            .await
            .map(|_| ())
    }

    fn render_prompt(&self, item: &FeedItem) -> String {
        self.config
            .prompt_template
            .replace("{title}", &item.title)
            .replace("{description}", &item.description)
            .replace("{source}", &item.source)
    }

    /// One `generateContent` call against one model, with bounded
    /// retries for transient failures.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, DigestError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let mut last_error: Option<DigestError> = None;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay * 2u32.saturating_pow(attempt - 1))
                    .await;
            }
            match self.generate_once(&url, &request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::debug!(model = %model, attempt = attempt, error = %e, "Generation attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(DigestError::ModelsExhausted))
    }

    async fn generate_once(
        &self,
        url: &str,
        request: &GenerateRequest,
    ) -> Result<String, DigestError> {
        let response = self
            .client
            .post(url)
            .query(&[("key", self.config.api_key.expose_secret())])
            .json(request)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::ServiceStatus(status.as_u16()));
        }

        let body: GenerateResponse = response.json().await?;
        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(DigestError::EmptyResponse)?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String, models: Vec<String>) -> SummarizerConfig {
        SummarizerConfig {
            api_key: SecretString::from("test-key"),
            base_url,
            models,
            prompt_template: "Summarize: {title} | {description} | {source}".to_string(),
            social_prompt_template: "Promote:\n{articles}".to_string(),
            max_retries: 2,
            retry_delay: Duration::from_millis(5),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn item() -> FeedItem {
        FeedItem {
            title: "Headline".into(),
            description: "Body text".into(),
            link: "https://example.com/a".into(),
            published_at: None,
            source: "Example News".into(),
            summary: None,
        }
    }

    fn generation_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [
                { "content": { "parts": [ { "text": text } ] } }
            ]
        })
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/alpha:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_body("A summary.")))
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into()]),
        );
        let mut cursor = ModelCursor::default();
        let summary = s.summarize_item(&item(), &mut cursor).await;
        assert_eq!(summary, "A summary.");
        assert_eq!(cursor.index(), 0);
    }

    #[tokio::test]
    async fn test_cursor_advances_past_failing_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/alpha:generateContent"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/beta:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_body("Fallback.")))
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into(), "beta".into()]),
        );
        let mut cursor = ModelCursor::default();
        let summary = s.summarize_item(&item(), &mut cursor).await;
        assert_eq!(summary, "Fallback.");
        // Next article starts directly at the surviving model
        assert_eq!(cursor.index(), 1);
    }

    #[tokio::test]
    async fn test_all_models_failing_yields_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into(), "beta".into()]),
        );
        let mut cursor = ModelCursor::default();
        let summary = s.summarize_item(&item(), &mut cursor).await;
        assert_eq!(summary, SUMMARY_FAILURE);
    }

    #[tokio::test]
    async fn test_retries_transient_failure_before_fallback() {
        use wiremock::matchers::any;

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_body("Recovered.")))
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into()]),
        );
        let mut cursor = ModelCursor::default();
        let summary = s.summarize_item(&item(), &mut cursor).await;
        assert_eq!(summary, "Recovered.");
        assert_eq!(cursor.index(), 0);
    }

    #[tokio::test]
    async fn test_summarize_all_fills_every_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_body("S.")))
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into()]),
        );
        let mut items = vec![item(), item()];
        s.summarize_all(&mut items).await;
        assert!(items.iter().all(|i| i.summary.as_deref() == Some("S.")));
    }

    #[tokio::test]
    async fn test_social_content_generated_from_run() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/alpha:generateContent"))
            .and(wiremock::matchers::body_string_contains("Headline"))
            .and(wiremock::matchers::body_string_contains("Example News"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(generation_body("Read all about it!")),
            )
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into()]),
        );
        let mut cursor = ModelCursor::default();
        let post = s.social_content(&[item(), item()], &mut cursor).await;
        assert_eq!(post.as_deref(), Some("Read all about it!"));
    }

    #[tokio::test]
    async fn test_social_content_failure_yields_none_not_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into()]),
        );
        let mut cursor = ModelCursor::default();
        assert_eq!(s.social_content(&[item()], &mut cursor).await, None);
    }

    #[tokio::test]
    async fn test_social_content_skips_empty_run() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_body("unused")))
            .expect(0)
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into()]),
        );
        let mut cursor = ModelCursor::default();
        assert_eq!(s.social_content(&[], &mut cursor).await, None);
    }

    #[tokio::test]
    async fn test_check_connection_reports_reachability() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_body("OK")))
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into()]),
        );
        assert!(s.check_connection().await.is_ok());
    }

    #[tokio::test]
    async fn test_check_connection_surfaces_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let s = Summarizer::new(
            reqwest::Client::new(),
            config(server.uri(), vec!["alpha".into()]),
        );
        assert!(s.check_connection().await.is_err());
    }

    #[test]
    fn test_prompt_template_substitution() {
        let s = Summarizer::new(
            reqwest::Client::new(),
            config("http://unused".into(), vec![]),
        );
        let prompt = s.render_prompt(&item());
        assert_eq!(prompt, "Summarize: Headline | Body text | Example News");
    }
}
