//! Digest email rendering and delivery hand-off.
//!
//! This module owns everything up to the wire: subject line, HTML body,
//! recipient envelope. Actual transmission goes through the [`Transport`]
//! trait so the binary can swap real delivery for the file-backed
//! transport during dry runs and tests.

use std::path::PathBuf;

use crate::config::EmailConfig;
use crate::digest::{DigestError, DigestSection};
use crate::feed::reader::RunStats;

/// A fully rendered message, ready for a transport.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub from: String,
    pub to: Vec<String>,
}

/// Delivery seam. Implementations receive a complete message and move
/// it somewhere; they never inspect or alter the content.
pub trait Transport {
    fn deliver(&self, email: &RenderedEmail) -> Result<(), DigestError>;
}

/// Writes the rendered message to a local HTML file. Used for dry runs
/// and as the default when no real transport is wired up.
pub struct FileTransport {
    path: PathBuf,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Transport for FileTransport {
    fn deliver(&self, email: &RenderedEmail) -> Result<(), DigestError> {
        let contents = format!(
            "<!-- Subject: {} -->\n<!-- To: {} -->\n{}",
            email.subject,
            email.to.join(", "),
            email.html_body
        );
        std::fs::write(&self.path, contents)?;
        tracing::info!(path = %self.path.display(), "Digest written to file");
        Ok(())
    }
}

pub struct EmailSender {
    config: EmailConfig,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Renders the digest into a complete message. Subject carries the
    /// single covered date, or the date range when sections span
    /// multiple days.
    pub fn render(&self, sections: &[DigestSection], stats: &RunStats) -> RenderedEmail {
        RenderedEmail {
            subject: render_subject(sections),
            html_body: render_body(sections, stats),
            from: self.config.sender.clone(),
            to: self.config.recipients.clone(),
        }
    }

    pub fn send(
        &self,
        transport: &dyn Transport,
        sections: &[DigestSection],
        stats: &RunStats,
    ) -> Result<(), DigestError> {
        let email = self.render(sections, stats);
        tracing::info!(
            subject = %email.subject,
            recipients = email.to.len(),
            "Delivering digest"
        );
        transport.deliver(&email)
    }
}

fn render_subject(sections: &[DigestSection]) -> String {
    let mut dates: Vec<chrono::NaiveDate> = sections
        .iter()
        .filter_map(|s| match s {
            DigestSection::Dated { date, .. } => Some(*date),
            DigestSection::Supplemental(_) => None,
        })
        .collect();
    dates.sort();

    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) if first == last => {
            format!("News Digest - {}", first.format("%Y-%m-%d"))
        }
        (Some(first), Some(last)) => format!(
            "News Digest - {} to {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        ),
        _ => "News Digest".to_string(),
    }
}

fn render_body(sections: &[DigestSection], stats: &RunStats) -> String {
    let mut html = String::from("<html><body>\n<h1>News Digest</h1>\n");

    let mut article_count = 0usize;
    for section in sections {
        match section {
            DigestSection::Dated { date, items } => {
                html.push_str(&format!("<h2>{}</h2>\n<ul>\n", date.format("%Y-%m-%d")));
                for item in items {
                    article_count += 1;
                    let title = escape_html(&item.title);
                    html.push_str("<li>");
                    if item.link.is_empty() {
                        html.push_str(&format!("<strong>{title}</strong>"));
                    } else {
                        html.push_str(&format!(
                            "<a href=\"{}\"><strong>{title}</strong></a>",
                            escape_html(&item.link)
                        ));
                    }
                    html.push_str(&format!(
                        " <em>({})</em><br>\n{}",
                        escape_html(&item.source),
                        escape_html(item.summary.as_deref().unwrap_or(&item.description))
                    ));
                    html.push_str("</li>\n");
                }
                html.push_str("</ul>\n");
            }
            DigestSection::Supplemental(text) => {
                html.push_str(&format!("<p>{}</p>\n", escape_html(text)));
            }
        }
    }

    if article_count == 0 {
        html.push_str("<p>No articles found for this period.</p>\n");
    }

    html.push_str(&format!(
        "<hr>\n<p><small>Feeds: {} fetched, {} failed, {} skipped &middot; \
         {} articles in window ({} parsed, {} undated)</small></p>\n",
        stats.feeds_fetched,
        stats.feeds_failed,
        stats.feeds_skipped,
        stats.items_in_window,
        stats.items_parsed,
        stats.items_undated,
    ));
    html.push_str("</body></html>\n");
    html
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;
    use chrono::{NaiveDate, TimeZone, Utc};
    use secrecy::SecretString;

    fn sender() -> EmailSender {
        EmailSender::new(EmailConfig {
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            sender: "digest@example.com".into(),
            password: Some(SecretString::from("hunter2")),
            recipients: vec!["reader@example.com".into()],
        })
    }

    fn item(title: &str, day: u32) -> FeedItem {
        FeedItem {
            title: title.into(),
            description: format!("{title} description"),
            link: format!("https://example.com/{title}"),
            published_at: Some(Utc.with_ymd_and_hms(2025, 5, day, 10, 0, 0).unwrap()),
            source: "Example News".into(),
            summary: None,
        }
    }

    fn dated(day: u32, items: Vec<FeedItem>) -> DigestSection {
        DigestSection::Dated {
            date: NaiveDate::from_ymd_opt(2025, 5, day).unwrap(),
            items,
        }
    }

    #[test]
    fn test_subject_single_date() {
        let sections = vec![dated(24, vec![item("a", 24)])];
        let email = sender().render(&sections, &RunStats::default());
        assert_eq!(email.subject, "News Digest - 2025-05-24");
    }

    #[test]
    fn test_subject_date_range() {
        let sections = vec![
            dated(24, vec![item("a", 24)]),
            dated(22, vec![item("b", 22)]),
        ];
        let email = sender().render(&sections, &RunStats::default());
        assert_eq!(email.subject, "News Digest - 2025-05-22 to 2025-05-24");
    }

    #[test]
    fn test_subject_without_dated_sections() {
        let email = sender().render(&[], &RunStats::default());
        assert_eq!(email.subject, "News Digest");
        assert!(email.html_body.contains("No articles found"));
    }

    #[test]
    fn test_body_escapes_html_and_prefers_summary() {
        let mut it = item("a<b", 24);
        it.summary = Some("Summary & more".into());
        let sections = vec![dated(24, vec![it])];
        let email = sender().render(&sections, &RunStats::default());
        assert!(email.html_body.contains("a&lt;b"));
        assert!(email.html_body.contains("Summary &amp; more"));
        assert!(!email.html_body.contains("a<b"));
    }

    #[test]
    fn test_body_includes_stats() {
        let stats = RunStats {
            feeds_total: 5,
            feeds_fetched: 3,
            feeds_failed: 1,
            feeds_skipped: 1,
            items_parsed: 40,
            items_in_window: 12,
            items_undated: 2,
        };
        let email = sender().render(&[], &stats);
        assert!(email.html_body.contains("3 fetched, 1 failed, 1 skipped"));
        assert!(email.html_body.contains("12 articles in window"));
    }

    #[test]
    fn test_supplemental_section_rendered_as_paragraph() {
        let sections = vec![
            dated(24, vec![item("a", 24)]),
            DigestSection::Supplemental("2 feeds were unreachable.".into()),
        ];
        let email = sender().render(&sections, &RunStats::default());
        assert!(email.html_body.contains("<p>2 feeds were unreachable.</p>"));
    }

    #[test]
    fn test_envelope_from_config() {
        let email = sender().render(&[], &RunStats::default());
        assert_eq!(email.from, "digest@example.com");
        assert_eq!(email.to, vec!["reader@example.com".to_string()]);
    }

    #[test]
    fn test_file_transport_writes_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("digest.html");
        let transport = FileTransport::new(&path);

        let sections = vec![dated(24, vec![item("story", 24)])];
        sender()
            .send(&transport, &sections, &RunStats::default())
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Subject: News Digest - 2025-05-24"));
        assert!(written.contains("story"));
        assert!(written.contains("reader@example.com"));
    }
}
