use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use newsdigest::config::{self, Config};
use newsdigest::digest::{self, DigestSection, EmailSender, FileTransport, ModelCursor, Summarizer};
use newsdigest::feed::diagnostics::FeedDiagnostics;
use newsdigest::feed::{FeedFetcher, FeedReader};
use newsdigest::util::validate_feed_url;

#[derive(Parser, Debug)]
#[command(name = "newsdigest", about = "RSS/Atom news digest generator")]
struct Args {
    /// Config file path
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Window size in days (overrides config)
    #[arg(long, value_name = "N")]
    days: Option<u32>,

    /// Comma-separated feed URLs (overrides the feeds file)
    #[arg(long, value_name = "URLS", value_delimiter = ',')]
    feeds: Option<Vec<String>>,

    /// Render the digest to stdout instead of delivering it
    #[arg(long)]
    dry_run: bool,

    /// Probe all feeds and print a JSON diagnostic report
    #[arg(long)]
    diagnose: bool,

    /// Validate external services, then exit without building a digest
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from '{}'", args.config.display()))?;

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    if args.test {
        if config.summarizer.enabled() {
            let summarizer = Summarizer::new(client, config.summarizer);
            match summarizer.check_connection().await {
                Ok(()) => println!("summarizer: ok"),
                Err(e) => {
                    println!("summarizer: failed ({e})");
                    std::process::exit(1);
                }
            }
        } else {
            println!("summarizer: skipped (no API key configured)");
        }
        return Ok(());
    }

    let urls = resolve_feed_urls(&args, &config)?;
    if urls.is_empty() {
        tracing::warn!("No feed URLs configured; nothing to do");
    }

    let fetcher = FeedFetcher::new(client.clone(), config.fetch.clone());

    if args.diagnose {
        let report = FeedDiagnostics::new(fetcher, config.reader.concurrency)
            .run(&urls)
            .await;
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize diagnostic report")?;
        println!("{json}");
        return Ok(());
    }

    let days = args.days.unwrap_or(config.digest.days);
    let reader = FeedReader::new(fetcher, &config.reader);
    let report = reader.read(&urls, days).await;

    let mut items = report.items;
    let mut social_post = None;
    if config.summarizer.enabled() {
        let summarizer = Summarizer::new(client, config.summarizer);
        summarizer.summarize_all(&mut items).await;
        let mut cursor = ModelCursor::default();
        social_post = summarizer.social_content(&items, &mut cursor).await;
    } else {
        tracing::info!("No summarizer API key configured; shipping descriptions as-is");
    }

    let mut sections = digest::build_sections(&items);
    if let Some(post) = social_post {
        sections.push(DigestSection::Supplemental(post));
    }
    if !report.failures.is_empty() {
        let mut note = format!("{} feed(s) were unreachable:", report.failures.len());
        for (url, error) in &report.failures {
            note.push_str(&format!(" {url} ({error});"));
        }
        sections.push(DigestSection::Supplemental(note));
    }

    let sender = EmailSender::new(config.email);
    if args.dry_run {
        let email = sender.render(&sections, &report.stats);
        println!("Subject: {}", email.subject);
        println!("{}", email.html_body);
        return Ok(());
    }

    let transport = FileTransport::new(&config.digest.output_file);
    sender
        .send(&transport, &sections, &report.stats)
        .context("Failed to deliver digest")?;

    Ok(())
}

/// CLI `--feeds` beats the configured feeds file. Both paths apply the
/// same URL validation; invalid entries are dropped with a warning.
fn resolve_feed_urls(args: &Args, config: &Config) -> Result<Vec<String>> {
    match &args.feeds {
        Some(list) => Ok(list
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .filter(|u| match validate_feed_url(u) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(url = %u, error = %e, "Skipping invalid feed URL");
                    false
                }
            })
            .map(str::to_string)
            .collect()),
        None => config::load_feed_urls(&config.digest.feeds_file).with_context(|| {
            format!(
                "Failed to load feed list from '{}'",
                config.digest.feeds_file.display()
            )
        }),
    }
}
