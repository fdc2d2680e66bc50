//! Digest assembly: grouping filtered items into dated sections,
//! summarizing them, and rendering the outgoing email.

pub mod email;
pub mod summarizer;

use chrono::NaiveDate;
use thiserror::Error;

use crate::feed::FeedItem;

pub use email::{EmailSender, FileTransport, RenderedEmail, Transport};
pub use summarizer::{ModelCursor, Summarizer};

/// Errors from digest assembly and delivery.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Summarization request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Summarization service returned status {0}")]
    ServiceStatus(u16),
    #[error("Summarization response missing generated text")]
    EmptyResponse,
    #[error("All configured models exhausted")]
    ModelsExhausted,
    #[error("Delivery failed: {0}")]
    Delivery(#[from] std::io::Error),
}

/// One renderable block of the digest.
///
/// Sections are either a date with its items, or free-form supplemental
/// text (run notes, failure listings). The tagged split keeps rendering
/// code from having to guess whether a key is a date.
#[derive(Debug, Clone, PartialEq)]
pub enum DigestSection {
    Dated {
        date: NaiveDate,
        items: Vec<FeedItem>,
    },
    Supplemental(String),
}

/// Groups items into per-date sections, newest date first.
///
/// Input is expected sorted newest-first (the reader guarantees it);
/// within each section the incoming order is preserved. Items without a
/// date never reach this point, so they are simply dropped here rather
/// than given a section.
pub fn build_sections(items: &[FeedItem]) -> Vec<DigestSection> {
    let mut sections: Vec<DigestSection> = Vec::new();

    for item in items {
        let date = match item.published_at {
            Some(ts) => ts.date_naive(),
            None => continue,
        };
        match sections.last_mut() {
            Some(DigestSection::Dated {
                date: current,
                items,
            }) if *current == date => items.push(item.clone()),
            _ => sections.push(DigestSection::Dated {
                date,
                items: vec![item.clone()],
            }),
        }
    }

    sections
}
