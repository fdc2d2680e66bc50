//! News digest pipeline: fetch RSS/Atom feeds, filter items to a date
//! window, summarize them, and render an email digest.
//!
//! The crate is organized around the run pipeline:
//!
//! - [`config`] - TOML settings, feed list, secrets via env
//! - [`feed`] - fetching, parsing, date handling, run orchestration
//! - [`digest`] - section grouping, summarization, email rendering
//! - [`util`] - HTML stripping and URL validation helpers
//!
//! Feeds are treated as unreliable by default; all per-feed failures
//! are contained and reported through counters rather than propagated.

pub mod config;
pub mod digest;
pub mod feed;
pub mod util;
