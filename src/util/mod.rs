//! Small shared helpers: plain-text conversion and feed URL validation.

mod text;
mod url_validator;

pub use text::strip_html;
pub use url_validator::{validate_feed_url, UrlValidationError};
