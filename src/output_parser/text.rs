//! Plain-text response parsing.

use std::sync::Arc;

use super::ResponseParser;

/// Trim leading and trailing whitespace. Never fails.
pub fn parse_text(raw: &str) -> String {
    raw.trim().to_string()
}

/// A parser returning the trimmed response text.
///
/// # Examples
///
/// ```
/// use llm_nodes::output_parser::text_parser;
///
/// let parser = text_parser();
/// assert_eq!(parser("  Paris is the capital.\n").unwrap(), "Paris is the capital.");
/// ```
pub fn text_parser() -> ResponseParser<String> {
    Arc::new(|raw: &str| Ok(parse_text(raw)))
}
