//! Regex-driven field extraction.
//!
//! [`regex_parser`] pulls one value per key out of free text using a
//! caller-supplied pattern, taking capture group 1 of the first match.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ParseError;
use super::ResponseParser;

/// Match every `(key, pattern)` pair against `raw` and collect capture group 1.
///
/// Patterns are tried in the given order; the first pattern without a match
/// aborts the whole parse. A pattern with no capture group contributes its
/// whole match.
pub fn parse_with_patterns(
    raw: &str,
    patterns: &[(String, Regex)],
) -> Result<HashMap<String, String>, ParseError> {
    let mut out = HashMap::with_capacity(patterns.len());

    for (key, pattern) in patterns {
        let caps = pattern
            .captures(raw)
            .ok_or_else(|| ParseError::PatternNotMatched {
                key: key.clone(),
                pattern: pattern.as_str().to_string(),
            })?;
        let matched = caps.get(1).or_else(|| caps.get(0)).map_or("", |m| m.as_str());
        out.insert(key.clone(), matched.trim().to_string());
    }

    Ok(out)
}

/// A parser that extracts one trimmed capture per key.
///
/// # Examples
///
/// ```
/// use llm_nodes::output_parser::regex_parser;
/// use regex::Regex;
///
/// let parser = regex_parser([("name", Regex::new(r"Name: (.+)").unwrap())]);
/// let fields = parser("Name: Alice\n").unwrap();
/// assert_eq!(fields["name"], "Alice");
/// assert!(parser("Nom: Alice").is_err());
/// ```
pub fn regex_parser<I, K>(patterns: I) -> ResponseParser<HashMap<String, String>>
where
    I: IntoIterator<Item = (K, Regex)>,
    K: Into<String>,
{
    let patterns: Vec<(String, Regex)> = patterns
        .into_iter()
        .map(|(key, re)| (key.into(), re))
        .collect();
    Arc::new(move |raw: &str| parse_with_patterns(raw, &patterns))
}
