//! Error types for response parsers.

/// Errors returned by response parsers.
///
/// Every variant carries enough context (a text preview, the offending field,
/// or the attempted pattern) to diagnose the failure without the raw response.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// The model response was empty or whitespace-only.
    #[error("empty model response")]
    EmptyResponse,

    /// No strategy could locate valid JSON in the response.
    #[error("no valid JSON found in model output: {preview}")]
    InvalidJson {
        /// Truncated copy of the cleaned response (about 100 chars).
        preview: String,
    },

    /// JSON was found but did not deserialize into the requested type.
    #[error("JSON deserialization failed: {reason} (json: {raw_json})")]
    Deserialization {
        /// The serde error message.
        reason: String,
        /// Truncated copy of the JSON that failed.
        raw_json: String,
    },

    /// A field expected in the parsed JSON object was absent.
    #[error("field '{field}' not found in parsed JSON")]
    MissingField { field: String },

    /// A required pattern did not match the response.
    #[error("pattern for '{key}' did not match (pattern: {pattern})")]
    PatternNotMatched { key: String, pattern: String },

    /// The response could not be interpreted as the expected format.
    #[error("could not parse {expected_format} from model output: {text}")]
    Unparseable {
        expected_format: &'static str,
        text: String,
    },
}

/// Truncate to at most `max_chars` characters, appending "..." if truncated.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_is_untouched() {
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn truncate_long_appends_ellipsis() {
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 2), "hé...");
    }
}
