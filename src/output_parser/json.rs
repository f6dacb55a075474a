//! JSON extraction from model responses.
//!
//! [`parse_json`] runs a layered fallback: whole-text parse, fenced code
//! block, then the first balanced object or array. [`json_parser`] and
//! [`json_field_parser`] wrap it as reusable [`ResponseParser`]s.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use super::error::{truncate, ParseError};
use super::extract::{extract_code_block, find_balanced};
use super::ResponseParser;

/// Characters of cleaned input quoted in a failed-parse error.
const PREVIEW_CHARS: usize = 100;

/// Locate and parse the JSON value in a model response.
///
/// Strategies, in order:
/// 1. Parse the whole trimmed text
/// 2. Parse the first `` ```json `` / `` ```JSON `` / bare fenced block
/// 3. Parse the first balanced `{...}`, then the first balanced `[...]`
///
/// # Examples
///
/// ```
/// use llm_nodes::output_parser::parse_json_value;
///
/// let value = parse_json_value("Here is the result:\n```json\n{\"a\": 5}\n```\nThanks").unwrap();
/// assert_eq!(value["a"], 5);
/// ```
pub fn parse_json_value(raw: &str) -> Result<Value, ParseError> {
    let cleaned = raw.trim();

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    if let Some(block) = extract_code_block(cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return Ok(value);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(span) = find_balanced(cleaned, open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(span) {
                return Ok(value);
            }
        }
    }

    Err(ParseError::InvalidJson {
        preview: truncate(cleaned, PREVIEW_CHARS),
    })
}

/// Locate the JSON value in a model response and deserialize it into `T`.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let value = parse_json_value(raw)?;
    deserialize_value(value)
}

/// Deserialize an already-extracted JSON value, keeping a preview on failure.
pub(crate) fn deserialize_value<T: DeserializeOwned>(value: Value) -> Result<T, ParseError> {
    let preview = truncate(&value.to_string(), 200);
    serde_json::from_value(value).map_err(|e| ParseError::Deserialization {
        reason: e.to_string(),
        raw_json: preview,
    })
}

/// A parser that extracts JSON and deserializes it into `T`.
pub fn json_parser<T>() -> ResponseParser<T>
where
    T: DeserializeOwned + 'static,
{
    Arc::new(|raw: &str| parse_json::<T>(raw))
}

/// A parser that extracts JSON and returns one top-level field as `T`.
///
/// Fails with [`ParseError::MissingField`] when the field is absent.
pub fn json_field_parser<T>(field: impl Into<String>) -> ResponseParser<T>
where
    T: DeserializeOwned + 'static,
{
    let field = field.into();
    Arc::new(move |raw: &str| {
        let mut value = parse_json_value(raw)?;
        let picked = value
            .get_mut(field.as_str())
            .map(Value::take)
            .ok_or_else(|| ParseError::MissingField {
                field: field.clone(),
            })?;
        deserialize_value(picked)
    })
}
