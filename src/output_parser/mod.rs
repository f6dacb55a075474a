//! # Response Parsers
//!
//! Pure functions turning raw model text into typed values. Parsers hold no
//! state and compose freely: [`json_field_parser`] is built on
//! [`parse_json_value`], specialized nodes reuse [`parse_labeled_fields`].
//!
//! | Parser | Output | Fails when |
//! |--------|--------|------------|
//! | [`text_parser`] | trimmed `String` | never |
//! | [`json_parser`] | any `DeserializeOwned` | no JSON found, or wrong shape |
//! | [`json_field_parser`] | one field of the JSON object | as above, or field absent |
//! | [`regex_parser`] | `HashMap<String, String>` | any pattern has no match |
//! | [`labeled_fields_parser`] | `HashMap<String, String>` | never |

pub mod error;
pub mod extract;
pub mod fields;
pub mod json;
pub mod pattern;
pub mod text;

use std::sync::Arc;

pub use error::ParseError;
pub use fields::{labeled_fields_parser, parse_labeled_fields};
pub use json::{json_field_parser, json_parser, parse_json, parse_json_value};
pub use pattern::{parse_with_patterns, regex_parser};
pub use text::{parse_text, text_parser};

/// A shareable, stateless parser from raw model text to `T`.
pub type ResponseParser<T> = Arc<dyn Fn(&str) -> Result<T, ParseError> + Send + Sync>;
