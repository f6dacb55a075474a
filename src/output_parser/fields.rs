//! `Label: value` line parsing.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use super::ResponseParser;

static LABELED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:]+):\s*(.+)$").expect("valid labeled-line regex"));

/// Collect `Label: value` lines into a map. Lines without a label are skipped.
///
/// Later lines with the same label overwrite earlier ones.
pub fn parse_labeled_fields(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter_map(|line| {
            let caps = LABELED_LINE.captures(line.trim())?;
            Some((caps[1].trim().to_string(), caps[2].trim().to_string()))
        })
        .collect()
}

/// A parser producing a label-to-value map. Never fails.
///
/// # Examples
///
/// ```
/// use llm_nodes::output_parser::labeled_fields_parser;
///
/// let parser = labeled_fields_parser();
/// let fields = parser("Title: Dune\nnoise\nYear: 1965").unwrap();
/// assert_eq!(fields["Title"], "Dune");
/// assert_eq!(fields.len(), 2);
/// ```
pub fn labeled_fields_parser() -> ResponseParser<HashMap<String, String>> {
    Arc::new(|raw: &str| Ok(parse_labeled_fields(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labeled_lines() {
        let fields = parse_labeled_fields("Name: Alice\nRole:  engineer \n");
        assert_eq!(fields["Name"], "Alice");
        assert_eq!(fields["Role"], "engineer");
    }

    #[test]
    fn skips_unlabeled_lines() {
        let fields = parse_labeled_fields("just prose\n\nKey: value\n: orphan\nEmpty:");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["Key"], "value");
    }

    #[test]
    fn value_may_contain_colons() {
        let fields = parse_labeled_fields("Time: 12:30");
        assert_eq!(fields["Time"], "12:30");
    }

    #[test]
    fn empty_input_yields_empty_map() {
        assert!(labeled_fields_parser()("").unwrap().is_empty());
    }
}
