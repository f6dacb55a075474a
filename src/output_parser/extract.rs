//! Shared extraction helpers for locating JSON inside free-form model text.
//!
//! Model output routinely wraps JSON in markdown fences, leads with prose,
//! or trails off into commentary. These helpers find the payload without
//! interpreting it.

/// Extract the content of the first JSON-capable fenced code block.
///
/// Accepts `` ```json ``, `` ```JSON `` and bare `` ``` `` fences. Fences tagged
/// with another language are skipped.
///
/// # Examples
///
/// ```
/// use llm_nodes::output_parser::extract::extract_code_block;
///
/// let input = "Here:\n```json\n{\"a\": 1}\n```";
/// assert_eq!(extract_code_block(input), Some("{\"a\": 1}"));
/// ```
pub fn extract_code_block(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find("```") {
        let after_backticks = search_from + offset + 3;
        let rest = &text[after_backticks..];

        // The language tag runs to the end of the fence line. A fence with
        // no newline before the closing backticks has no tag.
        let (tag, content_start) = match rest.find('\n') {
            Some(nl) if !rest[..nl].contains("```") => {
                (rest[..nl].trim(), after_backticks + nl + 1)
            }
            _ => ("", after_backticks),
        };

        let close = text[content_start..].find("```")?;
        let content = text[content_start..content_start + close].trim();

        if tag.is_empty() || tag.eq_ignore_ascii_case("json") {
            return Some(content);
        }

        search_from = content_start + close + 3;
    }
    None
}

/// Find the first balanced span opened by `open` and closed by `close`.
///
/// Handles nesting, skips delimiters inside quoted strings and honours
/// backslash escapes. An opener that never balances is skipped in favour
/// of the next one.
///
/// # Examples
///
/// ```
/// use llm_nodes::output_parser::extract::find_balanced;
///
/// let input = r#"Result: {"a": "}"} and more"#;
/// assert_eq!(find_balanced(input, '{', '}'), Some(r#"{"a": "}"}"#));
/// ```
pub fn find_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let mut scan_from = 0;

    while let Some(offset) = text[scan_from..].find(open) {
        let start = scan_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, ch) in text[start..].char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            if in_string {
                match ch {
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            if ch == '"' {
                in_string = true;
            } else if ch == open {
                depth += 1;
            } else if ch == close {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + ch.len_utf8()]);
                }
            }
        }

        scan_from = start + open.len_utf8();
    }

    None
}

/// Find the first balanced JSON-looking span, preferring an object over an array.
pub fn find_json_span(text: &str) -> Option<&str> {
    find_balanced(text, '{', '}').or_else(|| find_balanced(text, '[', ']'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_block_json_tag() {
        let input = "Here:\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_code_block(input), Some("{\"a\": 1}"));
    }

    #[test]
    fn code_block_uppercase_tag() {
        let input = "```JSON\n[1, 2]\n```";
        assert_eq!(extract_code_block(input), Some("[1, 2]"));
    }

    #[test]
    fn code_block_bare_fence() {
        let input = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_code_block(input), Some("{\"a\": 1}"));
    }

    #[test]
    fn code_block_single_line_fence() {
        let input = "```{\"a\": 1}```";
        assert_eq!(extract_code_block(input), Some("{\"a\": 1}"));
    }

    #[test]
    fn code_block_skips_other_languages() {
        let input = "```python\nprint(1)\n```\nthen\n```json\n{\"b\": 2}\n```";
        assert_eq!(extract_code_block(input), Some("{\"b\": 2}"));
    }

    #[test]
    fn code_block_unclosed() {
        assert_eq!(extract_code_block("```json\n{\"a\": 1}"), None);
    }

    #[test]
    fn code_block_absent() {
        assert_eq!(extract_code_block("no fences here"), None);
    }

    #[test]
    fn balanced_nested_object() {
        let input = r#"x {"outer": {"inner": [1]}} y"#;
        assert_eq!(
            find_balanced(input, '{', '}'),
            Some(r#"{"outer": {"inner": [1]}}"#)
        );
    }

    #[test]
    fn balanced_prefers_first_span() {
        let input = r#"{"a": 1} and {"b": 2}"#;
        assert_eq!(find_balanced(input, '{', '}'), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn balanced_ignores_braces_in_strings() {
        let input = r#"{"text": "a } b { c"}"#;
        assert_eq!(find_balanced(input, '{', '}'), Some(input));
    }

    #[test]
    fn balanced_honours_escaped_quotes() {
        let input = r#"{"text": "say \"}\" now"} trailing"#;
        assert_eq!(
            find_balanced(input, '{', '}'),
            Some(r#"{"text": "say \"}\" now"}"#)
        );
    }

    #[test]
    fn balanced_skips_unterminated_opener() {
        let input = "{ broken [1, 2]";
        assert_eq!(find_balanced(input, '{', '}'), None);
        assert_eq!(find_balanced(input, '[', ']'), Some("[1, 2]"));
    }

    #[test]
    fn json_span_prefers_object() {
        let input = r#"[1, 2] then {"a": 1}"#;
        assert_eq!(find_json_span(input), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn json_span_falls_back_to_array() {
        assert_eq!(find_json_span("items: [\"a\", \"b\"]."), Some("[\"a\", \"b\"]"));
    }
}
