//! Prompt templates and the `{{ expr }}` expression language.
//!
//! A [`PromptTemplate`] is either literal text with `{{ expr }}` placeholders
//! or a caller function that renders the whole prompt itself. Placeholder
//! expressions are read-only and deliberately small:
//!
//! - identifiers resolved against the input object (`{{topic}}`), with
//!   `input` naming the whole input when no such field exists
//! - member access and indexing: `{{user.name}}`, `{{items[0]}}`, `{{map["k"]}}`
//! - a fixed set of helpers: `join(sep)`, `upper()`, `lower()`, `trim()`,
//!   `len()` / `.length`, `first()`, `last()`, `json()`, `keys()`, `values()`
//!   (plus the `toUpperCase()` / `toLowerCase()` / `toString()` spellings)
//!
//! Rendering never fails. An expression that cannot be evaluated falls back
//! to a direct lookup of the raw expression text as a key, and then to the
//! empty string.

use serde_json::Value;
use std::iter::Peekable;
use std::sync::Arc;
use std::vec::IntoIter;

/// Signature of a function template.
pub type TemplateFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// A prompt template: literal text with placeholders, or a render function.
#[derive(Clone)]
pub enum PromptTemplate {
    /// Text with `{{ expr }}` placeholders.
    Text(String),
    /// A function responsible for the full rendering; no interpolation applies.
    Func(TemplateFn),
}

impl PromptTemplate {
    /// Build a function template.
    pub fn from_fn(f: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        PromptTemplate::Func(Arc::new(f))
    }

    /// Render against an input value. Recomputed on every call.
    pub fn render(&self, input: &Value) -> String {
        match self {
            PromptTemplate::Text(text) => render(text, input),
            PromptTemplate::Func(f) => f(input),
        }
    }
}

impl From<&str> for PromptTemplate {
    fn from(text: &str) -> Self {
        PromptTemplate::Text(text.to_string())
    }
}

impl From<String> for PromptTemplate {
    fn from(text: String) -> Self {
        PromptTemplate::Text(text)
    }
}

impl std::fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptTemplate::Text(text) => f.debug_tuple("Text").field(text).finish(),
            PromptTemplate::Func(_) => write!(f, "Func(...)"),
        }
    }
}

/// Substitute every `{{ expr }}` placeholder in `template`.
///
/// # Example
///
/// ```
/// use llm_nodes::template::render;
/// use serde_json::json;
///
/// let input = json!({"user": {"name": "Alice"}, "tags": ["a", "b"]});
/// let out = render("Hi {{user.name}}, tags: {{tags.join(', ')}}{{missing}}", &input);
/// assert_eq!(out, "Hi Alice, tags: a, b");
/// ```
pub fn render(template: &str, input: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(&resolve_placeholder(after_open[..end].trim(), input));
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Evaluate one placeholder, degrading to a raw key lookup and then to "".
fn resolve_placeholder(expr: &str, input: &Value) -> String {
    if let Some(value) = evaluate(expr, input) {
        return display_value(&value);
    }
    input
        .get(expr)
        .map(display_value)
        .unwrap_or_default()
}

/// Stringify a value for prompt text.
///
/// Strings are inserted raw, `null` as nothing, arrays of scalars
/// comma-joined, and objects (or nested arrays) as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) if items.iter().all(is_scalar) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
}

fn tokenize(expr: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next()? {
                        '\\' => literal.push(chars.next()?),
                        c if c == quote => break,
                        c => literal.push(c),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut digits = String::new();
                digits.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                tokens.push(Token::Int(digits.parse().ok()?));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_alphanumeric() || d == '_' || d == '$') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            _ => return None,
        }
    }

    Some(tokens)
}

/// Evaluate an expression against the input. `None` means evaluation failed.
fn evaluate(expr: &str, input: &Value) -> Option<Value> {
    let mut tokens = tokenize(expr)?.into_iter().peekable();

    let Token::Ident(root) = tokens.next()? else {
        return None;
    };
    let mut current = match input.get(root.as_str()) {
        Some(value) => value.clone(),
        None if root == "input" => input.clone(),
        None => return None,
    };

    while let Some(token) = tokens.next() {
        current = match token {
            Token::Dot => {
                let Token::Ident(name) = tokens.next()? else {
                    return None;
                };
                if tokens.peek() == Some(&Token::LParen) {
                    tokens.next();
                    let args = parse_args(&mut tokens)?;
                    call_helper(&current, &name, &args)?
                } else {
                    member(&current, &name)?
                }
            }
            Token::LBracket => {
                let key = tokens.next()?;
                if tokens.next()? != Token::RBracket {
                    return None;
                }
                index(&current, key)?
            }
            _ => return None,
        };
    }

    Some(current)
}

fn parse_args(tokens: &mut Peekable<IntoIter<Token>>) -> Option<Vec<Value>> {
    let mut args = Vec::new();
    if tokens.peek() == Some(&Token::RParen) {
        tokens.next();
        return Some(args);
    }
    loop {
        match tokens.next()? {
            Token::Str(s) => args.push(Value::String(s)),
            Token::Int(n) => args.push(Value::from(n)),
            _ => return None,
        }
        match tokens.next()? {
            Token::Comma => continue,
            Token::RParen => return Some(args),
            _ => return None,
        }
    }
}

fn member(value: &Value, name: &str) -> Option<Value> {
    match (value, name) {
        (Value::Object(map), _) if map.contains_key(name) => map.get(name).cloned(),
        (Value::Array(items), "length") => Some(Value::from(items.len())),
        (Value::String(s), "length") => Some(Value::from(s.chars().count())),
        _ => None,
    }
}

fn index(value: &Value, key: Token) -> Option<Value> {
    match (value, key) {
        (Value::Array(items), Token::Int(i)) => {
            let i = usize::try_from(i).ok()?;
            items.get(i).cloned()
        }
        (Value::Object(map), Token::Str(k)) => map.get(&k).cloned(),
        (Value::Object(map), Token::Int(i)) => map.get(&i.to_string()).cloned(),
        _ => None,
    }
}

fn call_helper(receiver: &Value, name: &str, args: &[Value]) -> Option<Value> {
    match (name, receiver) {
        ("join", Value::Array(items)) => {
            let sep = args.first().and_then(Value::as_str).unwrap_or(",");
            let joined = items
                .iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join(sep);
            Some(Value::String(joined))
        }
        ("upper" | "toUpperCase", Value::String(s)) => Some(Value::String(s.to_uppercase())),
        ("lower" | "toLowerCase", Value::String(s)) => Some(Value::String(s.to_lowercase())),
        ("trim", Value::String(s)) => Some(Value::String(s.trim().to_string())),
        ("len" | "length", Value::Array(items)) => Some(Value::from(items.len())),
        ("len" | "length", Value::String(s)) => Some(Value::from(s.chars().count())),
        ("len" | "length", Value::Object(map)) => Some(Value::from(map.len())),
        ("first", Value::Array(items)) => items.first().cloned(),
        ("last", Value::Array(items)) => items.last().cloned(),
        ("keys", Value::Object(map)) => Some(Value::Array(
            map.keys().cloned().map(Value::String).collect(),
        )),
        ("values", Value::Object(map)) => Some(Value::Array(map.values().cloned().collect())),
        ("json", v) => Some(Value::String(v.to_string())),
        ("toString", v) => Some(Value::String(display_value(v))),
        _ => None,
    }
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_simple_field() {
        let input = json!({"name": "Alice"});
        assert_eq!(render("Hello {{name}}!", &input), "Hello Alice!");
    }

    #[test]
    fn test_render_whitespace_inside_braces() {
        let input = json!({"name": "Alice"});
        assert_eq!(render("Hello {{  name  }}", &input), "Hello Alice");
    }

    #[test]
    fn test_render_nested_member_and_index() {
        let input = json!({"user": {"langs": ["rust", "go"]}, "m": {"a key": 3}});
        assert_eq!(render("{{user.langs[1]}}", &input), "go");
        assert_eq!(render("{{m[\"a key\"]}}", &input), "3");
    }

    #[test]
    fn test_render_join_helper() {
        let input = json!({"list": ["a", "b", "c"]});
        assert_eq!(render("{{list.join(', ')}}", &input), "a, b, c");
        assert_eq!(render("{{list.join()}}", &input), "a,b,c");
    }

    #[test]
    fn test_render_string_helpers() {
        let input = json!({"word": "  MiXed "});
        assert_eq!(render("{{word.trim().lower()}}", &input), "mixed");
        assert_eq!(render("{{word.trim().toUpperCase()}}", &input), "MIXED");
        assert_eq!(render("{{word.length}}", &input), "8");
    }

    #[test]
    fn test_render_collection_helpers() {
        let input = json!({"xs": [3, 4, 5], "obj": {"k": 1}});
        assert_eq!(render("{{xs.first()}}-{{xs.last()}}-{{xs.len()}}", &input), "3-5-3");
        assert_eq!(render("{{obj.keys()}}", &input), "k");
        assert_eq!(render("{{obj.json()}}", &input), r#"{"k":1}"#);
    }

    #[test]
    fn test_render_missing_key_is_empty() {
        let input = json!({"a": 1});
        assert_eq!(render("[{{missing}}][{{a.b.c}}][{{a.nope()}}]", &input), "[][][]");
    }

    #[test]
    fn test_render_falls_back_to_raw_key_lookup() {
        let input = json!({"first name": "Ada", "a.b": "dotted"});
        assert_eq!(render("{{first name}}", &input), "Ada");
        assert_eq!(render("{{a.b}}", &input), "dotted");
    }

    #[test]
    fn test_render_rejects_unknown_helper() {
        let input = json!({"s": "text"});
        assert_eq!(render("{{s.replace('t', 'x')}}", &input), "");
    }

    #[test]
    fn test_render_input_identifier_for_scalars() {
        assert_eq!(render("Echo: {{input}}", &json!("hi")), "Echo: hi");
        assert_eq!(render("Upper: {{input.upper()}}", &json!("hi")), "Upper: HI");
    }

    #[test]
    fn test_render_value_display() {
        let input = json!({"n": 2.5, "b": true, "nil": null, "obj": {"x": [1]}, "nested": [[1]]});
        assert_eq!(
            render("{{n}}|{{b}}|{{nil}}|{{obj}}|{{nested}}", &input),
            r#"2.5|true||{"x":[1]}|[[1]]"#
        );
    }

    #[test]
    fn test_render_leaves_no_markers_when_resolved() {
        let input = json!({"a": "x", "b": "y"});
        let out = render("{{a}} and {{b}}", &input);
        assert_eq!(out, "x and y");
        assert!(!out.contains("{{"));
    }

    #[test]
    fn test_render_unclosed_placeholder_is_literal() {
        let input = json!({"a": "x"});
        assert_eq!(render("{{a}} then {{b", &input), "x then {{b");
    }

    #[test]
    fn test_render_never_panics_on_garbage() {
        let input = json!(null);
        for t in ["{{}}", "{{.}}", "{{[}}", "{{'unterminated}}", "{{a(}}", "{{-}}", "{{1}}"] {
            let _ = render(t, &input);
        }
    }

    #[test]
    fn test_function_template_bypasses_interpolation() {
        let t = PromptTemplate::from_fn(|v| format!("count={} {{{{raw}}}}", v["n"]));
        assert_eq!(t.render(&json!({"n": 3})), "count=3 {{raw}}");
    }

    #[test]
    fn test_template_from_str() {
        let t: PromptTemplate = "Hi {{name}}".into();
        assert_eq!(t.render(&json!({"name": "Bo"})), "Hi Bo");
        assert!(format!("{:?}", t).contains("Hi {{name}}"));
    }

    #[test]
    fn test_numbered_list() {
        let items = vec!["First", "Second", "Third"];
        assert_eq!(numbered_list(&items), "1. First\n2. Second\n3. Third");
        assert_eq!(numbered_list::<String>(&[]), "");
    }

    #[test]
    fn test_section() {
        assert_eq!(section("Context", "Some knowledge"), "## Context\nSome knowledge");
    }
}
