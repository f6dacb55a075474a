//! Schemas for validating structured model output.
//!
//! [`Schema`] is the seam [`StructuredOutputNode`](crate::structured::StructuredOutputNode)
//! validates against. [`JsonShape`] is a built-in implementation covering the
//! usual object/array/scalar/enum shapes; callers with richer needs implement
//! the trait themselves.

use serde_json::Value;
use std::fmt;

/// One validation failure: where it happened and what was wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// JSON path of the offending value, e.g. `$.items[2].name`.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A structural check over parsed JSON.
pub trait Schema: Send + Sync {
    /// Validate a value, returning every issue found.
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>>;

    /// Human-readable rendering of the expected shape, shown to the model on retry.
    fn describe(&self) -> String;
}

/// A declarative JSON shape.
///
/// # Example
///
/// ```
/// use llm_nodes::schema::{FieldShape, JsonShape, Schema};
/// use serde_json::json;
///
/// let shape = JsonShape::object(vec![
///     FieldShape::required("name", JsonShape::String),
///     FieldShape::optional("tags", JsonShape::array(JsonShape::String)),
/// ]);
/// assert!(shape.validate(&json!({"name": "x"})).is_ok());
/// assert!(shape.validate(&json!({"name": 1})).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum JsonShape {
    String,
    Number,
    Integer,
    Boolean,
    /// Accepts any value, including null.
    Any,
    Array(Box<JsonShape>),
    Object(Vec<FieldShape>),
    /// One of a fixed set of string values.
    Enum(Vec<String>),
}

/// A named property of an object shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldShape {
    pub name: String,
    pub shape: JsonShape,
    pub required: bool,
}

impl FieldShape {
    pub fn required(name: impl Into<String>, shape: JsonShape) -> Self {
        Self {
            name: name.into(),
            shape,
            required: true,
        }
    }

    /// An optional field: may be absent or null.
    pub fn optional(name: impl Into<String>, shape: JsonShape) -> Self {
        Self {
            name: name.into(),
            shape,
            required: false,
        }
    }
}

impl JsonShape {
    pub fn object(fields: Vec<FieldShape>) -> Self {
        JsonShape::Object(fields)
    }

    pub fn array(item: JsonShape) -> Self {
        JsonShape::Array(Box::new(item))
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        JsonShape::Enum(values.into_iter().map(Into::into).collect())
    }

    fn check(&self, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
        match (self, value) {
            (JsonShape::Any, _) => {}
            (JsonShape::String, Value::String(_)) => {}
            (JsonShape::Number, Value::Number(_)) => {}
            (JsonShape::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {}
            (JsonShape::Boolean, Value::Bool(_)) => {}
            (JsonShape::Enum(allowed), Value::String(s)) => {
                if !allowed.iter().any(|a| a == s) {
                    issues.push(ValidationIssue::new(
                        path,
                        format!("expected one of [{}], got \"{}\"", allowed.join(", "), s),
                    ));
                }
            }
            (JsonShape::Array(item), Value::Array(items)) => {
                for (i, element) in items.iter().enumerate() {
                    item.check(element, &format!("{path}[{i}]"), issues);
                }
            }
            (JsonShape::Object(fields), Value::Object(map)) => {
                for field in fields {
                    let field_path = format!("{path}.{}", field.name);
                    match map.get(&field.name) {
                        None | Some(Value::Null) if field.required => issues.push(
                            ValidationIssue::new(field_path, "required field is missing"),
                        ),
                        None | Some(Value::Null) => {}
                        Some(v) => field.shape.check(v, &field_path, issues),
                    }
                }
            }
            (expected, actual) => issues.push(ValidationIssue::new(
                path,
                format!("expected {}, got {}", expected.type_name(), kind_of(actual)),
            )),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            JsonShape::String | JsonShape::Enum(_) => "string",
            JsonShape::Number => "number",
            JsonShape::Integer => "integer",
            JsonShape::Boolean => "boolean",
            JsonShape::Any => "any",
            JsonShape::Array(_) => "array",
            JsonShape::Object(_) => "object",
        }
    }

    fn write_description(&self, out: &mut String, indent: usize) {
        match self {
            JsonShape::Array(item) => {
                out.push_str("Array<");
                item.write_description(out, indent);
                out.push('>');
            }
            JsonShape::Enum(values) => {
                let quoted: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
                out.push_str(&quoted.join(" | "));
            }
            JsonShape::Object(fields) => {
                out.push_str("{\n");
                let pad = "  ".repeat(indent + 1);
                for field in fields {
                    out.push_str(&pad);
                    out.push_str(&field.name);
                    if !field.required {
                        out.push('?');
                    }
                    out.push_str(": ");
                    field.shape.write_description(out, indent + 1);
                    out.push_str(";\n");
                }
                out.push_str(&"  ".repeat(indent));
                out.push('}');
            }
            scalar => out.push_str(scalar.type_name()),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Schema for JsonShape {
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        self.check(value, "$", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    fn describe(&self) -> String {
        let mut out = String::new();
        self.write_description(&mut out, 0);
        out
    }
}
