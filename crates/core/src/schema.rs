//! Caller-supplied description of the JSON shape expected from the model.
//!
//! A [`Schema`] is consumed two ways: rendered into steering text appended
//! to the prompt ([`prompt_hint`]) and walked as a runtime validator over
//! the parsed reply ([`validate`]). The two transforms are deliberately
//! independent functions over the same description, so the steering text can
//! change without touching validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: Kind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Field {
    pub fn required(name: impl Into<String>, kind: Kind) -> Self {
        Field {
            name: name.into(),
            kind,
            required: true,
            hint: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: Kind) -> Self {
        Field {
            name: name.into(),
            kind,
            required: false,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Kind {
    String,
    Number,
    Boolean,
    Array {
        items: Box<Kind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
    },
    Object {
        fields: Vec<Field>,
    },
}

/// One violation found while checking a value against a [`Schema`].
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SchemaIssue {
    /// Dotted/indexed location, e.g. `colors[1]` or `author.name`.
    pub path: String,
    pub message: String,
    pub code: &'static str,
}

/// Everything validation found wrong, plus the parsed value that failed.
#[derive(Clone, Debug)]
pub struct SchemaFailure {
    pub issues: Vec<SchemaIssue>,
    pub value: Value,
}

impl fmt::Display for SchemaFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for issue in &self.issues {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", issue.path, issue.message)?;
            first = false;
        }
        Ok(())
    }
}

/// Render the schema as model-facing steering text.
///
/// The output is deterministic for a given schema: fields appear in
/// declaration order with their type label, required marker, and hint.
pub fn prompt_hint(schema: &Schema) -> String {
    let mut out = String::from(
        "Respond with a single JSON object containing exactly these fields:\n",
    );
    for field in &schema.fields {
        render_field(&mut out, field, 0);
    }
    out.push_str("Return only the JSON object, with no text outside it.");
    out
}

fn render_field(out: &mut String, field: &Field, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str("- \"");
    out.push_str(&field.name);
    out.push_str("\" (");
    out.push_str(&field_label(field));
    out.push(')');
    if let Some(hint) = &field.hint {
        out.push_str(": ");
        out.push_str(hint);
    }
    out.push('\n');
    if let Some(fields) = nested_fields(&field.kind) {
        for f in fields {
            render_field(out, f, depth + 1);
        }
    }
}

fn field_label(field: &Field) -> String {
    let mut label = kind_label(&field.kind);
    label.push_str(if field.required {
        ", required"
    } else {
        ", optional"
    });
    if let Kind::Array {
        min_items: Some(n), ..
    } = &field.kind
    {
        label.push_str(&format!(", at least {n} items"));
    }
    label
}

fn kind_label(kind: &Kind) -> String {
    match kind {
        Kind::String => "string".to_string(),
        Kind::Number => "number".to_string(),
        Kind::Boolean => "boolean".to_string(),
        Kind::Array { items, .. } => format!("array of {}", kind_label(items)),
        Kind::Object { .. } => "object".to_string(),
    }
}

fn nested_fields(kind: &Kind) -> Option<&[Field]> {
    match kind {
        Kind::Object { fields } => Some(fields),
        Kind::Array { items, .. } => nested_fields(items),
        _ => None,
    }
}

/// Check `value` against `schema`, collecting every violation.
///
/// Validation never mutates or coerces: on success the caller keeps the
/// parsed value as-is. Missing optional fields and explicit nulls in
/// optional positions pass.
pub fn validate(schema: &Schema, value: &Value) -> Result<(), Vec<SchemaIssue>> {
    let mut issues = Vec::new();
    match value.as_object() {
        Some(map) => check_fields(&schema.fields, map, "", &mut issues),
        None => issues.push(SchemaIssue {
            path: "$".to_string(),
            message: format!("expected a JSON object, got {}", type_name(value)),
            code: "NOT_AN_OBJECT",
        }),
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn check_fields(
    fields: &[Field],
    map: &Map<String, Value>,
    prefix: &str,
    issues: &mut Vec<SchemaIssue>,
) {
    for field in fields {
        let path = join_path(prefix, &field.name);
        match map.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    issues.push(SchemaIssue {
                        path,
                        message: "required field is missing".to_string(),
                        code: "REQUIRED_FIELD_MISSING",
                    });
                }
            }
            Some(v) => check_kind(&field.kind, v, &path, issues),
        }
    }
}

fn check_kind(kind: &Kind, value: &Value, path: &str, issues: &mut Vec<SchemaIssue>) {
    match kind {
        Kind::String => {
            if !value.is_string() {
                issues.push(type_mismatch(kind, value, path));
            }
        }
        Kind::Number => {
            if !value.is_number() {
                issues.push(type_mismatch(kind, value, path));
            }
        }
        Kind::Boolean => {
            if !value.is_boolean() {
                issues.push(type_mismatch(kind, value, path));
            }
        }
        Kind::Array { items, min_items } => match value.as_array() {
            None => issues.push(type_mismatch(kind, value, path)),
            Some(arr) => {
                if let Some(min) = min_items {
                    if arr.len() < *min {
                        issues.push(SchemaIssue {
                            path: path.to_string(),
                            message: format!(
                                "expected at least {min} items, got {}",
                                arr.len()
                            ),
                            code: "MIN_ITEMS",
                        });
                    }
                }
                for (i, v) in arr.iter().enumerate() {
                    check_kind(items, v, &format!("{path}[{i}]"), issues);
                }
            }
        },
        Kind::Object { fields } => match value.as_object() {
            None => issues.push(type_mismatch(kind, value, path)),
            Some(map) => check_fields(fields, map, path, issues),
        },
    }
}

fn type_mismatch(kind: &Kind, value: &Value, path: &str) -> SchemaIssue {
    SchemaIssue {
        path: path.to_string(),
        message: format!("expected {}, got {}", kind_label(kind), type_name(value)),
        code: "TYPE_MISMATCH",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
