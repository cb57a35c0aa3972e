//! Per-stage shape validation.
//!
//! Shape problems are reported, never fatal: the executor logs them, emits a
//! warning event and stores them on the output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One structural problem in a parsed output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeError {
    /// Dotted path of the offending field.
    pub path: String,
    /// What is wrong.
    pub message: String,
}

impl ShapeError {
    /// Creates a shape error.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Checks the structure of a stage's parsed output.
pub trait ShapeValidator: Send + Sync + fmt::Debug {
    /// Returns every problem found, or `Ok(())`.
    fn validate(&self, value: &Value) -> Result<(), Vec<ShapeError>>;
}

/// Accepts any object.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAny;

impl ShapeValidator for AcceptAny {
    fn validate(&self, _value: &Value) -> Result<(), Vec<ShapeError>> {
        Ok(())
    }
}

/// The expected JSON kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Anything non-null.
    Any,
    /// A string.
    String,
    /// A number.
    Number,
    /// A boolean.
    Bool,
    /// An array, possibly empty.
    Array,
    /// An array with at least one element.
    NonEmptyArray,
    /// An object.
    Object,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => !value.is_null(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::NonEmptyArray => value.as_array().is_some_and(|a| !a.is_empty()),
            Self::Object => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Any => "a value",
            Self::String => "a string",
            Self::Number => "a number",
            Self::Bool => "a boolean",
            Self::Array => "an array",
            Self::NonEmptyArray => "a non-empty array",
            Self::Object => "an object",
        }
    }
}

#[derive(Debug, Clone)]
struct FieldRule {
    path: String,
    kind: FieldKind,
    required: bool,
}

/// Declarative field rules over an object, addressed by dotted path.
#[derive(Debug, Clone, Default)]
pub struct ObjectShape {
    rules: Vec<FieldRule>,
}

impl ObjectShape {
    /// Creates an empty shape.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `path` to be present with `kind`.
    #[must_use]
    pub fn require(mut self, path: impl Into<String>, kind: FieldKind) -> Self {
        self.rules.push(FieldRule {
            path: path.into(),
            kind,
            required: true,
        });
        self
    }

    /// Checks `path` against `kind` only when present and non-null.
    #[must_use]
    pub fn optional(mut self, path: impl Into<String>, kind: FieldKind) -> Self {
        self.rules.push(FieldRule {
            path: path.into(),
            kind,
            required: false,
        });
        self
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |v, segment| v.get(segment))
}

impl ShapeValidator for ObjectShape {
    fn validate(&self, value: &Value) -> Result<(), Vec<ShapeError>> {
        if !value.is_object() {
            return Err(vec![ShapeError::new("$", "expected an object")]);
        }
        let problems: Vec<ShapeError> = self
            .rules
            .iter()
            .filter_map(|rule| match lookup(value, &rule.path) {
                None | Some(Value::Null) if rule.required => {
                    Some(ShapeError::new(&rule.path, "required field is missing"))
                }
                None | Some(Value::Null) => None,
                Some(found) if !rule.kind.matches(found) => Some(ShapeError::new(
                    &rule.path,
                    format!("expected {}", rule.kind.describe()),
                )),
                Some(_) => None,
            })
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
