//! Structural schemas for tool contracts.
//!
//! An [`ObjectSchema`] is both the description advertised to the model
//! ([`ObjectSchema::describe`]) and the validating parser applied to whatever
//! the model or a remote server sends back ([`ObjectSchema::validate`]).
//!
//! Coercion policy: a string that looks like a number is accepted where a
//! number is expected. Every other type mismatch is rejected.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Number, Value};

/// Type of a single field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Number,
    Integer,
    Boolean,
    String { min_length: Option<usize> },
    Object(ObjectSchema),
}

impl FieldType {
    pub fn string() -> Self {
        Self::String { min_length: None }
    }

    fn json_type(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::String { .. } => "string",
            Self::Object(_) => "object",
        }
    }
}

/// A named field of an object schema.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub description: Option<String>,
    pub required: bool,
}

/// An object with named, typed fields. Field order is preserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectSchema {
    fields: Vec<FieldSchema>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn field(mut self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.fields.push(FieldSchema {
            name: name.to_string(),
            field_type,
            description: Some(description.to_string()).filter(|d| !d.is_empty()),
            required: true,
        });
        self
    }

    /// Add an optional field.
    pub fn optional(mut self, name: &str, field_type: FieldType, description: &str) -> Self {
        self = self.field(name, field_type, description);
        if let Some(last) = self.fields.last_mut() {
            last.required = false;
        }
        self
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// JSON-Schema-like description of this object, as sent to the model.
    pub fn describe(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            let mut prop = match &field.field_type {
                FieldType::Object(inner) => inner.describe(),
                FieldType::String {
                    min_length: Some(min),
                } => json!({ "type": "string", "minLength": min }),
                other => json!({ "type": other.json_type() }),
            };
            if let (Some(desc), Some(obj)) = (&field.description, prop.as_object_mut()) {
                obj.insert("description".into(), json!(desc));
            }
            properties.insert(field.name.clone(), prop);

            if field.required {
                required.push(json!(field.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// [`describe`](Self::describe) with a `title`, used for response-format hints.
    pub fn describe_titled(&self, title: &str) -> Value {
        let mut schema = self.describe();
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("title".into(), json!(title));
        }
        schema
    }

    /// Validate and coerce `value` against this schema.
    ///
    /// Unknown fields are dropped. All failing fields are reported at once.
    pub fn validate(&self, value: &Value) -> Result<Map<String, Value>, ValidationError> {
        let mut issues = Vec::new();
        let out = self.validate_at("", value, &mut issues);
        match out {
            Some(map) if issues.is_empty() => Ok(map),
            _ => Err(ValidationError::new(issues)),
        }
    }

    pub fn parse_input(&self, value: &Value) -> Result<ValidatedInput, ValidationError> {
        self.validate(value).map(ValidatedInput)
    }

    pub fn parse_output(&self, value: &Value) -> Result<ValidatedOutput, ValidationError> {
        self.validate(value).map(ValidatedOutput)
    }

    fn validate_at(
        &self,
        prefix: &str,
        value: &Value,
        issues: &mut Vec<FieldIssue>,
    ) -> Option<Map<String, Value>> {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                issues.push(FieldIssue::new(
                    prefix,
                    format!("expected object, got {}", describe_value(value)),
                ));
                return None;
            }
        };

        let mut out = Map::new();
        for field in &self.fields {
            let path = join_path(prefix, &field.name);
            match obj.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        issues.push(FieldIssue::new(&path, "required field is missing"));
                    }
                }
                Some(raw) => {
                    if let Some(coerced) = coerce(&field.field_type, &path, raw, issues) {
                        out.insert(field.name.clone(), coerced);
                    }
                }
            }
        }
        Some(out)
    }
}

fn coerce(
    field_type: &FieldType,
    path: &str,
    raw: &Value,
    issues: &mut Vec<FieldIssue>,
) -> Option<Value> {
    let mismatch = |issues: &mut Vec<FieldIssue>| -> Option<Value> {
        issues.push(FieldIssue::new(
            path,
            format!(
                "expected {}, got {}",
                field_type.json_type(),
                describe_value(raw)
            ),
        ));
        None
    };

    match field_type {
        FieldType::Number => match raw {
            Value::Number(_) => Some(raw.clone()),
            Value::String(s) => match parse_numeric(s) {
                Some(n) => Some(Value::Number(n)),
                None => mismatch(issues),
            },
            _ => mismatch(issues),
        },
        FieldType::Integer => {
            let n = match raw {
                Value::Number(n) => Some(n.clone()),
                Value::String(s) => parse_numeric(s),
                _ => None,
            };
            match n.and_then(|n| as_integer(&n)) {
                Some(i) => Some(json!(i)),
                None => mismatch(issues),
            }
        }
        FieldType::Boolean => match raw {
            Value::Bool(_) => Some(raw.clone()),
            _ => mismatch(issues),
        },
        FieldType::String { min_length } => match raw {
            Value::String(s) => {
                if let Some(min) = min_length {
                    if s.chars().count() < *min {
                        issues.push(FieldIssue::new(
                            path,
                            format!("must be at least {} characters", min),
                        ));
                        return None;
                    }
                }
                Some(raw.clone())
            }
            _ => mismatch(issues),
        },
        FieldType::Object(inner) => inner.validate_at(path, raw, issues).map(Value::Object),
    }
}

/// Parse a numeric-looking string. Integers stay integers.
fn parse_numeric(s: &str) -> Option<Number> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Number::from(i));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

fn as_integer(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// A single field that failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldIssue {
    /// Dotted path of the field; empty for the root value.
    pub path: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Schema validation failure naming every offending field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<FieldIssue>) -> Self {
        Self { issues }
    }

    pub fn issues(&self) -> &[FieldIssue] {
        &self.issues
    }

    /// Paths of the fields that failed.
    pub fn fields(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.path.as_str()).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .issues
            .iter()
            .map(|i| {
                let path = if i.path.is_empty() { "<root>" } else { &i.path };
                format!("{}: {}", path, i.message)
            })
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

macro_rules! define_validated {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Serialize)]
        #[serde(transparent)]
        pub struct $name(Map<String, Value>);

        impl $name {
            pub fn get(&self, key: &str) -> Option<&Value> {
                self.0.get(key)
            }

            pub fn as_map(&self) -> &Map<String, Value> {
                &self.0
            }

            pub fn to_value(&self) -> Value {
                Value::Object(self.0.clone())
            }

            pub fn into_value(self) -> Value {
                Value::Object(self.0)
            }

            /// Deserialize into a typed view of the validated fields.
            pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
                serde_json::from_value(self.to_value())
            }
        }
    };
}

define_validated!(
    ValidatedInput,
    "Tool arguments that passed the tool's input contract."
);
define_validated!(
    ValidatedOutput,
    "Tool result that passed the tool's output contract."
);

/// The input and output contracts of one tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolContract {
    pub input: ObjectSchema,
    pub output: ObjectSchema,
}
