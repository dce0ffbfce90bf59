//! Typed parameter schemas for tools
//!
//! Tool-servers describe their parameters with JSON Schema. [`ParamSchema`]
//! is the subset that matters for calling a tool: types, required
//! properties, enums, defaults and nesting. Arguments are checked against it
//! before anything is sent to the server.

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// The schema document itself is unusable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schema at {path}: {reason}")]
pub struct SchemaError {
    pub path: String,
    pub reason: String,
}

/// Arguments do not satisfy a schema
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid argument at {path}: {reason}")]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalProperties {
    Allowed,
    Denied,
    Schema(Box<ParamSchema>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    /// No constraint on the value's type
    Any,
    Array {
        items: Option<Box<ParamSchema>>,
    },
    Object {
        properties: IndexMap<String, ParamSchema>,
        required: Vec<String>,
        additional: AdditionalProperties,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSchema {
    pub kind: SchemaKind,
    /// `null` is accepted in addition to `kind`
    pub nullable: bool,
    pub description: Option<String>,
    pub default: Option<Value>,
    /// Allowed values (`enum`)
    pub choices: Option<Vec<Value>>,
}

impl ParamSchema {
    fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            nullable: false,
            description: None,
            default: None,
            choices: None,
        }
    }

    /// An object with no declared properties, accepting anything
    pub fn empty_object() -> Self {
        Self::of(SchemaKind::Object {
            properties: IndexMap::new(),
            required: Vec::new(),
            additional: AdditionalProperties::Allowed,
        })
    }

    /// Parse a tool's `inputSchema`. A missing schema means "no parameters";
    /// a present one must describe an object.
    pub fn for_tool_input(schema: Option<&Value>) -> Result<Self, SchemaError> {
        let schema = match schema {
            None | Some(Value::Null) => return Ok(Self::empty_object()),
            Some(schema) => Self::parse_at(schema, "$")?,
        };
        if matches!(schema.kind, SchemaKind::Object { .. }) {
            Ok(schema)
        } else {
            Err(SchemaError {
                path: "$".to_string(),
                reason: format!(
                    "tool input must be an object schema, got {}",
                    kind_name(&schema.kind)
                ),
            })
        }
    }

    pub fn parse(schema: &Value) -> Result<Self, SchemaError> {
        Self::parse_at(schema, "$")
    }

    fn parse_at(schema: &Value, path: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: String| SchemaError {
            path: path.to_string(),
            reason,
        };

        let obj = match schema {
            Value::Object(obj) => obj,
            Value::Bool(true) => return Ok(Self::of(SchemaKind::Any)),
            other => return Err(invalid(format!("expected a schema object, got {other}"))),
        };

        let (type_name, nullable) = match obj.get("type") {
            None => (None, false),
            Some(Value::String(t)) => (Some(t.as_str()), false),
            Some(Value::Array(types)) => {
                let mut names = Vec::with_capacity(types.len());
                for t in types {
                    names.push(
                        t.as_str()
                            .ok_or_else(|| invalid(format!("type entries must be strings, got {t}")))?,
                    );
                }
                let nullable = names.contains(&"null");
                let non_null: Vec<&str> = names.into_iter().filter(|t| *t != "null").collect();
                match non_null.as_slice() {
                    [] => (Some("null"), false),
                    [single] => (Some(*single), nullable),
                    // Unions beyond T | null are accepted without type checking
                    _ => (Some("any"), nullable),
                }
            }
            Some(other) => return Err(invalid(format!("type must be a string, got {other}"))),
        };

        // Untyped schemas are inferred from their keywords
        let type_name = type_name.unwrap_or(if obj.contains_key("properties") {
            "object"
        } else if obj.contains_key("items") {
            "array"
        } else {
            "any"
        });

        let kind = match type_name {
            "string" => SchemaKind::String,
            "number" => SchemaKind::Number,
            "integer" => SchemaKind::Integer,
            "boolean" => SchemaKind::Boolean,
            "null" => SchemaKind::Null,
            "any" => SchemaKind::Any,
            "array" => SchemaKind::Array {
                items: match obj.get("items") {
                    None => None,
                    Some(items) => Some(Box::new(Self::parse_at(items, &format!("{path}[]"))?)),
                },
            },
            "object" => parse_object(obj, path)?,
            other => return Err(invalid(format!("unknown type {other:?}"))),
        };

        let description = match obj.get("description") {
            None => None,
            Some(Value::String(d)) => Some(d.clone()),
            Some(other) => return Err(invalid(format!("description must be a string, got {other}"))),
        };

        let choices = match obj.get("enum") {
            None => None,
            Some(Value::Array(values)) if !values.is_empty() => Some(values.clone()),
            Some(other) => return Err(invalid(format!("enum must be a non-empty array, got {other}"))),
        };

        Ok(Self {
            kind,
            nullable,
            description,
            default: obj.get("default").cloned(),
            choices,
        })
    }

    /// Check `value` and return it with defaults filled in
    pub fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        self.validate_at(value, "$")
    }

    /// As [`validate`](Self::validate), treating absent arguments as `{}`
    pub fn validate_arguments(&self, args: Option<&Value>) -> Result<Value, ValidationError> {
        match args {
            None | Some(Value::Null) => self.validate(&Value::Object(Map::new())),
            Some(args) => self.validate(args),
        }
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<Value, ValidationError> {
        let fail = |reason: String| ValidationError {
            path: path.to_string(),
            reason,
        };

        if value.is_null() && self.nullable {
            return Ok(Value::Null);
        }

        let checked = match &self.kind {
            SchemaKind::String if value.is_string() => value.clone(),
            SchemaKind::Number if value.is_number() => value.clone(),
            SchemaKind::Integer if is_integer(value) => value.clone(),
            SchemaKind::Boolean if value.is_boolean() => value.clone(),
            SchemaKind::Null if value.is_null() => Value::Null,
            SchemaKind::Any => value.clone(),
            SchemaKind::Array { items } if value.is_array() => {
                let values = value.as_array().map(Vec::as_slice).unwrap_or_default();
                match items {
                    None => value.clone(),
                    Some(items) => Value::Array(
                        values
                            .iter()
                            .enumerate()
                            .map(|(i, v)| items.validate_at(v, &format!("{path}[{i}]")))
                            .collect::<Result<_, _>>()?,
                    ),
                }
            }
            SchemaKind::Object {
                properties,
                required,
                additional,
            } => {
                let Value::Object(given) = value else {
                    return Err(fail(format!("expected object, got {}", json_type(value))));
                };
                let mut out = Map::new();

                for (name, schema) in properties {
                    let child = format!("{path}.{name}");
                    match given.get(name) {
                        Some(v) => {
                            out.insert(name.clone(), schema.validate_at(v, &child)?);
                        }
                        None => {
                            if let Some(default) = &schema.default {
                                out.insert(name.clone(), default.clone());
                            }
                        }
                    }
                }

                for name in required {
                    if !out.contains_key(name) && !given.contains_key(name) {
                        return Err(fail(format!("missing required property {name:?}")));
                    }
                }

                for (name, v) in given {
                    if properties.contains_key(name) {
                        continue;
                    }
                    match additional {
                        AdditionalProperties::Allowed => {
                            out.insert(name.clone(), v.clone());
                        }
                        AdditionalProperties::Denied => {
                            return Err(fail(format!("unexpected property {name:?}")));
                        }
                        AdditionalProperties::Schema(schema) => {
                            out.insert(name.clone(), schema.validate_at(v, &format!("{path}.{name}"))?);
                        }
                    }
                }
                Value::Object(out)
            }
            other => {
                return Err(fail(format!(
                    "expected {}, got {}",
                    kind_name(other),
                    json_type(value)
                )));
            }
        };

        if let Some(choices) = &self.choices
            && !choices.contains(&checked)
        {
            let allowed: Vec<String> = choices.iter().map(Value::to_string).collect();
            return Err(fail(format!(
                "{checked} is not one of [{}]",
                allowed.join(", ")
            )));
        }

        Ok(checked)
    }

    /// Short type label for listings, e.g. `string`, `array<integer>`
    pub fn type_label(&self) -> String {
        let base = match &self.kind {
            SchemaKind::Array { items: Some(items) } => format!("array<{}>", items.type_label()),
            other => kind_name(other).to_string(),
        };
        if self.nullable {
            format!("{base}?")
        } else {
            base
        }
    }

    /// Declared properties with whether each is required, in declaration order
    pub fn parameters(&self) -> Vec<(&str, &ParamSchema, bool)> {
        match &self.kind {
            SchemaKind::Object {
                properties,
                required,
                ..
            } => properties
                .iter()
                .map(|(name, schema)| (name.as_str(), schema, required.contains(name)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn parse_object(obj: &Map<String, Value>, path: &str) -> Result<SchemaKind, SchemaError> {
    let invalid = |reason: String| SchemaError {
        path: path.to_string(),
        reason,
    };

    let mut properties = IndexMap::new();
    match obj.get("properties") {
        None => {}
        Some(Value::Object(props)) => {
            for (name, prop) in props {
                let parsed = ParamSchema::parse_at(prop, &format!("{path}.{name}"))?;
                properties.insert(name.clone(), parsed);
            }
        }
        Some(other) => return Err(invalid(format!("properties must be an object, got {other}"))),
    }

    let required = match obj.get("required") {
        None => Vec::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|n| {
                n.as_str()
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| invalid(format!("required entries must be strings, got {n}")))
            })
            .collect::<Result<_, _>>()?,
        Some(other) => return Err(invalid(format!("required must be an array, got {other}"))),
    };

    let additional = match obj.get("additionalProperties") {
        None | Some(Value::Bool(true)) => AdditionalProperties::Allowed,
        Some(Value::Bool(false)) => AdditionalProperties::Denied,
        Some(schema) => AdditionalProperties::Schema(Box::new(ParamSchema::parse_at(
            schema,
            &format!("{path}.*"),
        )?)),
    };

    Ok(SchemaKind::Object {
        properties,
        required,
        additional,
    })
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}

fn kind_name(kind: &SchemaKind) -> &'static str {
    match kind {
        SchemaKind::String => "string",
        SchemaKind::Number => "number",
        SchemaKind::Integer => "integer",
        SchemaKind::Boolean => "boolean",
        SchemaKind::Null => "null",
        SchemaKind::Any => "any",
        SchemaKind::Array { .. } => "array",
        SchemaKind::Object { .. } => "object",
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issue_schema() -> ParamSchema {
        ParamSchema::for_tool_input(Some(&json!({
            "type": "object",
            "properties": {
                "owner": {"type": "string", "description": "Repository owner"},
                "repo": {"type": "string"},
                "state": {"type": "string", "enum": ["open", "closed", "all"], "default": "open"},
                "perPage": {"type": "integer"},
                "labels": {"type": "array", "items": {"type": "string"}},
                "filter": {
                    "type": "object",
                    "properties": {"since": {"type": ["string", "null"]}},
                    "additionalProperties": false
                }
            },
            "required": ["owner", "repo"]
        })))
        .unwrap()
    }

    #[test]
    fn test_missing_schema_is_empty_object() {
        let schema = ParamSchema::for_tool_input(None).unwrap();
        assert_eq!(schema, ParamSchema::empty_object());
        assert_eq!(schema.validate_arguments(None).unwrap(), json!({}));
    }

    #[test]
    fn test_top_level_must_be_object() {
        let err = ParamSchema::for_tool_input(Some(&json!({"type": "string"}))).unwrap_err();
        assert_eq!(err.path, "$");
        assert!(ParamSchema::for_tool_input(Some(&json!("object"))).is_err());
        assert!(ParamSchema::for_tool_input(Some(&json!({"type": "widget"}))).is_err());
        assert!(
            ParamSchema::for_tool_input(Some(&json!({"type": "object", "properties": []})))
                .is_err()
        );
    }

    #[test]
    fn test_defaults_filled() {
        let args = issue_schema()
            .validate(&json!({"owner": "rust-lang", "repo": "rust"}))
            .unwrap();
        assert_eq!(args, json!({"owner": "rust-lang", "repo": "rust", "state": "open"}));
    }

    #[test]
    fn test_rejections() {
        let schema = issue_schema();

        let err = schema.validate(&json!({"owner": "rust-lang"})).unwrap_err();
        assert!(err.reason.contains("repo"));

        let err = schema
            .validate(&json!({"owner": "a", "repo": "b", "perPage": "ten"}))
            .unwrap_err();
        assert_eq!(err.path, "$.perPage");

        let err = schema
            .validate(&json!({"owner": "a", "repo": "b", "state": "merged"}))
            .unwrap_err();
        assert_eq!(err.path, "$.state");

        let err = schema
            .validate(&json!({"owner": "a", "repo": "b", "labels": ["bug", 3]}))
            .unwrap_err();
        assert_eq!(err.path, "$.labels[1]");

        let err = schema
            .validate(&json!({"owner": "a", "repo": "b", "filter": {"until": "x"}}))
            .unwrap_err();
        assert_eq!(err.path, "$.filter");
    }

    #[test]
    fn test_nullable_and_integers() {
        let schema = issue_schema();
        schema
            .validate(&json!({"owner": "a", "repo": "b", "filter": {"since": null}, "perPage": 30.0}))
            .unwrap();
        assert!(
            schema
                .validate(&json!({"owner": "a", "repo": "b", "perPage": 2.5}))
                .is_err()
        );
    }

    #[test]
    fn test_extra_properties_pass_through() {
        let args = issue_schema()
            .validate(&json!({"owner": "a", "repo": "b", "extra": 1}))
            .unwrap();
        assert_eq!(args["extra"], json!(1));
    }

    #[test]
    fn test_type_labels() {
        let schema = issue_schema();
        let params = schema.parameters();
        assert_eq!((params[0].0, params[0].2), ("owner", true));
        assert_eq!((params[2].0, params[2].2), ("state", false));
        let labels: Vec<String> = params.iter().map(|(_, s, _)| s.type_label()).collect();
        assert_eq!(
            labels,
            ["string", "string", "string", "integer", "array<string>", "object"]
        );
    }
}
