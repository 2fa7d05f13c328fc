//! Compiles tool input schemas into argument validators.
//!
//! Compilation never fails. Objects are permissive: undeclared properties
//! pass through and only `required` ones are mandatory. Anything the schema
//! grammar cannot classify accepts every value.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use toolmesh_core::SchemaNode;

/// A rejected argument, located by a `$.field[0]` style path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

type Check = Arc<dyn Fn(&Value, &str) -> Result<(), ValidationError> + Send + Sync>;

/// Compiled validator for one tool's input.
#[derive(Clone)]
pub struct Validator {
    node: SchemaNode,
    check: Check,
}

impl Validator {
    /// Validate tool arguments.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        (self.check)(value, "$")
    }

    /// The classified schema this validator was built from.
    pub const fn node(&self) -> &SchemaNode {
        &self.node
    }

    /// Whether every value passes.
    pub fn accepts_anything(&self) -> bool {
        self.node == SchemaNode::Any
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("expects", &self.node.describe())
            .finish_non_exhaustive()
    }
}

/// Compile a tool's input schema.
pub fn compile(schema: &Value) -> Validator {
    let node = SchemaNode::parse(schema);
    let check = build(&node);
    Validator { node, check }
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

fn mismatch(path: &str, expected: &str, value: &Value) -> ValidationError {
    ValidationError::new(path, format!("expected {expected}, got {}", type_name(value)))
}

fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
}

fn build(node: &SchemaNode) -> Check {
    match node {
        SchemaNode::Any => Arc::new(|_, _| Ok(())),

        SchemaNode::Null => Arc::new(|value, path| {
            if value.is_null() {
                Ok(())
            } else {
                Err(mismatch(path, "null", value))
            }
        }),

        SchemaNode::Boolean => Arc::new(|value, path| {
            if value.is_boolean() {
                Ok(())
            } else {
                Err(mismatch(path, "boolean", value))
            }
        }),

        SchemaNode::Number { integer } => {
            let integer = *integer;
            Arc::new(move |value, path| {
                if !value.is_number() {
                    return Err(mismatch(path, if integer { "integer" } else { "number" }, value));
                }
                if integer && !is_integer(value) {
                    return Err(ValidationError::new(path, format!("expected integer, got {value}")));
                }
                Ok(())
            })
        }

        SchemaNode::String { allowed } => {
            let allowed = allowed.clone();
            Arc::new(move |value, path| {
                let Some(text) = value.as_str() else {
                    return Err(mismatch(path, "string", value));
                };
                match &allowed {
                    Some(values) if !values.contains(text) => {
                        let options: Vec<&str> = values.iter().map(String::as_str).collect();
                        Err(ValidationError::new(
                            path,
                            format!("'{text}' is not one of [{}]", options.join(", ")),
                        ))
                    }
                    _ => Ok(()),
                }
            })
        }

        SchemaNode::Array { items } => {
            let item = build(items);
            Arc::new(move |value, path| {
                let Some(elements) = value.as_array() else {
                    return Err(mismatch(path, "array", value));
                };
                for (index, element) in elements.iter().enumerate() {
                    item(element, &format!("{path}[{index}]"))?;
                }
                Ok(())
            })
        }

        SchemaNode::Object {
            properties,
            required,
        } => {
            let properties: Vec<(String, Check)> = properties
                .iter()
                .map(|(name, schema)| (name.clone(), build(schema)))
                .collect();
            let required: Vec<String> = required.iter().cloned().collect();

            Arc::new(move |value, path| {
                let Some(fields) = value.as_object() else {
                    return Err(mismatch(path, "object", value));
                };
                for name in &required {
                    if !fields.contains_key(name) {
                        return Err(ValidationError::new(
                            &format!("{path}.{name}"),
                            "required property is missing",
                        ));
                    }
                }
                for (name, check) in &properties {
                    if let Some(field) = fields.get(name) {
                        check(field, &format!("{path}.{name}"))?;
                    }
                }
                Ok(())
            })
        }

        SchemaNode::AnyOf(branches) => {
            let label = node.describe();
            let branches: Vec<Check> = branches.iter().map(build).collect();
            Arc::new(move |value, path| {
                if branches.iter().any(|branch| branch(value, path).is_ok()) {
                    Ok(())
                } else {
                    Err(mismatch(path, &label, value))
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_topic() {
        let validator = compile(&json!({
            "type": "object",
            "properties": {"topic": {"type": "string"}},
            "required": ["topic"]
        }));

        assert!(validator.validate(&json!({"topic": "x"})).is_ok());

        let err = validator.validate(&json!({})).unwrap_err();
        assert_eq!(err.path, "$.topic");
        assert_eq!(err.message, "required property is missing");
    }

    #[test]
    fn test_optional_and_extra_properties_pass() {
        let validator = compile(&json!({
            "type": "object",
            "properties": {"limit": {"type": "integer"}}
        }));

        assert!(validator.validate(&json!({})).is_ok());
        assert!(validator.validate(&json!({"limit": 5, "unknown": true})).is_ok());

        let err = validator.validate(&json!({"limit": 2.5})).unwrap_err();
        assert_eq!(err.path, "$.limit");
    }

    #[test]
    fn test_enum_is_closed() {
        let validator = compile(&json!({"type": "string", "enum": ["asc", "desc"]}));
        assert!(validator.validate(&json!("asc")).is_ok());

        let err = validator.validate(&json!("sideways")).unwrap_err();
        assert_eq!(err.message, "'sideways' is not one of [asc, desc]");
    }

    #[test]
    fn test_array_elements_are_located() {
        let validator = compile(&json!({
            "type": "object",
            "properties": {"ids": {"type": "array", "items": {"type": "number"}}}
        }));

        let err = validator
            .validate(&json!({"ids": [1, 2, "three"]}))
            .unwrap_err();
        assert_eq!(err.path, "$.ids[2]");
        assert_eq!(err.message, "expected number, got string");
    }

    #[test]
    fn test_union_accepts_any_branch() {
        let validator = compile(&json!({"anyOf": [{"type": "string"}, {"type": "null"}]}));
        assert!(validator.validate(&json!("x")).is_ok());
        assert!(validator.validate(&Value::Null).is_ok());
        assert!(validator.validate(&json!(3)).is_err());
    }

    #[test]
    fn test_single_branch_union_collapses() {
        let validator = compile(&json!({"oneOf": [{"type": "boolean"}]}));
        assert_eq!(validator.node(), &SchemaNode::Boolean);
    }

    #[test]
    fn test_malformed_schemas_accept_anything() {
        let samples = [
            json!(null),
            json!("object"),
            json!(42),
            json!([]),
            json!({"type": "tuple"}),
            json!({"type": 7}),
            json!({"oneOf": []}),
            json!({"oneOf": "nope"}),
            json!({"anyOf": [{"type": "string"}, {"type": "mystery"}]}),
            json!({"allOf": [{"type": "string"}, {"type": "number"}]}),
        ];

        for schema in &samples {
            let validator = compile(schema);
            assert!(validator.accepts_anything(), "schema {schema} did not degrade");
            for value in [json!(null), json!(3), json!("x"), json!({"anything": [1, "two"]})] {
                assert!(validator.validate(&value).is_ok(), "schema {schema} rejected {value}");
            }
        }
    }

    #[test]
    fn test_malformed_object_fields_keep_the_object_check() {
        let validator = compile(&json!({"type": "object", "properties": "nope", "required": 5}));
        assert!(!validator.accepts_anything());

        assert!(validator.validate(&json!({"anything": [1, "two"]})).is_ok());
        let err = validator.validate(&json!("text")).unwrap_err();
        assert_eq!(err.message, "expected object, got string");
    }
}
