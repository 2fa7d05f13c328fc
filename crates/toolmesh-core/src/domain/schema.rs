//! Input-schema grammar.
//!
//! Upstream tools describe their arguments with a JSON-Schema-like document.
//! [`SchemaNode::parse`] classifies that document into a closed set of
//! variants. Parsing never fails: anything malformed or unrecognized becomes
//! [`SchemaNode::Any`].

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Classified schema node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    /// String, optionally restricted to a closed set of values
    String { allowed: Option<BTreeSet<String>> },
    /// Number; `integer` rejects fractional values
    Number { integer: bool },
    Boolean,
    Null,
    /// Object with declared properties; only `required` names are mandatory
    Object {
        properties: BTreeMap<String, SchemaNode>,
        required: BTreeSet<String>,
    },
    /// Homogeneous array
    Array { items: Box<SchemaNode> },
    /// Value must match at least one branch
    AnyOf(Vec<SchemaNode>),
    /// Accepts anything
    Any,
}

impl SchemaNode {
    /// Classify a schema document.
    #[must_use]
    pub fn parse(schema: &Value) -> Self {
        match schema {
            Value::Object(map) => Self::parse_object(map),
            _ => Self::Any,
        }
    }

    fn parse_object(map: &Map<String, Value>) -> Self {
        for combinator in ["oneOf", "anyOf"] {
            if let Some(Value::Array(branches)) = map.get(combinator) {
                return Self::union(branches.iter().map(Self::parse).collect());
            }
        }

        if let Some(Value::Array(branches)) = map.get("allOf") {
            if let [single] = branches.as_slice() {
                return Self::parse(single);
            }
            return Self::Any;
        }

        if let Some(constant) = map.get("const") {
            return match constant {
                Value::String(s) => Self::String {
                    allowed: Some(BTreeSet::from([s.clone()])),
                },
                _ => Self::Any,
            };
        }

        if let Some(Value::Array(values)) = map.get("enum") {
            return Self::string_enum(values);
        }

        match map.get("type") {
            Some(Value::String(kind)) => Self::from_type(kind, map),
            Some(Value::Array(kinds)) => Self::union(
                kinds
                    .iter()
                    .map(|kind| kind.as_str().map_or(Self::Any, |k| Self::from_type(k, map)))
                    .collect(),
            ),
            Some(_) => Self::Any,
            None if map.contains_key("properties") => Self::object(map),
            None if map.contains_key("items") => Self::array(map),
            None => Self::Any,
        }
    }

    fn from_type(kind: &str, map: &Map<String, Value>) -> Self {
        match kind {
            "string" => Self::String { allowed: None },
            "number" => Self::Number { integer: false },
            "integer" => Self::Number { integer: true },
            "boolean" => Self::Boolean,
            "null" => Self::Null,
            "object" => Self::object(map),
            "array" => Self::array(map),
            _ => Self::Any,
        }
    }

    fn string_enum(values: &[Value]) -> Self {
        let allowed: Option<BTreeSet<String>> = values
            .iter()
            .map(|v| v.as_str().map(ToString::to_string))
            .collect();

        match allowed {
            Some(allowed) if !allowed.is_empty() => Self::String {
                allowed: Some(allowed),
            },
            _ => Self::Any,
        }
    }

    fn object(map: &Map<String, Value>) -> Self {
        let properties = map
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| (name.clone(), Self::parse(schema)))
                    .collect()
            })
            .unwrap_or_default();

        let required = map
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self::Object {
            properties,
            required,
        }
    }

    fn array(map: &Map<String, Value>) -> Self {
        let items = match map.get("items") {
            Some(Value::Array(tuple)) => Self::union(tuple.iter().map(Self::parse).collect()),
            Some(schema) => Self::parse(schema),
            None => Self::Any,
        };

        Self::Array {
            items: Box::new(items),
        }
    }

    /// Collapse a list of branches: one branch stands alone, any
    /// accept-anything branch makes the whole union accept anything.
    fn union(mut branches: Vec<Self>) -> Self {
        if branches.is_empty() || branches.contains(&Self::Any) {
            return Self::Any;
        }
        if branches.len() == 1 {
            return branches.remove(0);
        }
        Self::AnyOf(branches)
    }

    /// Short label for error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::String { allowed: None } => "string".to_string(),
            Self::String {
                allowed: Some(values),
            } => {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                format!("one of [{}]", values.join(", "))
            }
            Self::Number { integer: true } => "integer".to_string(),
            Self::Number { integer: false } => "number".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Null => "null".to_string(),
            Self::Object { .. } => "object".to_string(),
            Self::Array { .. } => "array".to_string(),
            Self::AnyOf(branches) => {
                let labels: Vec<String> = branches.iter().map(Self::describe).collect();
                format!("any of ({})", labels.join(" | "))
            }
            Self::Any => "any".to_string(),
        }
    }
}
