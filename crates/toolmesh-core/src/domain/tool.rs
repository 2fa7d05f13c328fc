//! Tool catalogue and invocation result types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// A tool advertised by an upstream server.
///
/// Names are unique within one server, not globally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON-Schema-like input contract
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,

    /// Optional output contract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDescriptor {
    /// Create a tool with an empty object input schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: empty_object_schema(),
            output_schema: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Content type ("text", "image", ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Text payload; empty for non-text blocks
    #[serde(default)]
    pub text: String,

    /// Remaining fields of non-text blocks (e.g. `data`, `mimeType`)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentItem {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            extra: Map::new(),
        }
    }
}

/// Result of a tool invocation.
///
/// Failures travel in-band: `is_error = Some(true)` with a readable message
/// in `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content blocks
    #[serde(default)]
    pub content: Vec<ContentItem>,

    /// Set when the call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: None,
        }
    }

    /// Create an in-band error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            is_error: Some(true),
        }
    }

    /// Whether this result reports a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// Concatenated text of all text blocks.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter(|item| item.kind == "text")
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
