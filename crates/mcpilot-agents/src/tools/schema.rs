use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::providers::{JsonObject, ToolDefinition};

/// Tool description as a provider reported it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: RawToolSchema,
}

/// Input schema with every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawToolSchema {
    #[serde(default, rename = "type")]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub properties: Option<JsonObject>,
    #[serde(default)]
    pub required: Option<Vec<String>>,
}

impl RawToolSchema {
    /// Parse a schema value leniently; shapes that do not fit are treated as
    /// an empty schema and fixed up by [`normalize`].
    pub fn from_value(value: serde_json::Value) -> Self {
        match serde_json::from_value(value) {
            Ok(schema) => schema,
            Err(e) => {
                warn!("unusable tool input schema, using defaults: {e}");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
}

/// Input schema with every field present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: JsonObject,
    pub required: Vec<String>,
}

/// Fill in what a provider left out: `type` defaults to `"object"`,
/// `properties` to `{}` and `required` to `[]`.
pub fn normalize(raw: RawToolDescriptor) -> ToolDescriptor {
    let RawToolSchema {
        schema_type,
        properties,
        required,
    } = raw.input_schema;

    ToolDescriptor {
        name: raw.name,
        description: raw.description,
        input_schema: ToolSchema {
            schema_type: schema_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "object".to_string()),
            properties: properties.unwrap_or_default(),
            required: required.unwrap_or_default(),
        },
    }
}

impl From<RawToolDescriptor> for ToolDescriptor {
    fn from(raw: RawToolDescriptor) -> Self {
        normalize(raw)
    }
}

impl ToolDescriptor {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": self.input_schema.schema_type,
                "properties": self.input_schema.properties,
                "required": self.input_schema.required,
            }),
        }
    }
}
