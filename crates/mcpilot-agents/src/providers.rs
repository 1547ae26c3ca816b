use async_trait::async_trait;
use futures::stream::BoxStream;
use mcpilot_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// A JSON object, as used for tool arguments and schema properties.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Trait for completion-service integrations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "openai").
    fn provider_id(&self) -> &str;

    /// Start a completion and return its incremental events.
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream>;
}

pub type LlmStream = BoxStream<'static, Result<StreamEvent>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    /// Only set on assistant messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Only set on tool messages; pairs the result with its call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

impl ChatMessage {
    fn with_role(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            refusal: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::Assistant, content)
    }

    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(ChatRole::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(ChatRole::Tool, content)
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

/// Tool arguments as the completion service delivered them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    /// Encoded JSON text, not yet parsed.
    Encoded(String),
    Structured(JsonObject),
}

impl ToolArguments {
    /// Decode into the object handed to a tool provider.
    ///
    /// Blank text decodes to an empty object; text that is not a JSON object
    /// is an error.
    pub fn to_object(&self) -> Result<JsonObject> {
        match self {
            ToolArguments::Structured(map) => Ok(map.clone()),
            ToolArguments::Encoded(text) if text.trim().is_empty() => Ok(JsonObject::new()),
            ToolArguments::Encoded(text) => match serde_json::from_str(text) {
                Ok(serde_json::Value::Object(map)) => Ok(map),
                Ok(other) => Err(Error::Tool(format!(
                    "tool arguments must be a JSON object, got {}",
                    json_kind(&other)
                ))),
                Err(e) => Err(Error::Tool(format!("invalid tool arguments: {e}"))),
            },
        }
    }

    /// Encoded text form, as sent back to the completion service.
    pub fn to_encoded(&self) -> String {
        match self {
            ToolArguments::Encoded(text) => text.clone(),
            ToolArguments::Structured(map) => serde_json::Value::Object(map.clone()).to_string(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Incremental event from a streaming completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    ContentDelta(String),
    /// No more content will be accepted for this turn.
    ContentDone,
    ToolCallDelta(ToolCallDelta),
    ToolCallDone {
        index: u32,
    },
    RefusalDelta(String),
    RefusalDone,
    Usage(Usage),
    /// End of turn; finishes everything still open.
    Stop {
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    /// Fragment of the function name.
    pub name: Option<String>,
    /// Fragment of the encoded arguments.
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}
