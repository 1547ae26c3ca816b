use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmProviderConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Tool providers, in registration order. Earlier servers win name collisions.
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

/// Completion service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_seed")]
    pub seed: Option<i64>,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            seed: default_seed(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_seed() -> Option<i64> {
    Some(0)
}

/// Behaviour of the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Contextual preamble sent as a user message before the first prompt.
    #[serde(default)]
    pub context: Option<String>,
    /// `None` removes the cap entirely.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub dispatch: DispatchMode,
    #[serde(default)]
    pub on_tool_error: ToolErrorPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            context: None,
            max_iterations: default_max_iterations(),
            dispatch: DispatchMode::default(),
            on_tool_error: ToolErrorPolicy::default(),
        }
    }
}

fn default_max_iterations() -> Option<usize> {
    Some(10)
}

/// How the tool calls of one turn are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One call at a time, in the order the model emitted them.
    #[default]
    Sequential,
    /// All calls at once; results are still appended in call order.
    Concurrent,
}

/// What happens to a tool call that cannot be decoded, resolved or executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Append a tool result carrying the error text.
    #[default]
    Report,
    /// Append nothing for the failed call.
    Skip,
    /// Fail the whole invoke.
    Abort,
}

/// One tool-provider process reached over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}
