pub mod accumulator;
pub mod conversation;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod openai;
pub mod providers;
pub mod runtime;
pub mod tools;

pub use accumulator::{StreamAccumulator, TurnResult};
pub use conversation::Conversation;
#[cfg(feature = "mcp")]
pub use mcp::McpClient;
pub use openai::OpenAiProvider;
pub use providers::{
    ChatMessage, ChatRole, JsonObject, LlmProvider, LlmRequest, LlmStream, StreamEvent,
    ToolArguments, ToolCallDelta, ToolCallRequest, ToolDefinition, Usage,
};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder};
pub use tools::{
    RawToolDescriptor, RawToolSchema, RegisteredTool, ToolDescriptor, ToolDispatcher,
    ToolProvider, ToolRegistry, ToolResult, ToolSchema,
};
