//! Tool discovery and execution across tool-provider processes.
//!
//! - [`ToolProvider`] is the seam to one external provider (see `crate::mcp`).
//! - [`ToolRegistry`] is the name-indexed view over every provider's tools.
//! - [`ToolDispatcher`] turns a model's tool call into a provider invocation.

mod dispatch;
mod registry;
mod schema;

pub use dispatch::{ToolDispatcher, ToolResult};
pub use registry::{RegisteredTool, ToolRegistry};
pub use schema::{RawToolDescriptor, RawToolSchema, ToolDescriptor, ToolSchema, normalize};

use async_trait::async_trait;
use mcpilot_common::Result;

use crate::providers::JsonObject;

/// A connection to one external tool-provider process.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Connect and perform the initialize handshake.
    async fn start(&self) -> Result<()>;

    /// Discover the provider's tools. Schemas may be incomplete.
    async fn list_tools(&self) -> Result<Vec<RawToolDescriptor>>;

    /// Invoke a tool and return the text of its response.
    async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<String>;

    /// Shut the connection down.
    async fn close(&self) -> Result<()>;
}
