use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mcpilot_common::{Error, Result};
use mcpilot_config::McpServerConfig;
use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParams, CallToolResult, ClientInfo};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use serde_json::json;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::providers::JsonObject;
use crate::tools::{RawToolDescriptor, RawToolSchema, ToolProvider};

pub const CLIENT_NAME: &str = "mcpilot";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A tool provider reached over MCP on the stdio of a child process.
pub struct McpClient {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
    service: RwLock<Option<RunningService<RoleClient, ClientInfo>>>,
}

impl McpClient {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: HashMap::new(),
            timeout: Duration::from_secs(30),
            service: RwLock::new(None),
        }
    }

    pub fn from_config(config: &McpServerConfig) -> Self {
        Self::new(&config.name, &config.command, config.args.clone())
            .with_env(config.env.clone())
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.service
            .read()
            .await
            .as_ref()
            .is_some_and(|service| !service.is_closed())
    }

    fn not_connected(&self) -> Error {
        Error::Mcp(format!("MCP server '{}' not connected", self.name))
    }
}

/// Identity announced during the initialize handshake.
pub fn client_info() -> ClientInfo {
    let mut info = ClientInfo::default();
    info.client_info.name = CLIENT_NAME.to_string();
    info.client_info.version = CLIENT_VERSION.to_string();
    info
}

/// Join the text items of a tool response, one per line. Other content kinds
/// are skipped.
pub fn text_from_content(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|item| item.as_text())
        .map(|text| text.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ToolProvider for McpClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        let mut guard = self.service.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let name = &self.name;
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| Error::Mcp(format!("failed to spawn MCP server '{name}': {e}")))?;

        let service = tokio::time::timeout(self.timeout, client_info().serve(transport))
            .await
            .map_err(|_| {
                Error::Mcp(format!(
                    "MCP server '{name}' handshake timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Mcp(format!("MCP server '{name}' handshake failed: {e}")))?;

        info!("MCP server '{name}' initialized");
        *guard = Some(service);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<RawToolDescriptor>> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| self.not_connected())?;
        let name = &self.name;

        let tools = service
            .list_all_tools()
            .await
            .map_err(|e| Error::Mcp(format!("failed to list tools from '{name}': {e}")))?;

        Ok(tools
            .into_iter()
            .map(|t| RawToolDescriptor {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: RawToolSchema::from_value(
                    serde_json::to_value(&*t.input_schema).unwrap_or_default(),
                ),
            })
            .collect())
    }

    async fn call_tool(&self, tool: &str, arguments: JsonObject) -> Result<String> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| self.not_connected())?;
        let name = &self.name;

        let params: CallToolRequestParams =
            serde_json::from_value(json!({ "name": tool, "arguments": arguments }))?;

        let result = service.call_tool(params).await.map_err(|e| {
            Error::Mcp(format!("tool '{tool}' on MCP server '{name}' failed: {e}"))
        })?;

        if result.is_error == Some(true) {
            debug!("tool '{tool}' on '{name}' reported an error result");
        }
        Ok(text_from_content(&result))
    }

    async fn close(&self) -> Result<()> {
        let Some(service) = self.service.write().await.take() else {
            return Ok(());
        };
        info!("disconnecting MCP server '{}'", self.name);
        if let Err(e) = service.cancel().await {
            warn!("error cancelling MCP server '{}': {e}", self.name);
            return Err(Error::Mcp(format!(
                "failed to close MCP server '{}': {e}",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;

    #[test]
    fn text_items_are_joined_by_newline() {
        let result = CallToolResult::success(vec![
            Content::text("first"),
            Content::image("aGk=", "image/png"),
            Content::text("second"),
        ]);
        assert_eq!(text_from_content(&result), "first\nsecond");
    }

    #[test]
    fn empty_content_is_empty_text() {
        assert_eq!(text_from_content(&CallToolResult::success(vec![])), "");
        let images_only = CallToolResult::success(vec![Content::image("aGk=", "image/png")]);
        assert_eq!(text_from_content(&images_only), "");
    }

    #[test]
    fn client_identity_is_announced() {
        let info = client_info();
        assert_eq!(info.client_info.name, CLIENT_NAME);
        assert_eq!(info.client_info.version, CLIENT_VERSION);
    }

    #[test]
    fn from_config_copies_launch_parameters() {
        let config = McpServerConfig {
            name: "fs".to_string(),
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "server-filesystem".to_string()],
            env: HashMap::from([("ROOT".to_string(), "/tmp".to_string())]),
            timeout_secs: 5,
            enabled: true,
        };
        let client = McpClient::from_config(&config);
        assert_eq!(client.name(), "fs");
        assert_eq!(client.args.len(), 2);
        assert_eq!(client.env["ROOT"], "/tmp");
        assert_eq!(client.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn calls_before_start_are_rejected() {
        let client = McpClient::new("idle", "does-not-matter", vec![]);
        assert!(!client.is_connected().await);
        let err = client.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
        let err = client.call_tool("x", JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, Error::Mcp(_)));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let client = McpClient::new("ghost", "/nonexistent/mcp-server-binary", vec![]);
        let err = client.start().await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
