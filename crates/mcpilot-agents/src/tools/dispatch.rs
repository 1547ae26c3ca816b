use futures::future::join_all;
use mcpilot_common::{Error, Result};
use mcpilot_config::{DispatchMode, ToolErrorPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ToolRegistry;
use crate::providers::{ChatMessage, ToolCallRequest};

/// Output of one tool call, paired with the call by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
}

impl ToolResult {
    pub fn into_message(self) -> ChatMessage {
        ChatMessage::tool_result(self.call_id, self.content)
    }
}

/// Routes tool calls to the provider that owns the tool.
pub struct ToolDispatcher<'a> {
    registry: &'a ToolRegistry,
    mode: DispatchMode,
    on_error: ToolErrorPolicy,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self {
            registry,
            mode: DispatchMode::default(),
            on_error: ToolErrorPolicy::default(),
        }
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_error_policy(mut self, on_error: ToolErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    /// Decode arguments, resolve the owner and invoke it.
    pub async fn dispatch(&self, call: &ToolCallRequest) -> Result<ToolResult> {
        let arguments = call.arguments.to_object()?;
        let tool = self
            .registry
            .resolve(&call.name)
            .ok_or_else(|| Error::Tool(format!("unknown tool: {}", call.name)))?;

        info!(
            "tool use {} {} via '{}'",
            call.id,
            call.name,
            tool.provider.name()
        );
        let content = tool.provider.call_tool(&call.name, arguments).await?;
        debug!("tool {} returned {} chars", call.name, content.len());

        Ok(ToolResult {
            call_id: call.id.clone(),
            content,
        })
    }

    /// Run every call of a turn and return the results in call order.
    ///
    /// Failures are handled per the error policy; cancellation always fails
    /// the whole batch. In sequential mode nothing runs after a call that
    /// ends the batch.
    pub async fn dispatch_all(
        &self,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolResult>> {
        let mut results = Vec::with_capacity(calls.len());
        match self.mode {
            DispatchMode::Sequential => {
                for call in calls {
                    let outcome = self.dispatch_cancellable(call, cancel).await;
                    self.settle(call, outcome, &mut results)?;
                }
            }
            DispatchMode::Concurrent => {
                let outcomes = join_all(
                    calls
                        .iter()
                        .map(|call| self.dispatch_cancellable(call, cancel)),
                )
                .await;
                for (call, outcome) in calls.iter().zip(outcomes) {
                    self.settle(call, outcome, &mut results)?;
                }
            }
        }
        Ok(results)
    }

    /// Apply the error policy to one outcome. `Err` ends the batch.
    fn settle(
        &self,
        call: &ToolCallRequest,
        outcome: Result<ToolResult>,
        results: &mut Vec<ToolResult>,
    ) -> Result<()> {
        let e = match outcome {
            Ok(result) => {
                results.push(result);
                return Ok(());
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => e,
        };
        match self.on_error {
            ToolErrorPolicy::Report => {
                warn!("tool call {} ({}) failed: {e}", call.id, call.name);
                results.push(ToolResult {
                    call_id: call.id.clone(),
                    content: format!("error: {}", e.reason()),
                });
                Ok(())
            }
            ToolErrorPolicy::Skip => {
                warn!(
                    "tool call {} ({}) failed, no result recorded: {e}",
                    call.id, call.name
                );
                Ok(())
            }
            ToolErrorPolicy::Abort => {
                warn!("tool call {} ({}) failed, aborting turn: {e}", call.id, call.name);
                Err(e)
            }
        }
    }

    async fn dispatch_cancellable(
        &self,
        call: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.dispatch(call) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{JsonObject, ToolArguments};
    use crate::tools::{RawToolDescriptor, ToolProvider};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct EchoProvider {
        calls: Mutex<Vec<(String, JsonObject)>>,
    }

    #[async_trait]
    impl ToolProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<RawToolDescriptor>> {
            Ok(vec![])
        }

        async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<String> {
            if name == "explode" {
                return Err(Error::Mcp("boom".to_string()));
            }
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.clone()));
            Ok(serde_json::Value::Object(arguments).to_string())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<EchoProvider>, ToolRegistry) {
        let provider = Arc::new(EchoProvider {
            calls: Mutex::new(Vec::new()),
        });
        let mut registry = ToolRegistry::new();
        let tools = ["echo", "explode"]
            .iter()
            .map(|name| RawToolDescriptor {
                name: name.to_string(),
                ..Default::default()
            })
            .collect();
        registry.register(provider.clone(), tools);
        (provider, registry)
    }

    fn call(id: &str, name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: ToolArguments::Encoded(args.to_string()),
        }
    }

    #[tokio::test]
    async fn dispatch_decodes_arguments_and_pairs_id() {
        let (provider, registry) = setup();
        let result = ToolDispatcher::new(&registry)
            .dispatch(&call("call_1", "echo", r#"{"msg":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.content, r#"{"msg":"hi"}"#);
        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0].1["msg"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let (_, registry) = setup();
        let err = ToolDispatcher::new(&registry)
            .dispatch(&call("call_1", "missing", "{}"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool: missing"));
    }

    #[tokio::test]
    async fn report_policy_emits_error_results() {
        let (_, registry) = setup();
        let calls = vec![
            call("a", "echo", "{}"),
            call("b", "missing", "{}"),
            call("c", "echo", "not json"),
            call("d", "explode", "{}"),
        ];
        let results = ToolDispatcher::new(&registry)
            .dispatch_all(&calls, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(results[1].content, "error: unknown tool: missing");
        assert!(results[3].content.contains("boom"));
    }

    #[tokio::test]
    async fn skip_policy_drops_failed_calls() {
        let (_, registry) = setup();
        let calls = vec![call("a", "missing", "{}"), call("b", "echo", "{}")];
        let results = ToolDispatcher::new(&registry)
            .with_error_policy(ToolErrorPolicy::Skip)
            .dispatch_all(&calls, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].call_id, "b");
    }

    #[tokio::test]
    async fn abort_policy_fails_the_batch() {
        let (_, registry) = setup();
        let calls = vec![call("a", "echo", "{}"), call("b", "explode", "{}")];
        let err = ToolDispatcher::new(&registry)
            .with_error_policy(ToolErrorPolicy::Abort)
            .dispatch_all(&calls, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn abort_policy_stops_before_later_calls() {
        let (provider, registry) = setup();
        let calls = vec![call("a", "missing", "{}"), call("b", "echo", "{}")];
        let err = ToolDispatcher::new(&registry)
            .with_error_policy(ToolErrorPolicy::Abort)
            .dispatch_all(&calls, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool: missing"));
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_mode_keeps_call_order() {
        let (_, registry) = setup();
        let calls = vec![
            call("x", "echo", r#"{"n":1}"#),
            call("y", "echo", r#"{"n":2}"#),
            call("z", "echo", r#"{"n":3}"#),
        ];
        let results = ToolDispatcher::new(&registry)
            .with_mode(DispatchMode::Concurrent)
            .dispatch_all(&calls, &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn cancellation_overrides_report_policy() {
        let (_, registry) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ToolDispatcher::new(&registry)
            .dispatch_all(&[call("a", "echo", "{}")], &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
