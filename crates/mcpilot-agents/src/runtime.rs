use std::sync::Arc;

use mcpilot_common::{Error, Result};
use mcpilot_config::{AgentConfig, DispatchMode, ToolErrorPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::accumulator::accumulate;
use crate::conversation::Conversation;
use crate::providers::{ChatMessage, LlmProvider, LlmRequest};
use crate::tools::{ToolDispatcher, ToolProvider, ToolRegistry, ToolResult};

/// Default cap on completion rounds per invoke.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Drives a conversation with a completion service, executing the tool calls
/// the model asks for until it answers without one.
pub struct AgentRuntime {
    provider: Arc<dyn LlmProvider>,
    model: String,
    seed: Option<i64>,
    max_iterations: Option<usize>,
    dispatch_mode: DispatchMode,
    on_tool_error: ToolErrorPolicy,
    conversation: Conversation,
    registry: ToolRegistry,
    tool_providers: Vec<Arc<dyn ToolProvider>>,
}

pub struct AgentRuntimeBuilder {
    provider: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: Option<String>,
    context: Option<String>,
    tool_providers: Vec<Arc<dyn ToolProvider>>,
    seed: Option<i64>,
    max_iterations: Option<usize>,
    dispatch_mode: DispatchMode,
    on_tool_error: ToolErrorPolicy,
}

impl AgentRuntimeBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Background text sent as a user message ahead of the first prompt.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add a tool provider. Registration order decides name collisions.
    pub fn tool_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.tool_providers.push(provider);
        self
    }

    pub fn seed(mut self, seed: Option<i64>) -> Self {
        self.seed = seed;
        self
    }

    /// `None` lets the loop run until the model stops calling tools.
    pub fn max_iterations(mut self, max: Option<usize>) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn on_tool_error(mut self, policy: ToolErrorPolicy) -> Self {
        self.on_tool_error = policy;
        self
    }

    pub fn with_config(mut self, config: &AgentConfig) -> Self {
        if let Some(prompt) = &config.system_prompt {
            self.system_prompt = Some(prompt.clone());
        }
        if let Some(context) = &config.context {
            self.context = Some(context.clone());
        }
        self.max_iterations = config.max_iterations;
        self.dispatch_mode = config.dispatch;
        self.on_tool_error = config.on_tool_error;
        self
    }

    /// Validate settings, then start every tool provider and index its tools.
    pub async fn build(self) -> Result<AgentRuntime> {
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".to_string()));
        }

        let registry = ToolRegistry::discover(&self.tool_providers).await;
        info!(
            "agent ready: model={} provider={} tools={}",
            self.model,
            self.provider.provider_id(),
            registry.len()
        );

        Ok(AgentRuntime {
            conversation: Conversation::new(
                self.system_prompt.as_deref(),
                self.context.as_deref(),
            ),
            provider: self.provider,
            model: self.model,
            seed: self.seed,
            max_iterations: self.max_iterations,
            dispatch_mode: self.dispatch_mode,
            on_tool_error: self.on_tool_error,
            registry,
            tool_providers: self.tool_providers,
        })
    }
}

impl AgentRuntime {
    pub fn builder(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
    ) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            provider,
            model: model.into(),
            system_prompt: None,
            context: None,
            tool_providers: Vec::new(),
            seed: Some(0),
            max_iterations: Some(MAX_TOOL_ITERATIONS),
            dispatch_mode: DispatchMode::default(),
            on_tool_error: ToolErrorPolicy::default(),
        }
    }

    /// Wire the OpenAI adapter and every enabled MCP server from configuration.
    #[cfg(feature = "mcp")]
    pub async fn from_config(config: &mcpilot_config::AppConfig) -> Result<Self> {
        let provider = crate::openai::OpenAiProvider::from_config(&config.llm)?;
        let mut builder = Self::builder(Arc::new(provider), config.llm.model.clone())
            .seed(config.llm.seed)
            .with_config(&config.agent);
        for server in config.mcp_servers.iter().filter(|s| s.enabled) {
            builder = builder.tool_provider(Arc::new(crate::mcp::McpClient::from_config(server)));
        }
        builder.build().await
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the loop for `prompt` and return the model's final answer.
    ///
    /// An empty prompt adds no user message; the next turn is then driven by
    /// whatever the conversation already holds.
    pub async fn invoke(&mut self, prompt: &str) -> Result<String> {
        self.invoke_with_cancel(prompt, &CancellationToken::new())
            .await
    }

    /// Like [`AgentRuntime::invoke`], aborting with [`Error::Cancelled`] once
    /// `cancel` fires. The interrupted turn leaves nothing in the conversation.
    #[instrument(skip(self, prompt, cancel), fields(model = %self.model))]
    pub async fn invoke_with_cancel(
        &mut self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if !prompt.is_empty() {
            self.conversation.append(ChatMessage::user(prompt));
        }

        let mut rounds = 0usize;
        loop {
            if let Some(max) = self.max_iterations {
                if rounds >= max {
                    warn!("giving up after {max} completion rounds");
                    return Err(Error::MaxIterations(max));
                }
            }
            rounds += 1;

            let request = LlmRequest {
                model: self.model.clone(),
                messages: self.conversation.snapshot().to_vec(),
                tools: self.registry.definitions(),
                seed: self.seed,
            };
            debug!(
                "round {rounds}: sending {} message(s), {} tool(s)",
                request.messages.len(),
                request.tools.len()
            );

            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                stream = self.provider.stream(&request) => stream?,
            };
            let turn = accumulate(stream, cancel).await?;
            if let Some(usage) = turn.usage {
                debug!(
                    "round {rounds}: usage in={} out={}",
                    usage.input_tokens, usage.output_tokens
                );
            }

            if !turn.has_tool_calls() {
                info!("turn complete after {rounds} round(s)");
                self.conversation.append(turn.message);
                return Ok(turn.content);
            }

            info!("round {rounds}: model requested {} tool call(s)", turn.tool_calls.len());
            let results = ToolDispatcher::new(&self.registry)
                .with_mode(self.dispatch_mode)
                .with_error_policy(self.on_tool_error)
                .dispatch_all(&turn.tool_calls, cancel)
                .await?;

            self.conversation.append(turn.message);
            self.conversation
                .extend(results.into_iter().map(ToolResult::into_message));
        }
    }

    /// Shut down every tool provider. Failures are logged and do not stop the
    /// remaining providers from closing.
    pub async fn close(&self) {
        for provider in &self.tool_providers {
            if let Err(e) = provider.close().await {
                warn!("failed to close tool provider '{}': {e}", provider.name());
            }
        }
    }
}
