use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use mcpilot_common::{Error, Result};
use mcpilot_config::LlmProviderConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::{
    ChatMessage, ChatRole, LlmProvider, LlmRequest, LlmStream, StreamEvent, ToolCallDelta, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streaming client for OpenAI-compatible chat completion endpoints.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fails when no API key is configured.
    pub fn from_config(config: &LlmProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("OpenAI API key is not set (OPENAI_API_KEY)".to_string())
            })?;
        Ok(Self::new(api_key, config.base_url.clone()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let openai_request = convert_request(request)?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        Ok(Box::pin(SseParser::new(response.bytes_stream())))
    }
}

fn convert_request(request: &LlmRequest) -> Result<OpenAiRequest> {
    let messages = request
        .messages
        .iter()
        .map(convert_message)
        .collect::<Result<Vec<_>>>()?;

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|t| OpenAiTool {
                    kind: "function".to_string(),
                    function: OpenAiFunctionDefinition {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        )
    };

    Ok(OpenAiRequest {
        model: request.model.clone(),
        messages,
        tools,
        seed: request.seed,
        stream: true,
        stream_options: OpenAiStreamOptions {
            include_usage: true,
        },
    })
}

fn convert_message(msg: &ChatMessage) -> Result<OpenAiMessage> {
    Ok(match msg.role {
        ChatRole::System => OpenAiMessage::System {
            content: msg.content.clone(),
        },
        ChatRole::User => OpenAiMessage::User {
            content: msg.content.clone(),
        },
        ChatRole::Assistant => {
            let tool_calls: Vec<OpenAiToolCall> = msg
                .tool_calls
                .iter()
                .map(|call| OpenAiToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_encoded(),
                    },
                })
                .collect();
            OpenAiMessage::Assistant {
                content: (!msg.content.is_empty() || tool_calls.is_empty())
                    .then(|| msg.content.clone()),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                refusal: msg.refusal.clone(),
            }
        }
        ChatRole::Tool => OpenAiMessage::Tool {
            tool_call_id: msg.tool_call_id.clone().ok_or_else(|| {
                Error::Agent("tool message is missing its tool_call_id".to_string())
            })?,
            content: msg.content.clone(),
        },
    })
}

// Request Types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    stream: bool,
    stream_options: OpenAiStreamOptions,
}

#[derive(Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        refusal: Option<String>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

/// Fragment kind most recently seen on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fragment {
    Content,
    Refusal,
    ToolCall(u32),
}

impl Fragment {
    fn done_event(self) -> StreamEvent {
        match self {
            Fragment::Content => StreamEvent::ContentDone,
            Fragment::Refusal => StreamEvent::RefusalDone,
            Fragment::ToolCall(index) => StreamEvent::ToolCallDone { index },
        }
    }
}

// Stream Parser
struct SseParser {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    queue: VecDeque<Result<StreamEvent>>,
    current: Option<Fragment>,
    exhausted: bool,
}

impl SseParser {
    fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            queue: VecDeque::new(),
            current: None,
            exhausted: false,
        }
    }

    /// Split complete SSE messages off the buffer.
    fn drain_messages(&mut self) {
        loop {
            let (pos, len) = if let Some(p) = self.buffer.windows(2).position(|w| w == b"\n\n") {
                (p, 2)
            } else if let Some(p) = self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                (p, 4)
            } else {
                break;
            };

            let msg_bytes: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..len);

            let Ok(msg) = String::from_utf8(msg_bytes) else {
                debug!("dropping SSE message with invalid UTF-8");
                continue;
            };
            for line in msg.lines() {
                if let Some(data) = line.strip_prefix("data:") {
                    self.handle_data(data.trim());
                }
            }
        }
    }

    fn handle_data(&mut self, data: &str) {
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.queue
                    .push_back(Err(Error::Agent(format!("JSON parse error: {e}"))));
                return;
            }
        };

        if let Some(choice) = chunk.choices.into_iter().find(|c| c.index == 0) {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.enter(Fragment::Content);
                self.queue.push_back(Ok(StreamEvent::ContentDelta(content)));
            }
            if let Some(refusal) = choice.delta.refusal.filter(|r| !r.is_empty()) {
                self.enter(Fragment::Refusal);
                self.queue.push_back(Ok(StreamEvent::RefusalDelta(refusal)));
            }
            for tc in choice.delta.tool_calls.unwrap_or_default() {
                self.enter(Fragment::ToolCall(tc.index));
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                self.queue
                    .push_back(Ok(StreamEvent::ToolCallDelta(ToolCallDelta {
                        index: tc.index,
                        id: tc.id,
                        name,
                        arguments,
                    })));
            }
            if let Some(reason) = choice.finish_reason {
                if let Some(open) = self.current.take() {
                    self.queue.push_back(Ok(open.done_event()));
                }
                self.queue.push_back(Ok(StreamEvent::Stop {
                    reason: Some(reason),
                }));
            }
        }

        if let Some(usage) = chunk.usage {
            self.queue.push_back(Ok(StreamEvent::Usage(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            })));
        }
    }

    /// Switch to `next`, finishing the previous fragment kind if it differs.
    fn enter(&mut self, next: Fragment) {
        match self.current.replace(next) {
            Some(prev) if prev != next => self.queue.push_back(Ok(prev.done_event())),
            _ => {}
        }
    }
}

impl Stream for SseParser {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.exhausted {
                return Poll::Ready(None);
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_messages();
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(Error::Agent(format!("Stream error: {e}")))));
                }
                Poll::Ready(None) => {
                    self.exhausted = true;
                    if !self.buffer.is_empty() {
                        // Flush a trailing message that lacks its blank line.
                        self.buffer.extend_from_slice(b"\n\n");
                        self.drain_messages();
                        self.buffer.clear();
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// Stream Response Types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
    refusal: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
