#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mcpilot_agents::{
    JsonObject, LlmProvider, LlmRequest, LlmStream, RawToolDescriptor, StreamEvent, ToolCallDelta,
    ToolProvider,
};
use mcpilot_common::{Error, Result};
use tokio_stream::StreamExt;

/// One scripted completion.
pub enum Turn {
    Events(Vec<StreamEvent>),
    /// Emits the events, then never ends.
    Hang(Vec<StreamEvent>),
    Fail(String),
}

/// Completion service that replays a script and records every request.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Turn>>,
    /// Replayed once the script runs out.
    repeat: Option<Vec<StreamEvent>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Turn>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(events: Vec<StreamEvent>) -> Self {
        Self {
            repeat: Some(events),
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        let turn = match (next, &self.repeat) {
            (Some(turn), _) => turn,
            (None, Some(events)) => Turn::Events(events.clone()),
            (None, None) => return Err(Error::Agent("script exhausted".to_string())),
        };
        match turn {
            Turn::Events(events) => Ok(Box::pin(tokio_stream::iter(
                events.into_iter().map(Ok::<StreamEvent, Error>),
            ))),
            Turn::Hang(events) => Ok(Box::pin(
                tokio_stream::iter(events.into_iter().map(Ok::<StreamEvent, Error>))
                    .chain(tokio_stream::pending()),
            )),
            Turn::Fail(reason) => Err(Error::Agent(reason)),
        }
    }
}

pub fn text_turn(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ContentDelta(text.to_string()),
        StreamEvent::ContentDone,
        StreamEvent::Stop {
            reason: Some("stop".to_string()),
        },
    ]
}

/// A turn requesting `calls` as `(id, name, encoded arguments)`.
pub fn tool_turn(calls: &[(&str, &str, &str)]) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for (index, (id, name, args)) in calls.iter().enumerate() {
        let index = index as u32;
        events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
            index,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: args.to_string(),
        }));
        events.push(StreamEvent::ToolCallDone { index });
    }
    events.push(StreamEvent::Stop {
        reason: Some("tool_calls".to_string()),
    });
    events
}

/// Tool provider double that records calls.
pub struct MockTools {
    name: String,
    tools: Vec<RawToolDescriptor>,
    failing: HashSet<String>,
    fail_start: bool,
    fail_list: bool,
    fail_close: bool,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<(String, JsonObject)>>,
    pub closed: AtomicBool,
}

impl MockTools {
    pub fn new(name: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|tool| RawToolDescriptor {
                    name: tool.to_string(),
                    description: format!("{tool} from {name}"),
                    ..Default::default()
                })
                .collect(),
            failing: HashSet::new(),
            fail_start: false,
            fail_list: false,
            fail_close: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn failing_tool(mut self, tool: &str) -> Self {
        self.failing.insert(tool.to_string());
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProvider for MockTools {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        if self.fail_start {
            return Err(Error::Mcp(format!("{} refused to start", self.name)));
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<RawToolDescriptor>> {
        if self.fail_list {
            return Err(Error::Mcp(format!("{} cannot list tools", self.name)));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        if self.failing.contains(name) {
            return Err(Error::Mcp(format!("{name} crashed")));
        }
        Ok(format!("{name}@{}", self.name))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(Error::Mcp(format!("{} would not close", self.name)));
        }
        Ok(())
    }
}
