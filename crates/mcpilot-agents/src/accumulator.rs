//! Folds the incremental events of one streamed completion into a finished turn.
//!
//! A [`StreamAccumulator`] is created per turn and consumed by
//! [`StreamAccumulator::finish`], so merge state can never leak from one turn
//! into the next.

use std::collections::BTreeMap;

use futures::StreamExt;
use mcpilot_common::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::providers::{
    ChatMessage, LlmStream, StreamEvent, ToolArguments, ToolCallDelta, ToolCallRequest, Usage,
};

/// Everything the model produced in one turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub content: String,
    /// Finished tool calls, in the order they finished.
    pub tool_calls: Vec<ToolCallRequest>,
    pub refusal: Option<String>,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
    /// Assistant message to append to the conversation as-is.
    pub message: ChatMessage,
}

impl TurnResult {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Pending,
    Finished,
}

#[derive(Debug)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
    state: CallState,
}

impl PartialToolCall {
    fn new() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
            state: CallState::Pending,
        }
    }

    fn merge(&mut self, delta: ToolCallDelta) {
        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            self.id = id;
        }
        if let Some(name) = delta.name {
            self.name.push_str(&name);
        }
        self.arguments.push_str(&delta.arguments);
    }

    fn to_request(&self) -> ToolCallRequest {
        ToolCallRequest {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: ToolArguments::Encoded(self.arguments.clone()),
        }
    }
}

/// Turn-scoped merge state for a streamed completion.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    content_finished: bool,
    refusal: String,
    refusal_finished: bool,
    pending: BTreeMap<u32, PartialToolCall>,
    finished: Vec<ToolCallRequest>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::ContentDelta(text) => {
                if self.content_finished {
                    debug!("dropping {} content bytes received after completion", text.len());
                } else {
                    self.content.push_str(&text);
                }
            }
            StreamEvent::ContentDone => self.content_finished = true,
            StreamEvent::ToolCallDelta(delta) => {
                let index = delta.index;
                let call = self.pending.entry(index).or_insert_with(PartialToolCall::new);
                if call.state == CallState::Finished {
                    debug!("dropping fragment for finished tool call #{index}");
                } else {
                    call.merge(delta);
                }
            }
            StreamEvent::ToolCallDone { index } => self.finish_call(index),
            StreamEvent::RefusalDelta(text) => {
                if !self.refusal_finished {
                    self.refusal.push_str(&text);
                }
            }
            StreamEvent::RefusalDone => self.finish_refusal(),
            StreamEvent::Usage(usage) => self.usage = Some(usage),
            StreamEvent::Stop { reason } => {
                self.stop_reason = reason;
                self.finish_open();
            }
        }
    }

    /// Close the turn. Anything still open is kept, not discarded.
    pub fn finish(mut self) -> TurnResult {
        self.finish_open();

        let refusal = (!self.refusal.is_empty()).then_some(self.refusal);
        let mut message =
            ChatMessage::assistant_with_tools(self.content.clone(), self.finished.clone());
        message.refusal = refusal.clone();

        TurnResult {
            content: self.content,
            tool_calls: self.finished,
            refusal,
            usage: self.usage,
            stop_reason: self.stop_reason,
            message,
        }
    }

    fn finish_open(&mut self) {
        self.content_finished = true;
        let open: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, call)| call.state == CallState::Pending)
            .map(|(index, _)| *index)
            .collect();
        for index in open {
            self.finish_call(index);
        }
        self.finish_refusal();
    }

    fn finish_call(&mut self, index: u32) {
        let Some(call) = self.pending.get_mut(&index) else {
            debug!("finish signal for unknown tool call #{index}");
            return;
        };
        if call.state == CallState::Finished {
            return;
        }
        call.state = CallState::Finished;
        debug!(
            "tool call finished: #{index} {} {}",
            call.name, call.arguments
        );
        self.finished.push(call.to_request());
    }

    fn finish_refusal(&mut self) {
        if self.refusal_finished {
            return;
        }
        self.refusal_finished = true;
        if !self.refusal.is_empty() {
            warn!("model refused: {}", self.refusal);
        }
    }
}

/// Drain `stream` into a [`TurnResult`].
///
/// A transport error or cancellation ends the turn and discards whatever was
/// accumulated.
pub async fn accumulate(mut stream: LlmStream, cancel: &CancellationToken) -> Result<TurnResult> {
    let mut acc = StreamAccumulator::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(event) => acc.push(event?),
            None => break,
        }
    }
    Ok(acc.finish())
}
