use crate::providers::ChatMessage;

/// Append-only message log owned by one agent.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /// Seed the log with an optional system prompt and an optional contextual
    /// preamble (sent as a user message). Blank values are skipped.
    pub fn new(system_prompt: Option<&str>, context: Option<&str>) -> Self {
        let mut conversation = Self::default();
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            conversation.append(ChatMessage::system(prompt));
        }
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            conversation.append(ChatMessage::user(context));
        }
        conversation
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Messages in insertion order, as sent to the completion service.
    pub fn snapshot(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Extend<ChatMessage> for Conversation {
    fn extend<I: IntoIterator<Item = ChatMessage>>(&mut self, iter: I) {
        for message in iter {
            self.append(message);
        }
    }
}
