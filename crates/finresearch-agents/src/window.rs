use finresearch_models::ChatMessage;

/// Bounded conversation history for one agent.
///
/// Index 0 is always the system message and is never evicted. At most
/// `limit` non-system messages are kept; when the cap is exceeded the oldest
/// ones are dropped and the rest keep their order.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    messages: Vec<ChatMessage>,
    limit: usize,
}

impl ConversationWindow {
    /// A limit of 0 is raised to 1 so the pending prompt is never evicted.
    pub fn new(system_prompt: impl Into<String>, limit: usize) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.enforce_cap();
    }

    /// Drop everything but the system message.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn system(&self) -> &ChatMessage {
        &self.messages[0]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.len() <= 1
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn enforce_cap(&mut self) {
        let excess = (self.messages.len() - 1).saturating_sub(self.limit);
        if excess > 0 {
            self.messages.drain(1..1 + excess);
        }
    }
}
