use crate::llm::models::{Message, Role};

/// Append-only conversation, always opened by a single system message.
#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(Role::System, system_prompt)],
        }
    }

    pub fn append_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::User, content));
    }

    pub fn append_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::Assistant, content));
    }

    /// Owned copy of the conversation, used as the next request payload.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_one_system_message() {
        let history = History::new("You are an AI assistant.");
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role, Role::System);
    }

    #[test]
    fn appends_in_order() {
        let mut history = History::new("sys");
        history.append_user("hello");
        history.append_assistant("Hi there");

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[1], Message::new(Role::User, "hello"));
        assert_eq!(snapshot[2], Message::new(Role::Assistant, "Hi there"));
        assert_eq!(history.last().map(|m| m.role), Some(Role::Assistant));
    }
}
