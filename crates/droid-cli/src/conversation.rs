//! Conversation state
//!
//! The append-only message history shared between the controller and the
//! model. The model is stateless between calls; this sequence is the only
//! context it sees, and nothing is mutated or reordered after insertion.

use llm_client::{ChatMessage, Role};

/// Append-only conversation history for a single run
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append a message to the history
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// The ordered history handed to the model each round
    pub fn snapshot(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages with the given role
    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
