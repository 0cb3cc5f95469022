use std::sync::{Arc, Mutex};

use crate::types::ChatMessage;

/// An append-only conversation log shared across a logical conversation.
///
/// Each successful turn appends the outbound request message followed by the
/// assistant/tool messages it produced; entries are never reordered or
/// removed. Cloning shares the underlying log. Appends are serialized
/// internally, but the pipeline assumes one logical writer at a time per
/// conversation; it does not arbitrate interleaved concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    list: Arc<Mutex<Vec<ChatMessage>>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate for an expected conversation length
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
        }
    }

    /// Replace the log wholesale (e.g. when resuming a stored conversation)
    pub fn set(&self, messages: Vec<ChatMessage>) {
        *self.list.lock().expect("memory lock poisoned") = messages;
    }

    /// Append messages in order
    pub fn add(&self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.list
            .lock()
            .expect("memory lock poisoned")
            .extend(messages);
    }

    /// Snapshot of the conversation so far
    pub fn list(&self) -> Vec<ChatMessage> {
        self.list.lock().expect("memory lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.list.lock().expect("memory lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
