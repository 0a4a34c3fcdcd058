//! Message types for model queries

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::CacheControlMode;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
///
/// `cache_control` is only set by [`apply_cache_control`] and is emitted
/// as a content block marker on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<Value>,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            cache_control: None,
        }
    }

    /// Encode for a chat-completion or responses request body.
    ///
    /// Plain messages use the string content form. A marked message is sent
    /// as a single text block carrying the marker.
    pub fn to_wire(&self) -> Value {
        match &self.cache_control {
            None => json!({"role": self.role, "content": self.content}),
            Some(marker) => json!({
                "role": self.role,
                "content": [{
                    "type": "text",
                    "text": self.content,
                    "cache_control": marker,
                }]
            }),
        }
    }
}

/// Encode a slice of messages for the wire.
pub fn to_wire(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(Message::to_wire).collect()
}

/// Return a copy of `messages` with cache markers set according to `mode`.
///
/// Existing markers are always cleared first so repeated calls over a
/// growing history never accumulate stale breakpoints.
pub fn apply_cache_control(messages: &[Message], mode: CacheControlMode) -> Vec<Message> {
    let mut marked: Vec<Message> = messages
        .iter()
        .cloned()
        .map(|mut m| {
            m.cache_control = None;
            m
        })
        .collect();

    match mode {
        CacheControlMode::DefaultEnd => {
            if let Some(last) = marked.last_mut() {
                last.cache_control = Some(json!({"type": "ephemeral"}));
            }
        }
    }

    marked
}

/// Content of the most recent user message, if any.
pub fn last_user_content(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}
