//! Flattening provider responses into plain text.
//!
//! Responses-style bodies carry either a flattened `output_text` or an
//! ordered `output` list whose items hold `content` lists of text parts.
//! Items and parts arrive either in the documented typed shape or as loose
//! mappings; both are accepted and their relative order is preserved.
//! Normalization never fails: anything unrecognisable becomes `""`.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Separator between text fragments.
pub const FRAGMENT_SEPARATOR: &str = "\n\n";

/// One entry of a responses-style `output` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OutputItem {
    /// A typed `{"type": "message", ...}` item.
    Message(OutputMessage),
    /// Any other mapping; its `content` list is still inspected.
    Mapping(Map<String, Value>),
    /// Non-mapping entries are skipped.
    Other(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "message")]
    Message,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

/// One entry of an item's `content` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text(OutputText),
    Mapping(Map<String, Value>),
    Other(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TextKind {
    #[serde(rename = "output_text")]
    OutputText,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputText {
    #[serde(rename = "type")]
    pub kind: TextKind,
    pub text: String,
}

impl OutputItem {
    fn content_texts(&self) -> Vec<&str> {
        match self {
            OutputItem::Message(msg) => msg.content.iter().filter_map(ContentPart::text).collect(),
            OutputItem::Mapping(map) => match map.get("content") {
                Some(Value::Array(parts)) => parts.iter().filter_map(text_field).collect(),
                _ => Vec::new(),
            },
            OutputItem::Other(_) => Vec::new(),
        }
    }
}

impl ContentPart {
    fn text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(t) => Some(t.text.as_str()).filter(|s| !s.is_empty()),
            ContentPart::Mapping(map) => {
                map.get("text").and_then(Value::as_str).filter(|s| !s.is_empty())
            }
            ContentPart::Other(_) => None,
        }
    }
}

fn text_field(value: &Value) -> Option<&str> {
    value.get("text").and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Join the non-empty text fragments of `items` in encounter order.
pub fn join_output_items(items: &[OutputItem]) -> String {
    items
        .iter()
        .flat_map(OutputItem::content_texts)
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}

/// Extract the text of a raw responses-style body.
pub fn extract_response_text(raw: &Value) -> String {
    if let Some(text) = raw.get("output_text").and_then(Value::as_str) {
        if !text.is_empty() {
            return text.to_string();
        }
    }

    let items = match raw.get("output") {
        Some(output @ Value::Array(_)) => Vec::<OutputItem>::deserialize(output),
        _ => {
            warn!("Could not extract text from response (no output list): {raw}");
            return String::new();
        }
    };

    match items {
        Ok(items) => {
            let text = join_output_items(&items);
            if text.is_empty() {
                debug!("Response output contained no text fragments");
            }
            text
        }
        Err(e) => {
            warn!("Could not extract text from response ({e}): {raw}");
            String::new()
        }
    }
}

/// Flatten chat-style message content: a string, a list of blocks, or a
/// single block mapping.
pub fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                Value::String(s) if !s.is_empty() => Some(s.as_str()),
                other => text_field(other),
            })
            .collect::<Vec<_>>()
            .join(FRAGMENT_SEPARATOR),
        Value::Object(_) => text_field(content).unwrap_or_default().to_string(),
        Value::Null => String::new(),
        other => {
            warn!("Unexpected message content shape: {other}");
            String::new()
        }
    }
}
