//! Wire types for provider responses.
//!
//! Only the fields the backends read are typed. The raw JSON body is kept
//! alongside for [`QueryResult::response`](super::QueryResult).

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::cost::Usage;

/// Chat-completion response (gateway and router).
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, deserialize_with = "lenient_usage")]
    pub usage: Option<Usage>,
}

/// Usage telemetry that does not parse is dropped with a warning. Cost
/// tracking then sees no usage and applies its own mode.
fn lenient_usage<'de, D>(deserializer: D) -> std::result::Result<Option<Usage>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match Usage::deserialize(&value) {
        Ok(usage) => Ok(Some(usage)),
        Err(e) => {
            warn!(error = %e, usage = %value, "Ignoring malformed usage block");
            Ok(None)
        }
    }
}

/// A single completion choice.
#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Message of a completion choice. Content may be a string, a block list
/// or null, so it is kept untyped.
#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Value,
}

impl ChatCompletionResponse {
    /// Content of the first choice, or `Null` if there is none.
    pub fn first_content(&self) -> &Value {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| &m.content)
            .unwrap_or(&Value::Null)
    }
}

/// Stateful responses-API reply. Text extraction works on the raw body.
#[derive(Debug, Deserialize)]
pub struct ResponsesReply {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_usage")]
    pub usage: Option<Usage>,
}

/// Agent invocation reply: `{message, stop_reason?, conversation_id?}`.
#[derive(Debug, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_usage_is_dropped() {
        let reply: ResponsesReply = serde_json::from_value(json!({
            "id": "r1",
            "usage": {"prompt_tokens": 20, "input_tokens": 20, "output_tokens": 7}
        }))
        .unwrap();
        assert_eq!(reply.id.as_deref(), Some("r1"));
        assert!(reply.usage.is_none());

        let reply: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": [], "usage": "n/a"})).unwrap();
        assert!(reply.usage.is_none());
    }

    #[test]
    fn test_usage_null_or_absent() {
        let reply: ChatCompletionResponse = serde_json::from_value(json!({"usage": null})).unwrap();
        assert!(reply.usage.is_none());
        let reply: ResponsesReply = serde_json::from_value(json!({})).unwrap();
        assert!(reply.usage.is_none());
    }

    #[test]
    fn test_well_formed_usage_is_kept() {
        let reply: ResponsesReply = serde_json::from_value(json!({
            "usage": {"input_tokens": 20, "output_tokens": 7, "total_tokens": 27}
        }))
        .unwrap();
        let usage = reply.usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(20));
        assert_eq!(usage.completion_tokens, Some(7));
    }
}
