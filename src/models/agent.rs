//! OAuth agent backend.
//!
//! Invokes a hosted agent by id with a client-credentials bearer token.
//! The agent keeps the conversation server-side, so only the latest user
//! prompt is sent along with the conversation id of the previous reply.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::auth::TokenManager;
use crate::config::ModelConfig;
use crate::conversation::ConversationState;
use crate::error::Error;
use crate::message::{last_user_content, Message};
use crate::stats::ModelStats;
use crate::Result;

use super::{
    decode, join_url, send_json, AgentReply, BackendContext, BackendCore, ModelBackend,
    QueryResult,
};

/// Default inference host.
pub const DEFAULT_AGENT_URL: &str = "https://genai-inference-app.stackspot.com";

/// Agent-invocation backend. Calls carry no cost telemetry and are
/// recorded at zero cost.
pub struct AgentBackend {
    pub(crate) core: BackendCore,
    tokens: TokenManager,
    endpoint: String,
    conversation: ConversationState,
}

impl AgentBackend {
    pub fn new(config: ModelConfig, ctx: &BackendContext) -> Result<Self> {
        if config.model_name.is_empty() {
            return Err(Error::Config(
                "agent id (model_name) is required for the agent provider".to_string(),
            ));
        }
        let tokens = TokenManager::from_config(ctx.http.clone(), &config)?;
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_AGENT_URL);
        let endpoint = join_url(base, &format!("v1/agent/{}/chat", config.model_name));

        Ok(Self {
            core: BackendCore::new(config, ctx),
            tokens,
            endpoint,
            conversation: ConversationState::default(),
        })
    }

    /// Request body. Extras override the defaults here.
    fn body(&self, prompt: &str, params: &Map<String, Value>) -> Value {
        let mut body = Map::new();
        body.insert("streaming".into(), json!(false));
        body.insert("user_prompt".into(), json!(prompt));
        body.insert("stackspot_knowledge".into(), json!(false));
        body.insert("return_ks_in_response".into(), json!(false));
        body.insert("use_conversation".into(), json!(true));
        if let Some(id) = self.conversation.continuation() {
            body.insert("conversation_id".into(), json!(id));
        }
        for (key, value) in self.core.config.model_kwargs.iter().chain(params.iter()) {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}

#[async_trait]
impl ModelBackend for AgentBackend {
    async fn query_with_params(
        &mut self,
        messages: &[Message],
        params: &Map<String, Value>,
    ) -> Result<QueryResult> {
        let prompt = last_user_content(messages).unwrap_or_else(|| {
            warn!("No user message in history; sending an empty prompt");
            ""
        });
        let body = self.body(prompt, params);

        let core = &self.core;
        let tokens = &self.tokens;
        let endpoint = self.endpoint.as_str();
        let body = &body;
        let provider = core.provider();

        // Token refresh sits inside each attempt, so one attempt may make
        // two provider calls.
        let raw = core
            .policy
            .execute(&core.cancel, move || async move {
                tokens
                    .with_token(move |token| async move {
                        let request = core.post(endpoint).bearer_auth(token).json(body);
                        send_json(request, provider).await
                    })
                    .await
            })
            .await?;
        let reply: AgentReply = decode(&raw, provider)?;

        self.conversation.advance(reply.conversation_id.as_deref());

        let content = match reply.message.filter(|m| !m.is_empty()) {
            Some(message) => message,
            None => {
                warn!("Agent reply has no message; returning the raw reply");
                raw.to_string()
            }
        };

        let cost = 0.0;
        self.core.record(cost);

        Ok(QueryResult {
            content,
            response: raw,
            cost,
        })
    }

    fn config(&self) -> &ModelConfig {
        &self.core.config
    }

    fn stats(&self) -> ModelStats {
        self.core.stats
    }

    fn conversation(&self) -> Option<&ConversationState> {
        Some(&self.conversation)
    }
}
