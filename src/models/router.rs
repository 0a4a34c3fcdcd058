//! Direct-HTTP router backend.
//!
//! OpenAI-compatible chat completions with bearer auth and attribution
//! headers. The router reports the dollar cost of each call in the usage
//! block; a reply without it fails the call.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::ModelConfig;
use crate::cost::CostAccountant;
use crate::message::{to_wire, Message};
use crate::stats::ModelStats;
use crate::text::flatten_content;
use crate::Result;

use super::{
    decode, join_url, send_json, BackendContext, BackendCore, ChatCompletionResponse,
    ModelBackend, QueryResult,
};

/// Default router API root.
pub const DEFAULT_ROUTER_URL: &str = "https://router.requesty.ai/v1";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const REFERER: &str = "https://crates.io/crates/model-relay";
const TITLE: &str = "model-relay";

/// Router backend priced by the provider-reported cost.
pub struct RouterBackend {
    pub(crate) core: BackendCore,
    api_key: String,
    endpoint: String,
}

impl RouterBackend {
    pub fn new(mut config: ModelConfig, ctx: &BackendContext) -> Result<Self> {
        let api_key = config.require(&config.api_key, "api_key")?.to_string();
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_ROUTER_URL);
        let endpoint = join_url(base, "chat/completions");

        if config.timeout_secs.is_none() {
            config.timeout_secs = Some(DEFAULT_TIMEOUT.as_secs());
        }

        Ok(Self {
            core: BackendCore::new(config, ctx),
            api_key,
            endpoint,
        })
    }
}

#[async_trait]
impl ModelBackend for RouterBackend {
    async fn query_with_params(
        &mut self,
        messages: &[Message],
        params: &Map<String, Value>,
    ) -> Result<QueryResult> {
        let body = self.core.body(
            vec![
                ("model", json!(self.core.config.model_name)),
                ("messages", Value::Array(to_wire(messages))),
            ],
            params,
        )?;

        let core = &self.core;
        let api_key = self.api_key.as_str();
        let endpoint = self.endpoint.as_str();
        let body = &body;
        let provider = core.provider();

        let raw = core
            .policy
            .execute(&core.cancel, move || async move {
                let request = core
                    .post(endpoint)
                    .bearer_auth(api_key)
                    .header("HTTP-Referer", REFERER)
                    .header("X-Title", TITLE)
                    .json(body);
                send_json(request, provider).await
            })
            .await?;
        let reply: ChatCompletionResponse = decode(&raw, provider)?;

        let cost = CostAccountant::reported_cost(
            provider,
            &self.core.config.model_name,
            reply.usage.as_ref(),
        )?;
        self.core.record(cost);

        Ok(QueryResult {
            content: flatten_content(reply.first_content()),
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
}
