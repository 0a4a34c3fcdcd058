//! Stateless chat completions through the gateway.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde_json::{json, Map, Value};

use crate::config::ModelConfig;
use crate::cost::{CostAccountant, CostRules};
use crate::message::{apply_cache_control, to_wire, Message};
use crate::stats::ModelStats;
use crate::text::flatten_content;
use crate::Result;

use super::{
    decode, join_url, send_json, BackendContext, BackendCore, ChatCompletionResponse,
    ModelBackend, QueryResult,
};

/// Default gateway API root.
pub const DEFAULT_GATEWAY_URL: &str = "https://api.portkey.ai/v1";

const API_KEY_HEADER: &str = "x-portkey-api-key";
const VIRTUAL_KEY_HEADER: &str = "x-portkey-virtual-key";

/// Gateway reports cached tokens in the total but not in the prompt count,
/// so totals are reconciled. A zero cost is legitimate.
const CHAT_COST_RULES: CostRules = CostRules {
    fix_totals: true,
    require_positive: false,
};

/// Endpoint and credentials shared by both gateway backends.
#[derive(Debug, Clone)]
pub(crate) struct GatewayConnection {
    base_url: String,
    api_key: String,
    virtual_key: Option<String>,
}

impl GatewayConnection {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            api_key: config.require(&config.api_key, "api_key")?.to_string(),
            virtual_key: config.virtual_key.clone().filter(|k| !k.is_empty()),
        })
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Attach the gateway credentials to a request.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(API_KEY_HEADER, &self.api_key);
        match &self.virtual_key {
            Some(key) => request.header(VIRTUAL_KEY_HEADER, key),
            None => request,
        }
    }
}

/// Chat-completion backend priced from token usage.
pub struct GatewayChatBackend {
    pub(crate) core: BackendCore,
    connection: GatewayConnection,
    costs: CostAccountant,
}

impl GatewayChatBackend {
    pub fn new(config: ModelConfig, ctx: &BackendContext) -> Result<Self> {
        let connection = GatewayConnection::from_config(&config)?;
        let costs = CostAccountant::for_config(ctx.pricing.clone(), &config)?;
        Ok(Self {
            core: BackendCore::new(config, ctx),
            connection,
            costs,
        })
    }
}

#[async_trait]
impl ModelBackend for GatewayChatBackend {
    async fn query_with_params(
        &mut self,
        messages: &[Message],
        params: &Map<String, Value>,
    ) -> Result<QueryResult> {
        let messages = match self.core.config.cache_control {
            Some(mode) => apply_cache_control(messages, mode),
            None => messages.to_vec(),
        };

        let body = self.core.body(
            vec![
                ("model", json!(self.core.config.model_name)),
                ("messages", Value::Array(to_wire(&messages))),
            ],
            params,
        )?;

        let url = self.connection.url("chat/completions");
        let core = &self.core;
        let connection = &self.connection;
        let body = &body;
        let url = url.as_str();
        let provider = core.provider();

        let raw = core
            .policy
            .execute(&core.cancel, move || async move {
                let request = connection.authorize(core.post(url)).json(body);
                send_json(request, provider).await
            })
            .await?;
        let reply: ChatCompletionResponse = decode(&raw, provider)?;

        let cost = self.costs.token_cost(
            &self.core.config,
            reply.model.as_deref(),
            reply.usage.as_ref(),
            CHAT_COST_RULES,
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
