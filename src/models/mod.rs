//! Model backends.
//!
//! This module provides:
//! - [`ModelBackend`] trait, the one query contract every provider implements
//! - [`ProviderRegistry`] for creating a backend from a [`ModelConfig`]
//! - Concrete implementations: gateway chat completions, gateway responses,
//!   direct-HTTP router, OAuth agent
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `bedrock.rs`)
//! 2. Implement `ModelBackend`, composing `BackendCore` for retry and stats
//! 3. Add a variant to `ProviderKind` and to `ProviderRegistry::create()`

mod types;

pub mod agent;
pub mod gateway;
pub mod responses;
pub mod router;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ModelConfig, ProviderKind};
use crate::conversation::ConversationState;
use crate::cost::{PricingOracle, PricingTable};
use crate::error::Error;
use crate::message::Message;
use crate::retry::RetryPolicy;
use crate::stats::{GlobalStats, ModelStats};
use crate::Result;

pub use agent::AgentBackend;
pub use gateway::GatewayChatBackend;
pub use responses::GatewayResponsesBackend;
pub use router::RouterBackend;
pub use types::*;

/// Result of one successful query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Normalized text of the reply.
    pub content: String,
    /// Raw provider response body.
    pub response: Value,
    /// Dollar cost attributed to this call.
    pub cost: f64,
}

/// Collaborators shared by the backends of one process.
#[derive(Clone)]
pub struct BackendContext {
    pub stats: Arc<GlobalStats>,
    pub pricing: Arc<dyn PricingOracle>,
    pub cancel: CancellationToken,
    pub http: Client,
}

impl BackendContext {
    /// Context with the built-in pricing table, a fresh cancellation token
    /// and a default HTTP client.
    pub fn new(stats: Arc<GlobalStats>) -> Self {
        Self {
            stats,
            pricing: Arc::new(PricingTable::builtin()),
            cancel: CancellationToken::new(),
            http: Client::new(),
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingOracle>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Model backend trait: one query contract over every provider family.
///
/// A backend instance is driven by one conversation at a time; `query`
/// takes `&mut self` because stateful backends advance their continuation
/// token on every call.
#[async_trait]
pub trait ModelBackend: Send {
    /// Send the conversation with extra per-call body parameters.
    async fn query_with_params(
        &mut self,
        messages: &[Message],
        params: &Map<String, Value>,
    ) -> Result<QueryResult>;

    /// Send the conversation and return the normalized reply.
    async fn query(&mut self, messages: &[Message]) -> Result<QueryResult> {
        self.query_with_params(messages, &Map::new()).await
    }

    fn config(&self) -> &ModelConfig;

    /// Calls and cost of this instance.
    fn stats(&self) -> ModelStats;

    /// Server-side conversation state, for stateful backends.
    fn conversation(&self) -> Option<&ConversationState> {
        None
    }

    /// Serialized config plus `n_model_calls` and `model_cost`, for prompt templates.
    fn template_vars(&self) -> Map<String, Value> {
        let mut vars = match serde_json::to_value(self.config()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let stats = self.stats();
        vars.insert("n_model_calls".to_string(), Value::from(stats.n_calls));
        vars.insert("model_cost".to_string(), Value::from(stats.cost));
        vars
    }
}

/// Provider registry: creates backends dynamically.
///
/// # Example
///
/// ```ignore
/// let ctx = BackendContext::new(Arc::new(GlobalStats::new()));
/// let mut backend = ProviderRegistry::create(config, &ctx)?;
/// let result = backend.query(&messages).await?;
/// ```
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Create a backend from configuration.
    ///
    /// Missing credentials are a [`Error::Config`] here, not at the first query.
    pub fn create(config: ModelConfig, ctx: &BackendContext) -> Result<Box<dyn ModelBackend>> {
        Ok(match config.provider {
            ProviderKind::Gateway => Box::new(GatewayChatBackend::new(config, ctx)?),
            ProviderKind::GatewayResponses => Box::new(GatewayResponsesBackend::new(config, ctx)?),
            ProviderKind::Router => Box::new(RouterBackend::new(config, ctx)?),
            ProviderKind::Agent => Box::new(AgentBackend::new(config, ctx)?),
        })
    }

    /// List available provider names.
    pub fn available() -> &'static [&'static str] {
        &["gateway", "gateway-responses", "router", "agent"]
    }
}

/// State and plumbing every backend composes: config, transport, retry,
/// cancellation and counters.
pub(crate) struct BackendCore {
    pub config: ModelConfig,
    pub http: Client,
    pub policy: RetryPolicy,
    pub cancel: CancellationToken,
    pub global: Arc<GlobalStats>,
    pub stats: ModelStats,
}

impl BackendCore {
    pub fn new(config: ModelConfig, ctx: &BackendContext) -> Self {
        let policy = RetryPolicy::new(
            config.retry.clone(),
            format!("{} {}", config.provider, config.model_name),
        );
        Self {
            config,
            http: ctx.http.clone(),
            policy,
            cancel: ctx.cancel.clone(),
            global: ctx.stats.clone(),
            stats: ModelStats::default(),
        }
    }

    pub fn provider(&self) -> &'static str {
        self.config.provider.as_str()
    }

    /// POST builder with the configured timeout applied.
    pub fn post(&self, url: &str) -> RequestBuilder {
        let request = self.http.post(url);
        match self.config.timeout() {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    /// Count a successful call locally and process-wide.
    pub fn record(&mut self, cost: f64) {
        self.stats.record(cost);
        self.global.add(cost);
    }

    /// Build a JSON body from the core fields plus `model_kwargs` and
    /// per-call `params` (later wins). Extras may not replace a core field.
    pub fn body(
        &self,
        core_fields: Vec<(&'static str, Value)>,
        params: &Map<String, Value>,
    ) -> Result<Value> {
        let mut body = Map::new();
        for (key, value) in &core_fields {
            body.insert(key.to_string(), value.clone());
        }

        for (key, value) in self.config.model_kwargs.iter().chain(params.iter()) {
            if core_fields.iter().any(|(core, _)| *core == key.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "'{key}' is set by the {} backend and cannot be passed as an extra parameter",
                    self.config.provider
                )));
            }
            body.insert(key.clone(), value.clone());
        }

        Ok(Value::Object(body))
    }
}

/// Send a request and return its JSON body, mapping HTTP failures.
///
/// 401 is an authentication error, 429 a rate limit, any other non-2xx a
/// generic provider error. A 2xx body that is not JSON is an invalid response.
pub(crate) async fn send_json(request: RequestBuilder, provider: &str) -> Result<Value> {
    let started = Instant::now();
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    debug!(
        "{} responded {} in {:?} ({} bytes)",
        provider,
        status,
        started.elapsed(),
        body.len()
    );

    match status {
        StatusCode::UNAUTHORIZED => Err(Error::Auth {
            provider: provider.to_string(),
            message: body,
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited {
            provider: provider.to_string(),
            message: body,
        }),
        s if !s.is_success() => Err(Error::Provider {
            provider: provider.to_string(),
            status: s.as_u16(),
            message: body,
        }),
        _ => serde_json::from_str(&body).map_err(|e| Error::InvalidResponse {
            provider: provider.to_string(),
            message: format!("{e}: {body}"),
        }),
    }
}

/// Decode the typed view of a raw body.
pub(crate) fn decode<T: DeserializeOwned>(raw: &Value, provider: &str) -> Result<T> {
    T::deserialize(raw).map_err(|e| Error::InvalidResponse {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

/// Join a base URL and a path with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::RetrySettings;
    use crate::cost::testing::FixedPricing;

    /// Context with a fixed-price oracle and its own stats.
    pub fn context(cost: f64) -> (BackendContext, Arc<GlobalStats>) {
        let stats = Arc::new(GlobalStats::new());
        let ctx = BackendContext::new(stats.clone()).with_pricing(FixedPricing::cost(cost));
        (ctx, stats)
    }

    /// Config pointed at a mock server with instant retries.
    pub fn config(provider: ProviderKind, model: &str, base_url: &str) -> ModelConfig {
        ModelConfig::new(provider, model)
            .with_base_url(base_url)
            .with_retry(RetrySettings::immediate(3))
    }
}
