//! Configuration management

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::Result;

/// Environment variable names read by [`ModelConfig::apply_env`].
pub mod env {
    pub const GATEWAY_API_KEY: &str = "RELAY_GATEWAY_API_KEY";
    pub const GATEWAY_VIRTUAL_KEY: &str = "RELAY_GATEWAY_VIRTUAL_KEY";
    pub const ROUTER_API_KEY: &str = "RELAY_ROUTER_API_KEY";
    pub const AGENT_CLIENT_ID: &str = "RELAY_AGENT_CLIENT_ID";
    pub const AGENT_CLIENT_SECRET: &str = "RELAY_AGENT_CLIENT_SECRET";
    pub const AGENT_REALM: &str = "RELAY_AGENT_REALM";
    pub const COST_TRACKING: &str = "RELAY_COST_TRACKING";
    pub const RETRY_MAX_ATTEMPTS: &str = "RELAY_RETRY_MAX_ATTEMPTS";
    pub const PRICING_REGISTRY: &str = "RELAY_PRICING_REGISTRY";
}

/// Which provider family a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Stateless chat completions through the gateway.
    Gateway,
    /// Stateful "previous response" API through the gateway.
    GatewayResponses,
    /// Direct HTTP router with bearer auth and provider-reported cost.
    Router,
    /// OAuth client-credentials agent invocation.
    Agent,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gateway => "gateway",
            ProviderKind::GatewayResponses => "gateway-responses",
            ProviderKind::Router => "router",
            ProviderKind::Agent => "agent",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gateway" => Ok(ProviderKind::Gateway),
            "gateway-responses" => Ok(ProviderKind::GatewayResponses),
            "router" => Ok(ProviderKind::Router),
            "agent" => Ok(ProviderKind::Agent),
            other => Err(Error::Config(format!("Unknown provider: {other}"))),
        }
    }
}

/// What happens when the cost of a call cannot be computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTrackingMode {
    /// Cost failures abort the query.
    #[default]
    #[serde(alias = "default")]
    Strict,
    /// Cost failures are logged and the call is priced at zero.
    IgnoreErrors,
}

impl FromStr for CostTrackingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strict" | "default" => Ok(CostTrackingMode::Strict),
            "ignore_errors" => Ok(CostTrackingMode::IgnoreErrors),
            other => Err(Error::Config(format!(
                "Unknown cost tracking mode: {other} (expected 'strict' or 'ignore_errors')"
            ))),
        }
    }
}

/// Explicit prompt-cache markers to add before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControlMode {
    /// Mark only the final message of the history.
    DefaultEnd,
}

/// Backoff parameters for [`RetryPolicy`](crate::retry::RetryPolicy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_multiplier_secs")]
    pub multiplier_secs: f64,

    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: f64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_multiplier_secs() -> f64 {
    1.0
}

fn default_min_delay_secs() -> f64 {
    4.0
}

fn default_max_delay_secs() -> f64 {
    60.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            multiplier_secs: default_multiplier_secs(),
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetrySettings {
    /// No waiting between attempts. Used by tests and batch tooling.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            multiplier_secs: 0.0,
            min_delay_secs: 0.0,
            max_delay_secs: 0.0,
        }
    }
}

/// Per-backend model configuration.
///
/// Immutable once a backend has been built from it. Secrets are accepted
/// on deserialization but never serialized back out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,

    /// Model name, or the agent id for [`ProviderKind::Agent`].
    pub model_name: String,

    /// Extra body parameters merged into every request.
    #[serde(default)]
    pub model_kwargs: Map<String, Value>,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing)]
    pub virtual_key: Option<String>,

    #[serde(default, skip_serializing)]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,

    /// Tenant of the OAuth token endpoint.
    #[serde(default)]
    pub realm: Option<String>,

    /// Overrides the provider API endpoint (scheme + host + optional prefix).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Overrides the OAuth token endpoint host.
    #[serde(default)]
    pub auth_url: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Model name handed to the pricing oracle instead of the response's model.
    #[serde(default)]
    pub pricing_model_override: Option<String>,

    /// Extra pricing entries registered at backend construction.
    #[serde(default)]
    pub pricing_registry: Option<PathBuf>,

    #[serde(default)]
    pub cost_tracking: CostTrackingMode,

    #[serde(default)]
    pub cache_control: Option<CacheControlMode>,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl ModelConfig {
    /// Create a config with defaults for everything but provider and model.
    pub fn new(provider: ProviderKind, model_name: impl Into<String>) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            model_kwargs: Map::new(),
            api_key: None,
            virtual_key: None,
            client_id: None,
            client_secret: None,
            realm: None,
            base_url: None,
            auth_url: None,
            timeout_secs: None,
            pricing_model_override: None,
            pricing_registry: None,
            cost_tracking: CostTrackingMode::default(),
            cache_control: None,
            retry: RetrySettings::default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_virtual_key(mut self, key: impl Into<String>) -> Self {
        self.virtual_key = Some(key.into());
        self
    }

    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self.realm = Some(realm.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    pub fn with_model_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.model_kwargs.insert(key.into(), value);
        self
    }

    pub fn with_pricing_override(mut self, model: impl Into<String>) -> Self {
        self.pricing_model_override = Some(model.into());
        self
    }

    pub fn with_cost_tracking(mut self, mode: CostTrackingMode) -> Self {
        self.cost_tracking = mode;
        self
    }

    pub fn with_cache_control(mut self, mode: CacheControlMode) -> Self {
        self.cache_control = Some(mode);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Request timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Fill unset fields from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Fill unset fields using `lookup` as the environment.
    ///
    /// Credentials are only read for the provider this config targets.
    /// Explicit values always win over the environment.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        match self.provider {
            ProviderKind::Gateway | ProviderKind::GatewayResponses => {
                self.api_key = self.api_key.or_else(|| get(env::GATEWAY_API_KEY));
                self.virtual_key = self.virtual_key.or_else(|| get(env::GATEWAY_VIRTUAL_KEY));
            }
            ProviderKind::Router => {
                self.api_key = self.api_key.or_else(|| get(env::ROUTER_API_KEY));
            }
            ProviderKind::Agent => {
                self.client_id = self.client_id.or_else(|| get(env::AGENT_CLIENT_ID));
                self.client_secret = self.client_secret.or_else(|| get(env::AGENT_CLIENT_SECRET));
                self.realm = self.realm.or_else(|| get(env::AGENT_REALM));
            }
        }

        if let Some(mode) = get(env::COST_TRACKING) {
            self.cost_tracking = mode.parse()?;
        }

        if let Some(attempts) = get(env::RETRY_MAX_ATTEMPTS) {
            self.retry.max_attempts = attempts
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "{} must be a positive integer, got {attempts:?}",
                        env::RETRY_MAX_ATTEMPTS
                    ))
                })?;
        }

        if self.pricing_registry.is_none() {
            self.pricing_registry = get(env::PRICING_REGISTRY).map(PathBuf::from);
        }

        Ok(self)
    }

    /// Return the value of a required credential or a config error naming it.
    pub(crate) fn require<'a>(&self, value: &'a Option<String>, what: &str) -> Result<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "{what} is required for the {} provider (model {})",
                    self.provider, self.model_name
                ))
            })
    }
}
