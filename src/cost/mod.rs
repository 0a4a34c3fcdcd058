//! Per-call cost accounting.
//!
//! Two sources of cost exist:
//!
//! - **Token-based**: usage counts from the response are reconciled and
//!   priced through a [`PricingOracle`]. Failures follow the model's
//!   [`CostTrackingMode`].
//! - **Reported**: some providers put a dollar `cost` directly in the usage
//!   block. A missing or zero value is always an error.

pub mod pricing;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::{CostTrackingMode, ModelConfig};
use crate::error::Error;
use crate::Result;

pub use pricing::{
    ModelPricing, PricingError, PricingOracle, PricingTable, RegistryOverlay, TokenUsage,
};

/// Usage block as reported by a provider. Every field may be absent.
///
/// Accepts both chat-completion (`prompt_tokens`/`completion_tokens`) and
/// responses-style (`input_tokens`/`output_tokens`) names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, alias = "input_tokens")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, alias = "output_tokens")]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// Provider-computed dollar cost, when the provider reports one.
    #[serde(default)]
    pub cost: Option<f64>,
}

/// A correction applied while turning a [`Usage`] into [`TokenUsage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageAdjustment {
    MissingPromptTokens,
    MissingCompletionTokens,
    MissingTotalTokens,
    /// `total != prompt + completion`; prompt was recomputed as `total - completion`.
    PromptFromTotal { reported: u64, corrected: u64 },
}

/// Usage counts after reconciliation, with the corrections that were made.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledUsage {
    pub usage: TokenUsage,
    pub adjustments: Vec<UsageAdjustment>,
}

/// Turn reported usage into consistent counts.
///
/// Absent counts become zero. With `fix_totals`, a reported total that
/// disagrees with `prompt + completion` wins and the prompt count is
/// recomputed from it; some gateways leave cached tokens out of the prompt
/// count but keep them in the total. Every correction is logged.
pub fn reconcile_usage(usage: Option<&Usage>, model: &str, fix_totals: bool) -> ReconciledUsage {
    let usage = usage.cloned().unwrap_or_default();
    let mut adjustments = Vec::new();

    let mut prompt = usage.prompt_tokens.unwrap_or_else(|| {
        warn!("Prompt tokens are missing for model {}. Setting to 0.", model);
        adjustments.push(UsageAdjustment::MissingPromptTokens);
        0
    });
    let completion = usage.completion_tokens.unwrap_or_else(|| {
        warn!("Completion tokens are missing for model {}. Setting to 0.", model);
        adjustments.push(UsageAdjustment::MissingCompletionTokens);
        0
    });

    let total = match usage.total_tokens {
        Some(total) => {
            if fix_totals && total != prompt.saturating_add(completion) {
                let corrected = total.saturating_sub(completion);
                warn!(
                    "Total tokens ({}) != prompt ({}) + completion ({}) for model {}. \
                     Setting prompt tokens to {} from the total; double check your costs.",
                    total, prompt, completion, model, corrected
                );
                adjustments.push(UsageAdjustment::PromptFromTotal {
                    reported: prompt,
                    corrected,
                });
                prompt = corrected;
            }
            total
        }
        None => {
            warn!("Total tokens are missing for model {}. Using prompt + completion.", model);
            adjustments.push(UsageAdjustment::MissingTotalTokens);
            prompt.saturating_add(completion)
        }
    };

    ReconciledUsage {
        usage: TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        },
        adjustments,
    }
}

/// How strictly a backend treats token-based pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostRules {
    /// Apply the total-token reconciliation.
    pub fix_totals: bool,
    /// A zero cost counts as "could not be measured".
    pub require_positive: bool,
}

/// Why token-based pricing failed for one call.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CostFailure {
    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error("cost is negative: {0}")]
    Negative(f64),

    #[error("cost is not positive: {0}")]
    NotPositive(f64),
}

/// Computes the dollar cost of single calls.
#[derive(Clone)]
pub struct CostAccountant {
    oracle: Arc<dyn PricingOracle>,
}

impl CostAccountant {
    pub fn new(oracle: Arc<dyn PricingOracle>) -> Self {
        Self { oracle }
    }

    /// Accountant for one backend: `oracle`, overlaid with the config's
    /// pricing registry when that file exists.
    pub fn for_config(oracle: Arc<dyn PricingOracle>, config: &ModelConfig) -> Result<Self> {
        let path = match config.pricing_registry.as_deref() {
            Some(path) if path.is_file() => path,
            Some(path) => {
                debug!("Pricing registry {:?} not found, using default prices", path);
                return Ok(Self::new(oracle));
            }
            None => return Ok(Self::new(oracle)),
        };

        let mut registry = PricingTable::empty();
        registry.load_registry(path)?;
        Ok(Self::new(Arc::new(RegistryOverlay::new(registry, oracle))))
    }

    /// Model name to price against: the configured override, else the
    /// model the response declares, else the configured model name.
    pub fn pricing_model<'a>(config: &'a ModelConfig, declared: Option<&'a str>) -> &'a str {
        config
            .pricing_model_override
            .as_deref()
            .filter(|m| !m.is_empty())
            .or(declared.filter(|m| !m.is_empty()))
            .unwrap_or(&config.model_name)
    }

    /// Price a call from its usage counts.
    ///
    /// Under [`CostTrackingMode::IgnoreErrors`] any failure yields `0.0`;
    /// under [`CostTrackingMode::Strict`] it is a fatal
    /// [`Error::CostTracking`].
    pub fn token_cost(
        &self,
        config: &ModelConfig,
        declared_model: Option<&str>,
        usage: Option<&Usage>,
        rules: CostRules,
    ) -> Result<f64> {
        let model = Self::pricing_model(config, declared_model);

        match self.try_token_cost(model, usage, rules) {
            Ok(cost) => Ok(cost),
            Err(failure) => match config.cost_tracking {
                CostTrackingMode::IgnoreErrors => {
                    warn!(
                        "Ignoring cost calculation error for model {} ({}): {}",
                        config.model_name, model, failure
                    );
                    Ok(0.0)
                }
                CostTrackingMode::Strict => {
                    let err = Error::CostTracking {
                        model: config.model_name.clone(),
                        reason: format!("{failure} (priced as '{model}', usage {usage:?})"),
                    };
                    error!("{}", err);
                    Err(err)
                }
            },
        }
    }

    fn try_token_cost(
        &self,
        model: &str,
        usage: Option<&Usage>,
        rules: CostRules,
    ) -> std::result::Result<f64, CostFailure> {
        let reconciled = reconcile_usage(usage, model, rules.fix_totals);
        let cost = self.oracle.completion_cost(model, &reconciled.usage)?;

        if cost.is_nan() || cost < 0.0 {
            return Err(CostFailure::Negative(cost));
        }
        if rules.require_positive && cost <= 0.0 {
            return Err(CostFailure::NotPositive(cost));
        }
        Ok(cost)
    }

    /// Use the cost the provider reported in its usage block.
    ///
    /// There is no escape hatch: a missing, zero or negative value fails the
    /// call regardless of the cost-tracking mode.
    pub fn reported_cost(provider: &str, model: &str, usage: Option<&Usage>) -> Result<f64> {
        match usage.and_then(|u| u.cost) {
            Some(cost) if cost.is_finite() && cost > 0.0 => Ok(cost),
            _ => Err(Error::MissingCost {
                provider: provider.to_string(),
                model: model.to_string(),
            }),
        }
    }
}
