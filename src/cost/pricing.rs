//! Pricing oracle: converts token usage into dollars.
//!
//! [`PricingTable`] is the built-in oracle. It ships approximate list prices
//! for common models and accepts extra entries from a LiteLLM-style JSON
//! registry (`{"model": {"input_cost_per_token": .., "output_cost_per_token": ..}}`).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::Result;

/// Token counts handed to the oracle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Why the oracle could not price a call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("no pricing data for model '{0}'")]
    UnknownModel(String),

    #[error("pricing data for model '{model}' is invalid: {reason}")]
    InvalidPricing { model: String, reason: String },
}

/// Provider/model-aware cost table or service.
pub trait PricingOracle: Send + Sync {
    /// Dollar cost of a call to `model` with the given usage.
    fn completion_cost(
        &self,
        model: &str,
        usage: &TokenUsage,
    ) -> std::result::Result<f64, PricingError>;
}

/// Per-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
}

impl ModelPricing {
    /// Build from prices per million tokens.
    pub fn per_million(input: f64, output: f64) -> Self {
        Self {
            input_cost_per_token: input / 1_000_000.0,
            output_cost_per_token: output / 1_000_000.0,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        usage.prompt_tokens as f64 * self.input_cost_per_token
            + usage.completion_tokens as f64 * self.output_cost_per_token
    }
}

/// Registry entry. Unknown LiteLLM keys (`max_tokens`, `mode`, ...) are ignored.
#[derive(Debug, Deserialize)]
struct RegistryEntry {
    input_cost_per_token: Option<f64>,
    output_cost_per_token: Option<f64>,
}

/// In-memory pricing table keyed by lowercase model name.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// An empty table. Every lookup fails until entries are registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table preloaded with approximate list prices (USD per 1M tokens).
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for (name, input, output) in [
            ("claude-opus-4", 15.0, 75.0),
            ("claude-sonnet-4", 3.0, 15.0),
            ("claude-3-7-sonnet", 3.0, 15.0),
            ("claude-3-5-sonnet", 3.0, 15.0),
            ("claude-3-5-haiku", 0.8, 4.0),
            ("gpt-4o", 2.5, 10.0),
            ("gpt-4o-mini", 0.15, 0.6),
            ("gpt-4.1", 2.0, 8.0),
            ("gpt-4.1-mini", 0.4, 1.6),
            ("gpt-5", 1.25, 10.0),
            ("gpt-5-mini", 0.25, 2.0),
            ("o3", 2.0, 8.0),
            ("o4-mini", 1.1, 4.4),
            ("gemini-2.0-flash", 0.1, 0.4),
            ("gemini-2.5-pro", 1.25, 10.0),
            ("gemini-2.5-flash", 0.3, 2.5),
            ("deepseek-chat", 0.27, 1.1),
        ] {
            table.register(name, ModelPricing::per_million(input, output));
        }
        table
    }

    pub fn register(&mut self, model: impl AsRef<str>, pricing: ModelPricing) {
        self.models.insert(model.as_ref().to_lowercase(), pricing);
    }

    /// Register every priced entry of a LiteLLM-style JSON registry.
    ///
    /// Returns the number of entries registered. Entries without both
    /// per-token prices are skipped.
    pub fn register_json(&mut self, json: &str) -> Result<usize> {
        let entries: HashMap<String, RegistryEntry> = serde_json::from_str(json)?;
        let mut count = 0;
        for (name, entry) in entries {
            match (entry.input_cost_per_token, entry.output_cost_per_token) {
                (Some(input), Some(output)) => {
                    self.register(&name, ModelPricing {
                        input_cost_per_token: input,
                        output_cost_per_token: output,
                    });
                    count += 1;
                }
                _ => debug!("Skipping registry entry '{}' without per-token prices", name),
            }
        }
        Ok(count)
    }

    /// Load a registry file into the table.
    pub fn load_registry(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let count = self.register_json(&content)?;
        debug!("Registered {} model price(s) from {:?}", count, path);
        Ok(count)
    }

    /// Find pricing for a model name.
    ///
    /// Tries the full name, then the segment after the last `/`
    /// (`"openai/gpt-4o"` → `"gpt-4o"`), then the longest registered name
    /// that is a dash-delimited prefix of that segment
    /// (`"gpt-4o-2024-08-06"` → `"gpt-4o"`).
    pub fn lookup(&self, model: &str) -> Option<&ModelPricing> {
        let full = model.to_lowercase();
        if let Some(p) = self.models.get(&full) {
            return Some(p);
        }

        let name = full.rsplit('/').next().unwrap_or(&full);
        if let Some(p) = self.models.get(name) {
            return Some(p);
        }

        self.models
            .iter()
            .filter(|(key, _)| {
                name.strip_prefix(key.as_str())
                    .is_some_and(|rest| rest.starts_with('-'))
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| p)
    }
}

impl PricingOracle for PricingTable {
    fn completion_cost(
        &self,
        model: &str,
        usage: &TokenUsage,
    ) -> std::result::Result<f64, PricingError> {
        let pricing = self
            .lookup(model)
            .ok_or_else(|| PricingError::UnknownModel(model.to_string()))?;

        if !pricing.input_cost_per_token.is_finite() || !pricing.output_cost_per_token.is_finite() {
            return Err(PricingError::InvalidPricing {
                model: model.to_string(),
                reason: "non-finite per-token price".to_string(),
            });
        }

        Ok(pricing.cost(usage))
    }
}

/// Registry entries consulted before another oracle.
pub struct RegistryOverlay {
    registry: PricingTable,
    fallback: Arc<dyn PricingOracle>,
}

impl RegistryOverlay {
    pub fn new(registry: PricingTable, fallback: Arc<dyn PricingOracle>) -> Self {
        Self { registry, fallback }
    }
}

impl PricingOracle for RegistryOverlay {
    fn completion_cost(
        &self,
        model: &str,
        usage: &TokenUsage,
    ) -> std::result::Result<f64, PricingError> {
        if self.registry.lookup(model).is_some() {
            self.registry.completion_cost(model, usage)
        } else {
            self.fallback.completion_cost(model, usage)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn usage(prompt: u64, completion: u64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn test_cost_estimation() {
        let pricing = ModelPricing::per_million(3.0, 15.0);
        let cost = pricing.cost(&usage(1_000_000, 100_000));
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_strips_provider_prefix_and_date_suffix() {
        let table = PricingTable::builtin();
        assert!(table.lookup("openai/gpt-4o").is_some());
        assert!(table.lookup("Anthropic/Claude-Sonnet-4").is_some());

        let dated = table.lookup("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(dated, table.lookup("gpt-4o-mini").unwrap());

        // "gpt-4o" must not match "gpt-4omni" (no dash boundary)
        assert!(table.lookup("gpt-4omni").is_none());
    }

    #[test]
    fn test_unknown_model_is_an_error() {
        let table = PricingTable::builtin();
        let err = table
            .completion_cost("my-custom-model", &usage(10, 10))
            .unwrap_err();
        assert_eq!(err, PricingError::UnknownModel("my-custom-model".into()));
    }

    #[test]
    fn test_registry_file_registers_models() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "my-custom-model": {{
                    "max_tokens": 4096,
                    "input_cost_per_token": 0.0001,
                    "output_cost_per_token": 0.0002,
                    "litellm_provider": "openai",
                    "mode": "chat"
                }},
                "embedding-only": {{"mode": "embedding"}}
            }}"#
        )
        .unwrap();

        let mut table = PricingTable::empty();
        let count = table.load_registry(file.path()).unwrap();
        assert_eq!(count, 1);

        let cost = table
            .completion_cost("my-custom-model", &usage(1000, 500))
            .unwrap();
        assert!((cost - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_overlay_prefers_registry_then_falls_back() {
        let mut registry = PricingTable::empty();
        registry.register("gpt-4o", ModelPricing::per_million(100.0, 100.0));
        let overlay = RegistryOverlay::new(registry, Arc::new(PricingTable::builtin()));

        let custom = overlay.completion_cost("gpt-4o", &usage(1_000_000, 0)).unwrap();
        assert!((custom - 100.0).abs() < 1e-9);

        let builtin = overlay
            .completion_cost("claude-sonnet-4", &usage(1_000_000, 0))
            .unwrap();
        assert!((builtin - 3.0).abs() < 1e-9);

        assert!(overlay.completion_cost("unknown", &usage(1, 1)).is_err());
    }

    #[test]
    fn test_missing_registry_file_is_io_error() {
        let mut table = PricingTable::empty();
        let err = table
            .load_registry(Path::new("/definitely/not/here.json"))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
