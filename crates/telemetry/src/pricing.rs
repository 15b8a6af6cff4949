//! Model pricing used to turn token usage into a USD cost.
//!
//! Prices are USD per 1 million tokens, split into input and output.
//! Entries from the configuration file override the built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

impl ModelPricing {
    pub const fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Cost in USD for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) * self.input_per_m + f64::from(output_tokens) * self.output_per_m)
            / 1_000_000.0
    }
}

const BUILTIN: &[(&str, ModelPricing)] = &[
    // ── Anthropic ──
    ("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
    ("anthropic/claude-opus-4", ModelPricing::new(15.0, 75.0)),
    ("anthropic/claude-3.5-haiku", ModelPricing::new(0.8, 4.0)),
    // ── OpenAI ──
    ("openai/gpt-4o", ModelPricing::new(2.5, 10.0)),
    ("openai/gpt-4o-mini", ModelPricing::new(0.15, 0.6)),
    ("openai/o3-mini", ModelPricing::new(1.1, 4.4)),
    // ── Google ──
    ("google/gemini-2.0-flash", ModelPricing::new(0.1, 0.4)),
    ("google/gemini-1.5-pro", ModelPricing::new(1.25, 5.0)),
    // ── Others ──
    ("mistral/mistral-large", ModelPricing::new(2.0, 6.0)),
    ("deepseek/deepseek-v3", ModelPricing::new(0.27, 1.1)),
    ("deepseek/deepseek-r1", ModelPricing::new(0.55, 2.19)),
];

/// Thread-safe pricing table.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// A table holding the built-in model prices.
    pub fn with_defaults() -> Self {
        let prices = BUILTIN
            .iter()
            .map(|(name, pricing)| ((*name).to_string(), *pricing))
            .collect();
        Self {
            prices: RwLock::new(prices),
        }
    }

    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .copied()
    }

    /// Add or replace pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), pricing);
    }

    /// Resolve pricing for a model name as reported by a provider.
    ///
    /// Tries the exact name, then the bare name against entries with a
    /// provider prefix (`gpt-4o` → `openai/gpt-4o`), then the longest entry
    /// whose bare name prefixes the model (`gpt-4o-mini-2024-07-18` →
    /// `gpt-4o-mini`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        let lower = model.to_lowercase();
        let bare = lower.rsplit('/').next().unwrap_or(&lower);

        let mut best: Option<(usize, ModelPricing)> = None;
        for (key, pricing) in prices.iter() {
            let key_bare = key.rsplit('/').next().unwrap_or(key).to_lowercase();
            if key_bare == bare {
                return Some(*pricing);
            }
            if bare.starts_with(&key_bare) && best.is_none_or(|(len, _)| key_bare.len() > len) {
                best = Some((key_bare.len(), *pricing));
            }
        }
        best.map(|(_, p)| p)
    }

    /// Cost of a call in USD, or 0.0 for unknown models.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.resolve(model)
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }

    /// Known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
