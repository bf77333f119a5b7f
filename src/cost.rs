//! Cost calculation from token usage and model pricing.
//!
//! The rate table is configuration, not an invariant: callers may replace any
//! rate, add models, or change the fallback used for unknown models.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Price of a model in US dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelRate {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Dollar cost of a call with the given token counts.
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64) * self.input_per_million / 1_000_000.0
            + (output_tokens as f64) * self.output_per_million / 1_000_000.0
    }
}

/// Rate charged for models missing from the table. Deliberately high so an
/// unknown model exhausts its budget early rather than late.
pub const FALLBACK_RATE: ModelRate = ModelRate::new(15.0, 75.0);

/// Built-in rates, keyed by normalized model name (dots written as dashes).
const DEFAULT_RATES: &[(&str, f64, f64)] = &[
    // Anthropic
    ("claude-opus-4-5", 5.00, 25.00),
    ("claude-opus-4-1", 15.00, 75.00),
    ("claude-opus-4", 15.00, 75.00),
    ("claude-sonnet-4-5", 3.00, 15.00),
    ("claude-sonnet-4", 3.00, 15.00),
    ("claude-haiku-4-5", 1.00, 5.00),
    ("claude-3-7-sonnet", 3.00, 15.00),
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-3-haiku", 0.25, 1.25),
    // OpenAI
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4-1-mini", 0.40, 1.60),
    ("gpt-4-1", 2.00, 8.00),
    ("gpt-5-mini", 0.25, 2.00),
    ("gpt-5", 1.25, 10.00),
    ("o4-mini", 1.10, 4.40),
    ("o3", 2.00, 8.00),
    // Google
    ("gemini-2-5-pro", 1.25, 10.00),
    ("gemini-2-5-flash", 0.30, 2.50),
    ("gemini-2-0-flash", 0.10, 0.40),
];

/// Normalize a model id for pricing lookup.
///
/// Strips the provider prefix (`anthropic/…`) and a trailing snapshot date
/// (`-20241022`, `-2024-07-18`), and writes `3.5` as `3-5`. Variants such as
/// `o3-pro` stay distinct from their base model.
fn normalize_model(model: &str) -> String {
    let trimmed = model.trim().to_ascii_lowercase();
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed.as_str());
    strip_date_suffix(base).replace('.', "-")
}

fn strip_date_suffix(id: &str) -> &str {
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if let Some((head, tail)) = id.rsplit_once('-') {
        if tail.len() == 8 && all_digits(tail) {
            return head;
        }
    }

    // -YYYY-MM-DD
    let parts: Vec<&str> = id.rsplitn(4, '-').collect();
    if let [day, month, year, head] = parts.as_slice() {
        if year.len() == 4
            && month.len() == 2
            && day.len() == 2
            && all_digits(year)
            && all_digits(month)
            && all_digits(day)
        {
            return head;
        }
    }
    id
}

/// Pluggable per-model pricing table.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, ModelRate>,
    fallback: ModelRate,
}

impl PricingTable {
    /// Create an empty table; every lookup resolves to the fallback rate.
    pub fn new() -> Self {
        Self {
            rates: HashMap::new(),
            fallback: FALLBACK_RATE,
        }
    }

    /// Create a table pre-populated with the built-in rates.
    pub fn with_defaults() -> Self {
        let rates = DEFAULT_RATES
            .iter()
            .map(|(family, input, output)| (family.to_string(), ModelRate::new(*input, *output)))
            .collect();
        Self {
            rates,
            fallback: FALLBACK_RATE,
        }
    }

    /// Set or replace the rate of one model.
    pub fn insert(&mut self, model: impl Into<String>, rate: ModelRate) {
        self.rates.insert(model.into(), rate);
    }

    pub fn with_rate(mut self, model: impl Into<String>, rate: ModelRate) -> Self {
        self.insert(model, rate);
        self
    }

    /// Layer a set of overrides (e.g. from configuration) over this table.
    pub fn with_overrides(mut self, overrides: HashMap<String, ModelRate>) -> Self {
        self.rates.extend(overrides);
        self
    }

    pub fn with_fallback(mut self, rate: ModelRate) -> Self {
        self.fallback = rate;
        self
    }

    /// Look up the rate for a model: exact id, then normalized family, then fallback.
    pub fn rate_for(&self, model: &str) -> ModelRate {
        if let Some(rate) = self.rates.get(model) {
            return *rate;
        }
        if let Some(rate) = self.rates.get(&normalize_model(model)) {
            return *rate;
        }
        tracing::warn!(model = %model, "Unknown model for cost calculation, using fallback rate");
        self.fallback
    }

    /// Dollar cost of a call made against `model`.
    pub fn cost_usd(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        if input_tokens == 0 && output_tokens == 0 {
            return 0.0;
        }
        self.rate_for(model).cost_usd(input_tokens, output_tokens)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
