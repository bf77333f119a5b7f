//! Configuration management for budget_swarm.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. Credentials for the default backend.
//! - `DEFAULT_MODEL` - Optional. Model used by every agent. Defaults to `anthropic/claude-sonnet-4.5`.
//! - `MAX_TURNS` - Optional. Maximum model calls per agent. Defaults to `100`.
//! - `BUDGET_RESERVE_PERCENT` - Optional. Share of each task budget withheld from allocation. Defaults to `10`.
//! - `PLANNER_BUDGET_PERCENT` - Optional. Share of each task budget given to the planner. Defaults to `10`.
//! - `DEFAULT_BUDGET_USD` - Optional. Task budget used by the binary. Defaults to `5.0`.
//! - `OUTPUT_PREVIEW_CHARS` - Optional. Per-agent output length in aggregated results. Defaults to `1000`.
//! - `MODEL_PRICING` - Optional. JSON map of `model -> {input_per_million, output_per_million}`.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::budget::{DEFAULT_PLANNER_PERCENT, DEFAULT_RESERVE_PERCENT};
use crate::cost::ModelRate;

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";
pub const DEFAULT_MAX_TURNS: u32 = 100;
pub const DEFAULT_BUDGET_USD: f64 = 5.0;
pub const DEFAULT_OUTPUT_PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend API key
    pub api_key: String,

    /// Model identifier used for every agent of a task
    pub default_model: String,

    /// Maximum model calls per agent session
    pub max_turns: u32,

    /// Percentage of each task budget that is never allocated
    pub reserve_percent: f64,

    /// Percentage of each task budget allocated to the planner
    pub planner_budget_percent: f64,

    /// Task budget used when none is given explicitly
    pub default_budget_usd: f64,

    /// Maximum characters of each agent output kept in aggregated results
    pub output_preview_chars: usize,

    /// Per-model rate overrides layered over the built-in pricing table
    pub pricing_overrides: HashMap<String, ModelRate>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENROUTER_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let default_model = lookup("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_turns: u32 = parse_var(&lookup, "MAX_TURNS", DEFAULT_MAX_TURNS)?;
        if max_turns == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TURNS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let reserve_percent: f64 =
            parse_var(&lookup, "BUDGET_RESERVE_PERCENT", DEFAULT_RESERVE_PERCENT)?;
        if !(0.0..100.0).contains(&reserve_percent) {
            return Err(ConfigError::InvalidValue(
                "BUDGET_RESERVE_PERCENT".to_string(),
                format!("{} is outside [0, 100)", reserve_percent),
            ));
        }

        let planner_budget_percent: f64 =
            parse_var(&lookup, "PLANNER_BUDGET_PERCENT", DEFAULT_PLANNER_PERCENT)?;
        if !(planner_budget_percent > 0.0 && planner_budget_percent <= 100.0) {
            return Err(ConfigError::InvalidValue(
                "PLANNER_BUDGET_PERCENT".to_string(),
                format!("{} is outside (0, 100]", planner_budget_percent),
            ));
        }

        let default_budget_usd: f64 = parse_var(&lookup, "DEFAULT_BUDGET_USD", DEFAULT_BUDGET_USD)?;
        if !(default_budget_usd.is_finite() && default_budget_usd > 0.0) {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_BUDGET_USD".to_string(),
                "must be a positive amount".to_string(),
            ));
        }

        let output_preview_chars =
            parse_var(&lookup, "OUTPUT_PREVIEW_CHARS", DEFAULT_OUTPUT_PREVIEW_CHARS)?;

        let pricing_overrides = match lookup("MODEL_PRICING") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
                ConfigError::InvalidValue("MODEL_PRICING".to_string(), e.to_string())
            })?,
            _ => HashMap::new(),
        };

        Ok(Self {
            api_key,
            default_model,
            max_turns,
            reserve_percent,
            planner_budget_percent,
            default_budget_usd,
            output_preview_chars,
            pricing_overrides,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
            max_turns: DEFAULT_MAX_TURNS,
            reserve_percent: DEFAULT_RESERVE_PERCENT,
            planner_budget_percent: DEFAULT_PLANNER_PERCENT,
            default_budget_usd: DEFAULT_BUDGET_USD,
            output_preview_chars: DEFAULT_OUTPUT_PREVIEW_CHARS,
            pricing_overrides: HashMap::new(),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "OPENROUTER_API_KEY"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.default_model, DEFAULT_MODEL);
        assert_eq!(config.max_turns, 100);
        assert_eq!(config.reserve_percent, 10.0);
        assert_eq!(config.planner_budget_percent, 10.0);
        assert!(config.pricing_overrides.is_empty());
    }

    #[test]
    fn test_overrides_and_pricing_json() {
        let config = Config::from_lookup(lookup_from(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("MAX_TURNS", "12"),
            ("BUDGET_RESERVE_PERCENT", "5"),
            (
                "MODEL_PRICING",
                r#"{"local/tiny": {"input_per_million": 0.5, "output_per_million": 1.5}}"#,
            ),
        ]))
        .unwrap();
        assert_eq!(config.max_turns, 12);
        assert_eq!(config.reserve_percent, 5.0);
        let rate = config.pricing_overrides.get("local/tiny").unwrap();
        assert_eq!(rate.output_per_million, 1.5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("MAX_TURNS", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == "MAX_TURNS"));

        let err = Config::from_lookup(lookup_from(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("BUDGET_RESERVE_PERCENT", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == "BUDGET_RESERVE_PERCENT"));
    }
}
