//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use pilot_backtest::CostModel;
use pilot_breaker::BreakerConfig;
use pilot_core::TradeLimits;

use crate::error::{AgentError, AgentResult};

/// Scheduler and account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Control-loop tick interval in seconds.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Accounts processed each tick, in order.
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Symbols priced into every decision context.
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_universe() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            accounts: Vec::new(),
            universe: default_universe(),
        }
    }
}

/// Per-chunk backtest budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_max_ai_calls")]
    pub max_ai_calls: u32,
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
}

fn default_max_ai_calls() -> u32 {
    25
}

fn default_max_elapsed_secs() -> u64 {
    30
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            max_ai_calls: default_max_ai_calls(),
            max_elapsed_secs: default_max_elapsed_secs(),
        }
    }
}

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub limits: TradeLimits,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub cost: CostModel,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl AppConfig {
    /// Load configuration from file.
    pub fn load() -> AgentResult<Self> {
        let config_path =
            std::env::var("PILOT_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AgentResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AgentError::Config(format!("Failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::Usd;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.agent.tick_interval_secs, 60);
        assert_eq!(config.limits.max_open_positions, 3);
        assert_eq!(config.breaker.ai_failure_threshold, 3);
        assert_eq!(config.backtest.max_ai_calls, 25);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
            [agent]
            tick_interval_secs = 30
            accounts = ["acct1", "acct2"]

            [limits]
            max_open_positions = 5

            [breaker]
            cooldown_minutes = 120
        "#;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.agent.tick_interval_secs, 30);
        assert_eq!(config.agent.accounts.len(), 2);
        assert_eq!(config.limits.max_open_positions, 5);
        // Unspecified fields fall back to their defaults.
        assert_eq!(config.limits.min_position_floor, Usd::new(dec!(200)));
        assert_eq!(config.breaker.cooldown_minutes, 120);
        assert_eq!(config.breaker.loss_threshold, 5);
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"agent = not toml").unwrap();

        assert!(AppConfig::from_file(file.path().to_str().unwrap()).is_err());
    }
}
