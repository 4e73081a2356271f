//! Bot configuration
//!
//! Loaded once before the engine starts. `.json` files are read as the
//! web-interface document; anything else is parsed as TOML.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::exchange::Direction;

/// One price level: offset from the base price plus sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelConfig {
    /// Offset from the base price, in percent (negative = below)
    pub percent: Decimal,
    /// Notional to deploy, in settlement currency
    #[serde(alias = "amount_usdt", alias = "amountUsdt")]
    pub amount: Decimal,
    #[serde(rename = "tpPercent", alias = "tp_percent")]
    pub tp_percent: Decimal,
    #[serde(rename = "slPercent", alias = "sl_percent", default = "default_sl_percent")]
    pub sl_percent: Decimal,
}

/// Which family of levels a list belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelGroup {
    Primary,
    Additional,
    Counter,
}

impl LevelGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelGroup::Primary => "primary",
            LevelGroup::Additional => "additional",
            LevelGroup::Counter => "counter",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub testnet: bool,

    pub symbols: Vec<String>,

    #[serde(default)]
    pub long_levels: Vec<LevelConfig>,
    #[serde(default)]
    pub short_levels: Vec<LevelConfig>,
    #[serde(default)]
    pub additional_long_levels: Vec<LevelConfig>,
    #[serde(default)]
    pub additional_short_levels: Vec<LevelConfig>,
    #[serde(default)]
    pub counter_long_levels: Vec<LevelConfig>,
    #[serde(default)]
    pub counter_short_levels: Vec<LevelConfig>,

    /// Minimum spacing between outbound calls, seconds
    #[serde(default = "default_rate_limit_delay")]
    pub api_rate_limit_delay: f64,
    /// Cap on simultaneous in-flight exchange calls
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_symbols: usize,
    #[serde(default = "default_global_tp")]
    pub global_tp_threshold: Decimal,
    #[serde(default)]
    pub use_realized_pnl: bool,

    #[serde(default = "default_settle")]
    pub settle: String,
    /// Seconds between cache refreshes
    #[serde(default = "default_refresh_interval")]
    pub cache_refresh_interval: f64,
    /// Seconds without a successful refresh before reconnecting
    #[serde(default = "default_max_cache_delay")]
    pub max_cache_delay: f64,
    /// Close the level's position once its retrace is confirmed
    #[serde(default)]
    pub close_on_retrace: bool,
}

fn default_sl_percent() -> Decimal {
    dec!(1.0)
}

fn default_rate_limit_delay() -> f64 {
    0.1
}

fn default_max_concurrent() -> usize {
    1000
}

fn default_global_tp() -> Decimal {
    dec!(100)
}

fn default_settle() -> String {
    "usdt".to_string()
}

fn default_refresh_interval() -> f64 {
    1.1
}

fn default_max_cache_delay() -> f64 {
    60.0
}

impl BotConfig {
    /// Load, apply env overrides and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Credentials from `GATE_API_KEY` / `GATE_API_SECRET` win over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("GATE_API_KEY") {
            if !key.is_empty() {
                self.api_key = key;
            }
        }
        if let Ok(secret) = std::env::var("GATE_API_SECRET") {
            if !secret.is_empty() {
                self.api_secret = secret;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::Validation("symbols must not be empty".to_string()));
        }
        if let Some(s) = self.symbols.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::Validation(format!("invalid symbol: {:?}", s)));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.symbols.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(ConfigError::Validation(format!("duplicate symbol: {}", dup)));
        }
        if Duration::try_from_secs_f64(self.api_rate_limit_delay).is_err() {
            return Err(ConfigError::Validation(format!(
                "api_rate_limit_delay must be a non-negative duration in seconds, got {}",
                self.api_rate_limit_delay
            )));
        }
        if self.max_concurrent_symbols == 0 {
            return Err(ConfigError::Validation("max_concurrent_symbols must be greater than 0".to_string()));
        }
        for (name, secs) in [
            ("cache_refresh_interval", self.cache_refresh_interval),
            ("max_cache_delay", self.max_cache_delay),
        ] {
            if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Validation(format!(
                    "{} must be a positive duration in seconds, got {}",
                    name, secs
                )));
            }
        }
        if self.settle.trim().is_empty() {
            return Err(ConfigError::Validation("settle must not be empty".to_string()));
        }
        for (group, direction, levels) in self.level_groups() {
            for level in levels {
                if level.amount <= Decimal::ZERO {
                    return Err(ConfigError::Validation(format!(
                        "{} {} level at {}% has non-positive amount {}",
                        group.as_str(), direction, level.percent, level.amount
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fails when the credentials needed for private endpoints are missing
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ConfigError::Missing("api_key/api_secret".to_string()));
        }
        Ok(())
    }

    /// Every configured level list with its group and direction
    pub fn level_groups(&self) -> [(LevelGroup, Direction, &[LevelConfig]); 6] {
        [
            (LevelGroup::Primary, Direction::Long, self.long_levels.as_slice()),
            (LevelGroup::Primary, Direction::Short, self.short_levels.as_slice()),
            (LevelGroup::Additional, Direction::Long, self.additional_long_levels.as_slice()),
            (LevelGroup::Additional, Direction::Short, self.additional_short_levels.as_slice()),
            (LevelGroup::Counter, Direction::Long, self.counter_long_levels.as_slice()),
            (LevelGroup::Counter, Direction::Short, self.counter_short_levels.as_slice()),
        ]
    }

    pub fn rate_limit_delay(&self) -> Duration {
        secs_to_duration(self.api_rate_limit_delay)
    }

    pub fn refresh_interval(&self) -> Duration {
        secs_to_duration(self.cache_refresh_interval)
    }

    pub fn max_cache_delay(&self) -> Duration {
        secs_to_duration(self.max_cache_delay)
    }
}

/// Saturating conversion; `validate()` rejects the values this clamps
fn secs_to_duration(secs: f64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => d,
        Err(_) if secs > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Missing configuration: {0}")]
    Missing(String),
}
