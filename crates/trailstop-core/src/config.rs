//! Configuration management for the trailstop system.

use crate::types::{LossAnchorRule, RiskConfig};
use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

const MAX_MONITOR_SECS: u64 = 86_400;
const MAX_LOOKBACK_DAYS: i64 = 36_500;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub loss_anchor: LossAnchorRule,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Base URL of the ticker-price API. `None` uses the built-in default.
    pub api_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_secs: 10,
        }
    }
}

/// Settings for the periodic position monitor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between evaluation cycles.
    pub poll_interval_secs: u64,
    /// Upper bound on one cycle; unfinished positions are retried next cycle.
    pub cycle_deadline_secs: u64,
    /// Positions evaluated concurrently.
    pub max_concurrency: usize,
    /// How far back (by creation time) open/closed queries look.
    pub lookback_days: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            cycle_deadline_secs: 30,
            max_concurrency: 16,
            lookback_days: 30,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.poll_interval_secs)
    }

    pub fn cycle_deadline(&self) -> StdDuration {
        StdDuration::from_secs(self.cycle_deadline_secs)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.lookback_days).unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_MONITOR_SECS).contains(&self.poll_interval_secs) {
            return Err(Error::config(format!(
                "monitor poll interval must be between 1 and {} seconds",
                MAX_MONITOR_SECS
            )));
        }
        if !(1..=MAX_MONITOR_SECS).contains(&self.cycle_deadline_secs) {
            return Err(Error::config(format!(
                "monitor cycle deadline must be between 1 and {} seconds",
                MAX_MONITOR_SECS
            )));
        }
        if self.max_concurrency == 0 {
            return Err(Error::config("monitor concurrency must be at least 1"));
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days) {
            return Err(Error::config(format!(
                "position lookback must be between 1 and {} days",
                MAX_LOOKBACK_DAYS
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let risk_defaults = RiskConfig::default();
        let monitor_defaults = MonitorConfig::default();

        let config = Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| Error::Config {
                    message: "DATABASE_URL environment variable not set".to_string(),
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", default_max_connections())?,
            },
            exchange: ExchangeConfig {
                api_url: env::var("EXCHANGE_API_URL").ok(),
                timeout_secs: env_parse("EXCHANGE_TIMEOUT_SECS", ExchangeConfig::default().timeout_secs)?,
            },
            risk: RiskConfig {
                take_profit_pct: env_parse("RISK_TAKE_PROFIT_PCT", risk_defaults.take_profit_pct)?,
                stop_loss_pct: env_parse("RISK_STOP_LOSS_PCT", risk_defaults.stop_loss_pct)?,
                trailing_take_profit_pct: env_parse(
                    "RISK_TRAILING_TAKE_PROFIT_PCT",
                    risk_defaults.trailing_take_profit_pct,
                )?,
                trailing_stop_loss_pct: env_parse(
                    "RISK_TRAILING_STOP_LOSS_PCT",
                    risk_defaults.trailing_stop_loss_pct,
                )?,
            },
            loss_anchor: env_parse("RISK_LOSS_ANCHOR", LossAnchorRule::default())?,
            monitor: MonitorConfig {
                poll_interval_secs: env_parse(
                    "MONITOR_POLL_INTERVAL_SECS",
                    monitor_defaults.poll_interval_secs,
                )?,
                cycle_deadline_secs: env_parse(
                    "MONITOR_CYCLE_DEADLINE_SECS",
                    monitor_defaults.cycle_deadline_secs,
                )?,
                max_concurrency: env_parse(
                    "MONITOR_MAX_CONCURRENCY",
                    monitor_defaults.max_concurrency,
                )?,
                lookback_days: env_parse("POSITION_LOOKBACK_DAYS", monitor_defaults.lookback_days)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file (TOML, YAML or JSON by extension),
    /// with `TRAILSTOP__SECTION__KEY` environment variables layered on top.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config: Self = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("TRAILSTOP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(Error::config("database url must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(Error::config("database max_connections must be at least 1"));
        }
        if self.exchange.timeout_secs == 0 {
            return Err(Error::config("exchange timeout must be at least 1 second"));
        }
        self.risk.validate()?;
        self.monitor.validate()
    }

    /// Load configuration for testing (with defaults).
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/trailstop_test".to_string(),
                max_connections: 2,
            },
            exchange: ExchangeConfig::default(),
            risk: RiskConfig::default(),
            loss_anchor: LossAnchorRule::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}
