//! Per-position risk configuration.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Risk thresholds fixed on a position at creation time.
///
/// All values are percentages of the entry price (`2` means 2%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Profit that arms the trailing take-profit.
    pub take_profit_pct: Decimal,
    /// Loss that arms the trailing stop-loss.
    pub stop_loss_pct: Decimal,
    /// Allowed drawdown from the profit high-water mark once trailing.
    pub trailing_take_profit_pct: Decimal,
    /// Allowed drop below the loss anchor once trailing.
    pub trailing_stop_loss_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: Decimal::new(2, 0),
            stop_loss_pct: Decimal::new(2, 0),
            trailing_take_profit_pct: Decimal::ONE,
            trailing_stop_loss_pct: Decimal::new(5, 1),
        }
    }
}

impl RiskConfig {
    /// Reject negative thresholds.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("take_profit_pct", self.take_profit_pct),
            ("stop_loss_pct", self.stop_loss_pct),
            ("trailing_take_profit_pct", self.trailing_take_profit_pct),
            ("trailing_stop_loss_pct", self.trailing_stop_loss_pct),
        ];

        for (name, value) in fields {
            if value < Decimal::ZERO {
                return Err(Error::config(format!(
                    "{} must not be negative (got {})",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Apply per-order overrides on top of these defaults.
    pub fn with_overrides(&self, overrides: &RiskOverrides) -> Result<Self> {
        let merged = Self {
            take_profit_pct: overrides.take_profit_pct.unwrap_or(self.take_profit_pct),
            stop_loss_pct: overrides.stop_loss_pct.unwrap_or(self.stop_loss_pct),
            trailing_take_profit_pct: overrides
                .trailing_take_profit_pct
                .unwrap_or(self.trailing_take_profit_pct),
            trailing_stop_loss_pct: overrides
                .trailing_stop_loss_pct
                .unwrap_or(self.trailing_stop_loss_pct),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Optional per-order replacements for the configured risk defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskOverrides {
    pub take_profit_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub trailing_take_profit_pct: Option<Decimal>,
    pub trailing_stop_loss_pct: Option<Decimal>,
}

impl RiskOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// How the loss anchor (`min_floated_pnl`) moves while trailing in loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossAnchorRule {
    /// Move the anchor to any less-negative reading. The stop then trails the
    /// best recovery seen since arming.
    #[default]
    TightenTowardZero,
    /// Move the anchor to any more-negative reading. The stop then trails the
    /// worst loss seen since arming.
    TrackWorst,
}

impl LossAnchorRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossAnchorRule::TightenTowardZero => "tighten_toward_zero",
            LossAnchorRule::TrackWorst => "track_worst",
        }
    }
}

impl fmt::Display for LossAnchorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossAnchorRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tighten_toward_zero" | "tighten" => Ok(LossAnchorRule::TightenTowardZero),
            "track_worst" | "worst" => Ok(LossAnchorRule::TrackWorst),
            other => Err(Error::config(format!("unknown loss anchor rule: {}", other))),
        }
    }
}
