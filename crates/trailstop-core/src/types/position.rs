//! Position entity: one buy fill paired with an optional closing sell.

use super::order::Fill;
use super::risk::RiskConfig;
use crate::pnl::{ensure_positive, percent_pnl};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Risk mode of a position. `Trailing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingMode {
    /// Thresholds are fixed relative to entry.
    Fixed,
    /// Thresholds trail the watermarks.
    Trailing,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    /// Trailing take-profit: drawdown from the profit peak exceeded the limit.
    #[serde(rename = "TTP")]
    TrailingTakeProfit,
    /// Trailing stop-loss: loss extended past the anchor by more than the limit.
    #[serde(rename = "TSL")]
    TrailingStopLoss,
    /// Operator-requested close.
    #[serde(rename = "MANUAL")]
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TrailingTakeProfit => "TTP",
            CloseReason::TrailingStopLoss => "TSL",
            CloseReason::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloseReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TTP" => Ok(CloseReason::TrailingTakeProfit),
            "TSL" => Ok(CloseReason::TrailingStopLoss),
            "MANUAL" => Ok(CloseReason::Manual),
            other => Err(Error::Persistence {
                message: format!("unknown close reason: {}", other),
            }),
        }
    }
}

/// Trailing watermarks of an open position.
///
/// Only monotonic mutations are exposed: the high-water mark never decreases
/// and trailing mode, once armed, is never disarmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingState {
    pub(crate) is_trailing: bool,
    pub(crate) max_floated_pnl: Decimal,
    pub(crate) min_floated_pnl: Decimal,
}

impl TrailingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_trailing(&self) -> bool {
        self.is_trailing
    }

    pub fn mode(&self) -> TrailingMode {
        if self.is_trailing {
            TrailingMode::Trailing
        } else {
            TrailingMode::Fixed
        }
    }

    /// Highest P&L observed while open.
    pub fn max_floated_pnl(&self) -> Decimal {
        self.max_floated_pnl
    }

    /// Loss anchor for the trailing stop-loss.
    pub fn min_floated_pnl(&self) -> Decimal {
        self.min_floated_pnl
    }

    /// Raise the high-water mark if `pnl` exceeds it. Returns whether it moved.
    pub fn raise_high_water(&mut self, pnl: Decimal) -> bool {
        if pnl > self.max_floated_pnl {
            self.max_floated_pnl = pnl;
            true
        } else {
            false
        }
    }

    /// Arm trailing mode on the profit side.
    pub fn arm(&mut self) -> bool {
        let changed = !self.is_trailing;
        self.is_trailing = true;
        changed
    }

    /// Arm trailing mode on the loss side, anchoring the stop at `pnl`.
    pub fn arm_on_loss(&mut self, pnl: Decimal) -> bool {
        let changed = self.arm();
        if changed {
            self.min_floated_pnl = pnl;
        }
        changed
    }

    /// Move the loss anchor. Ignored unless trailing.
    pub fn move_loss_anchor(&mut self, pnl: Decimal) -> bool {
        if !self.is_trailing || pnl == self.min_floated_pnl {
            return false;
        }
        self.min_floated_pnl = pnl;
        true
    }
}

/// Close record, written exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClose {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reason: CloseReason,
    /// Exchange order id of the closing sell.
    pub order_id: String,
}

/// Optional provenance metadata attached at open time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub comment: Option<String>,
    pub signal_id: Option<String>,
}

/// A trading position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub(crate) id: Uuid,
    pub(crate) symbol: String,
    pub(crate) entry_price: Decimal,
    pub(crate) entry_quantity: Decimal,
    pub(crate) entry_timestamp: DateTime<Utc>,
    pub(crate) entry_order_id: String,
    pub(crate) risk: RiskConfig,
    pub(crate) trailing: TrailingState,
    pub(crate) close: Option<PositionClose>,
    pub(crate) provenance: Provenance,
    /// Last P&L computed by an evaluation. Cache only.
    pub(crate) current_pnl: Option<Decimal>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Position {
    /// Create an open position from a buy fill.
    pub fn open(
        symbol: impl Into<String>,
        fill: &Fill,
        risk: RiskConfig,
        provenance: Provenance,
    ) -> Result<Self> {
        ensure_positive(fill.price)?;
        if fill.quantity <= Decimal::ZERO {
            return Err(Error::InvalidQuantity {
                quantity: fill.quantity,
            });
        }
        risk.validate()?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            entry_price: fill.price,
            entry_quantity: fill.quantity,
            entry_timestamp: fill.timestamp,
            entry_order_id: fill.order_id.clone(),
            risk,
            trailing: TrailingState::new(),
            close: None,
            provenance,
            current_pnl: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn entry_price(&self) -> Decimal {
        self.entry_price
    }

    pub fn entry_quantity(&self) -> Decimal {
        self.entry_quantity
    }

    pub fn entry_timestamp(&self) -> DateTime<Utc> {
        self.entry_timestamp
    }

    pub fn entry_order_id(&self) -> &str {
        &self.entry_order_id
    }

    pub fn risk(&self) -> &RiskConfig {
        &self.risk
    }

    pub fn trailing(&self) -> &TrailingState {
        &self.trailing
    }

    pub fn trailing_mut(&mut self) -> &mut TrailingState {
        &mut self.trailing
    }

    pub fn close_record(&self) -> Option<&PositionClose> {
        self.close.as_ref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.provenance.comment.as_deref()
    }

    pub fn signal_id(&self) -> Option<&str> {
        self.provenance.signal_id.as_deref()
    }

    pub fn current_pnl(&self) -> Option<Decimal> {
        self.current_pnl
    }

    pub fn set_current_pnl(&mut self, pnl: Decimal) {
        self.current_pnl = Some(pnl);
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_open(&self) -> bool {
        self.close.is_none()
    }

    /// Percentage P&L against an arbitrary reference price.
    pub fn pnl_at(&self, price: Decimal) -> Result<Decimal> {
        percent_pnl(self.entry_price, price)
    }

    /// Realized percentage P&L between entry and close. `None` while open.
    pub fn closing_pnl(&self) -> Option<Decimal> {
        self.close
            .as_ref()
            .and_then(|close| percent_pnl(self.entry_price, close.price).ok())
    }

    /// Time between entry and close. `None` while open.
    pub fn holding_period(&self) -> Option<Duration> {
        self.close
            .as_ref()
            .map(|close| close.timestamp - self.entry_timestamp)
    }

    /// Record the closing sell. Fails if the position is already closed.
    pub fn mark_closed(&mut self, fill: &Fill, reason: CloseReason) -> Result<()> {
        if self.close.is_some() {
            return Err(Error::PositionAlreadyClosed(self.id));
        }
        ensure_positive(fill.price)?;

        self.close = Some(PositionClose {
            price: fill.price,
            timestamp: fill.timestamp,
            reason,
            order_id: fill.order_id.clone(),
        });
        self.touch();
        Ok(())
    }
}
