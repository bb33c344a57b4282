//! Trailing take-profit / stop-loss state machine.
//!
//! A position starts in fixed mode with thresholds relative to entry. Once
//! the profit exceeds `take_profit_pct` or the loss exceeds `stop_loss_pct`
//! it switches to trailing mode for good, and from then on closes when the
//! P&L pulls back more than the trailing distance from its anchor.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trailstop_core::types::{CloseReason, LossAnchorRule, Position, TrailingMode};
use trailstop_core::{Error, Result};

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hold,
    Close(CloseReason),
}

impl Decision {
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Decision::Hold => None,
            Decision::Close(reason) => Some(*reason),
        }
    }
}

/// Which threshold armed trailing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmedSide {
    Profit,
    Loss,
}

/// Result of [`TrailingStateMachine::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub pnl: Decimal,
    pub decision: Decision,
    /// Set when this evaluation switched the position into trailing mode.
    pub armed: Option<ArmedSide>,
}

/// Evaluates positions against a price and advances their trailing state.
///
/// The machine only mutates the position in memory. The caller persists the
/// trailing fields after every evaluation, including [`Decision::Hold`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingStateMachine {
    loss_anchor: LossAnchorRule,
}

impl TrailingStateMachine {
    pub fn new(loss_anchor: LossAnchorRule) -> Self {
        Self { loss_anchor }
    }

    pub fn loss_anchor(&self) -> LossAnchorRule {
        self.loss_anchor
    }

    /// Evaluate `position` at `current_price`.
    pub fn evaluate(&self, position: &mut Position, current_price: Decimal) -> Result<Evaluation> {
        if !position.is_open() {
            return Err(Error::PositionAlreadyClosed(position.id()));
        }

        let pnl = position.pnl_at(current_price)?;
        let risk = *position.risk();
        let mode = position.trailing().mode();
        position.set_current_pnl(pnl);

        let trailing = position.trailing_mut();
        trailing.raise_high_water(pnl);

        // The stop-loss check uses the anchor as it stood before this reading.
        let loss_anchor = trailing.min_floated_pnl();
        if mode == TrailingMode::Trailing && pnl < Decimal::ZERO {
            let moves = match self.loss_anchor {
                LossAnchorRule::TightenTowardZero => pnl > loss_anchor,
                LossAnchorRule::TrackWorst => pnl < loss_anchor,
            };
            if moves {
                trailing.move_loss_anchor(pnl);
            }
        }

        let mut armed = None;
        let decision = match mode {
            TrailingMode::Fixed => {
                if pnl > Decimal::ZERO && pnl > risk.take_profit_pct {
                    trailing.arm();
                    armed = Some(ArmedSide::Profit);
                } else if pnl <= Decimal::ZERO && pnl.abs() > risk.stop_loss_pct {
                    trailing.arm_on_loss(pnl);
                    armed = Some(ArmedSide::Loss);
                }
                Decision::Hold
            }
            TrailingMode::Trailing => {
                if pnl > Decimal::ZERO {
                    if trailing.max_floated_pnl().saturating_sub(pnl) > risk.trailing_take_profit_pct {
                        Decision::Close(CloseReason::TrailingTakeProfit)
                    } else {
                        Decision::Hold
                    }
                } else if loss_anchor.saturating_sub(risk.trailing_stop_loss_pct) > pnl {
                    Decision::Close(CloseReason::TrailingStopLoss)
                } else {
                    Decision::Hold
                }
            }
        };

        debug!(
            position_id = %position.id(),
            symbol = %position.symbol(),
            price = %current_price,
            pnl = %pnl,
            max_floated_pnl = %position.trailing().max_floated_pnl(),
            min_floated_pnl = %position.trailing().min_floated_pnl(),
            armed = ?armed,
            decision = ?decision,
            "Evaluated position"
        );

        Ok(Evaluation {
            pnl,
            decision,
            armed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trailstop_core::types::{Fill, OrderSide, Provenance, RiskConfig};

    fn position_with(risk: RiskConfig) -> Position {
        let fill = Fill {
            order_id: "buy-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            price: Decimal::new(100, 0),
            quantity: Decimal::ONE,
            timestamp: Utc::now(),
        };
        Position::open("BTCUSDT", &fill, risk, Provenance::default()).unwrap()
    }

    fn price(units: i64, scale: u32) -> Decimal {
        Decimal::new(units, scale)
    }

    #[test]
    fn test_small_moves_stay_fixed() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        for p in [price(101, 0), price(99, 0), price(102, 0), price(98, 0)] {
            let eval = machine.evaluate(&mut position, p).unwrap();
            assert_eq!(eval.decision, Decision::Hold);
            assert_eq!(eval.armed, None);
        }

        assert_eq!(position.trailing().mode(), TrailingMode::Fixed);
        assert_eq!(position.trailing().max_floated_pnl(), Decimal::new(2, 0));
        assert_eq!(position.current_pnl(), Some(Decimal::new(-2, 0)));
    }

    #[test]
    fn test_loss_arms_trailing_with_anchor() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        let eval = machine.evaluate(&mut position, price(975, 1)).unwrap();

        assert_eq!(eval.pnl, Decimal::new(-25, 1));
        assert_eq!(eval.decision, Decision::Hold);
        assert_eq!(eval.armed, Some(ArmedSide::Loss));
        assert!(position.trailing().is_trailing());
        assert_eq!(position.trailing().min_floated_pnl(), Decimal::new(-25, 1));
    }

    #[test]
    fn test_recovery_tightens_loss_anchor() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        machine.evaluate(&mut position, price(975, 1)).unwrap();
        let eval = machine.evaluate(&mut position, price(99, 0)).unwrap();

        // Anchor -2.5 minus 0.5 is -3.0, which is not above -1.
        assert_eq!(eval.decision, Decision::Hold);
        assert_eq!(position.trailing().min_floated_pnl(), Decimal::new(-1, 0));
    }

    #[test]
    fn test_trailing_stop_loss_fires_below_anchor() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        machine.evaluate(&mut position, price(975, 1)).unwrap();
        machine.evaluate(&mut position, price(99, 0)).unwrap();

        // -1.4 is within 0.5 of the -1 anchor.
        let eval = machine.evaluate(&mut position, price(986, 1)).unwrap();
        assert_eq!(eval.decision, Decision::Hold);
        assert_eq!(position.trailing().min_floated_pnl(), Decimal::new(-1, 0));

        let eval = machine.evaluate(&mut position, price(984, 1)).unwrap();
        assert_eq!(eval.decision, Decision::Close(CloseReason::TrailingStopLoss));
    }

    #[test]
    fn test_trailing_take_profit_on_drawdown() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        let eval = machine.evaluate(&mut position, price(103, 0)).unwrap();
        assert_eq!(eval.armed, Some(ArmedSide::Profit));
        assert_eq!(eval.decision, Decision::Hold);
        assert_eq!(position.trailing().max_floated_pnl(), Decimal::new(3, 0));

        // Drawdown of exactly 1.0 does not exceed the trailing distance.
        let eval = machine.evaluate(&mut position, price(102, 0)).unwrap();
        assert_eq!(eval.decision, Decision::Hold);

        let eval = machine.evaluate(&mut position, price(1015, 1)).unwrap();
        assert_eq!(eval.decision, Decision::Close(CloseReason::TrailingTakeProfit));
    }

    #[test]
    fn test_shallow_pullback_holds_deep_one_closes() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        machine.evaluate(&mut position, price(103, 0)).unwrap();

        let eval = machine.evaluate(&mut position, price(1025, 1)).unwrap();
        assert_eq!(eval.decision, Decision::Hold);

        let eval = machine.evaluate(&mut position, price(101, 0)).unwrap();
        assert_eq!(eval.pnl, Decimal::ONE);
        assert_eq!(eval.decision.close_reason(), Some(CloseReason::TrailingTakeProfit));
    }

    #[test]
    fn test_take_profit_with_wider_trailing_distance() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig {
            trailing_take_profit_pct: Decimal::new(15, 1),
            ..RiskConfig::default()
        });

        machine.evaluate(&mut position, price(103, 0)).unwrap();

        let eval = machine.evaluate(&mut position, price(1015, 1)).unwrap();
        assert_eq!(eval.decision, Decision::Hold);

        let eval = machine.evaluate(&mut position, price(101, 0)).unwrap();
        assert_eq!(eval.decision, Decision::Close(CloseReason::TrailingTakeProfit));
    }

    #[test]
    fn test_arming_call_never_closes() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        // A crash far past every threshold only arms on the first reading.
        let eval = machine.evaluate(&mut position, price(50, 0)).unwrap();
        assert_eq!(eval.decision, Decision::Hold);
        assert_eq!(eval.armed, Some(ArmedSide::Loss));

        let eval = machine.evaluate(&mut position, price(40, 0)).unwrap();
        assert_eq!(eval.decision, Decision::Close(CloseReason::TrailingStopLoss));
    }

    #[test]
    fn test_high_water_mark_is_monotonic() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig {
            trailing_take_profit_pct: Decimal::new(50, 0),
            trailing_stop_loss_pct: Decimal::new(50, 0),
            ..RiskConfig::default()
        });

        let prices = [101, 97, 104, 102, 110, 96, 105, 90, 111, 100];
        let mut last_max = Decimal::ZERO;
        let mut was_trailing = false;

        for p in prices {
            machine.evaluate(&mut position, price(p, 0)).unwrap();
            let trailing = position.trailing();
            assert!(trailing.max_floated_pnl() >= last_max);
            assert!(!was_trailing || trailing.is_trailing());
            last_max = trailing.max_floated_pnl();
            was_trailing = trailing.is_trailing();
        }

        assert_eq!(last_max, Decimal::new(11, 0));
        assert!(was_trailing);
    }

    #[test]
    fn test_repeated_price_is_idempotent() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        machine.evaluate(&mut position, price(103, 0)).unwrap();
        let before = *position.trailing();

        for _ in 0..3 {
            let eval = machine.evaluate(&mut position, price(103, 0)).unwrap();
            assert_eq!(eval.decision, Decision::Hold);
            assert_eq!(eval.armed, None);
        }
        assert_eq!(position.trailing(), &before);
    }

    #[test]
    fn test_track_worst_follows_deeper_losses() {
        let machine = TrailingStateMachine::new(LossAnchorRule::TrackWorst);
        let mut position = position_with(RiskConfig::default());

        machine.evaluate(&mut position, price(975, 1)).unwrap();

        // Recovery leaves the worst-loss anchor alone.
        machine.evaluate(&mut position, price(99, 0)).unwrap();
        assert_eq!(position.trailing().min_floated_pnl(), Decimal::new(-25, 1));

        // A small slide past the worst loss moves the anchor.
        let eval = machine.evaluate(&mut position, price(973, 1)).unwrap();
        assert_eq!(eval.decision, Decision::Hold);
        assert_eq!(position.trailing().min_floated_pnl(), Decimal::new(-27, 1));

        // A slide of more than 0.5 past it closes.
        let eval = machine.evaluate(&mut position, price(966, 1)).unwrap();
        assert_eq!(eval.decision, Decision::Close(CloseReason::TrailingStopLoss));
    }

    #[test]
    fn test_closed_position_is_rejected() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());
        let sell = Fill {
            order_id: "sell-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Sell,
            price: price(101, 0),
            quantity: Decimal::ONE,
            timestamp: Utc::now(),
        };
        position.mark_closed(&sell, CloseReason::Manual).unwrap();

        let result = machine.evaluate(&mut position, price(120, 0));
        assert!(matches!(result, Err(Error::PositionAlreadyClosed(_))));
    }

    #[test]
    fn test_invalid_price_leaves_state_untouched() {
        let machine = TrailingStateMachine::default();
        let mut position = position_with(RiskConfig::default());

        let result = machine.evaluate(&mut position, Decimal::ZERO);
        assert!(matches!(result, Err(Error::InvalidPrice { .. })));
        assert_eq!(position.current_pnl(), None);
        assert!(!position.trailing().is_trailing());
    }
}
