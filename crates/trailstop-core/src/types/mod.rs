//! Domain types.

pub mod order;
pub mod position;
pub mod risk;

pub use order::{Fill, OrderSide};
pub use position::{
    CloseReason, Position, PositionClose, Provenance, TrailingMode, TrailingState,
};
pub use risk::{LossAnchorRule, RiskConfig, RiskOverrides};
