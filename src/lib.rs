//! Trailstop: trailing take-profit / stop-loss position monitor
//!
//! This is the root crate that provides benchmark and integration test
//! access to the internal crates:
//!
//! - `trailstop-core`: Positions, P&L, configuration, storage and price feeds
//! - `trading-engine`: Trade execution, extension hooks, position lifecycle
//! - `risk-manager`: Trailing state machine and the periodic position monitor

pub use risk_manager as risk;
pub use trading_engine as trading;
pub use trailstop_core as core;
