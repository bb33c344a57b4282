//! Risk Manager
//!
//! Trailing take-profit / stop-loss evaluation and the periodic position monitor.

pub mod monitor;
pub mod trailing;

pub use monitor::{ClosedPosition, CycleReport, PositionFailure, PositionMonitor};
pub use trailing::{ArmedSide, Decision, Evaluation, TrailingStateMachine};
