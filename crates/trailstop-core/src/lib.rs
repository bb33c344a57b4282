//! trailstop core library
//!
//! Shared types, P&L arithmetic, configuration, position stores and price
//! feeds for the trailstop position monitor.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod pnl;
pub mod report;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use store::{MemoryPositionStore, PositionStore};
