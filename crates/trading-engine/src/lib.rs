//! Trading Engine
//!
//! Trade execution, extension hooks and the position lifecycle.

pub mod executor;
pub mod hooks;
pub mod position_manager;

pub use executor::{ExecutorConfig, PaperTradeGateway, TradeGateway};
pub use hooks::{ExtensionHook, HookSet};
pub use position_manager::{OpenRequest, PositionGuard, PositionManager};
