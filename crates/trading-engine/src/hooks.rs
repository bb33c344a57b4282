//! Extension hooks run around trade execution.
//!
//! Before-hooks may veto a trade by returning `false`. After-hooks are
//! notifications; their errors are logged and never undo the trade.

use crate::position_manager::OpenRequest;
use std::sync::Arc;
use tracing::{debug, warn};
use trailstop_core::types::{CloseReason, Position};
use trailstop_core::{Error, Result};

/// An extension participating in the buy/sell lifecycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ExtensionHook: Send + Sync {
    /// Name used in logs and rejection errors.
    fn name(&self) -> String;

    async fn before_buy(&self, _request: &OpenRequest) -> bool {
        true
    }

    async fn after_buy(&self, _position: &Position) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_sell(&self, _position: &Position, _reason: CloseReason) -> bool {
        true
    }

    async fn after_sell(&self, _position: &Position) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The extensions registered with a position manager, in run order.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn ExtensionHook>>,
}

impl HookSet {
    pub fn new(hooks: Vec<Arc<dyn ExtensionHook>>) -> Self {
        Self { hooks }
    }

    pub fn with(mut self, hook: Arc<dyn ExtensionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every `before_buy` hook. All hooks run even after a veto so that
    /// the error names every rejecting extension.
    pub async fn before_buy(&self, request: &OpenRequest) -> Result<()> {
        let mut rejected = Vec::new();
        for hook in &self.hooks {
            if !hook.before_buy(request).await {
                rejected.push(hook.name());
            }
        }
        Self::verdict("before_buy", rejected)
    }

    pub async fn after_buy(&self, position: &Position) {
        for hook in &self.hooks {
            if let Err(e) = hook.after_buy(position).await {
                warn!(
                    hook = %hook.name(),
                    position_id = %position.id(),
                    symbol = %position.symbol(),
                    error = %e,
                    "after_buy hook failed"
                );
            }
        }
    }

    pub async fn before_sell(&self, position: &Position, reason: CloseReason) -> Result<()> {
        let mut rejected = Vec::new();
        for hook in &self.hooks {
            if !hook.before_sell(position, reason).await {
                rejected.push(hook.name());
            }
        }
        Self::verdict("before_sell", rejected)
    }

    pub async fn after_sell(&self, position: &Position) {
        for hook in &self.hooks {
            if let Err(e) = hook.after_sell(position).await {
                warn!(
                    hook = %hook.name(),
                    position_id = %position.id(),
                    symbol = %position.symbol(),
                    error = %e,
                    "after_sell hook failed"
                );
            }
        }
    }

    fn verdict(stage: &str, rejected: Vec<String>) -> Result<()> {
        if rejected.is_empty() {
            return Ok(());
        }
        debug!(stage = stage, hooks = ?rejected, "Trade vetoed by hooks");
        Err(Error::HookRejected {
            stage: stage.to_string(),
            hooks: rejected,
        })
    }
}
