//! Position lifecycle: opening, closing and P&L queries.

use crate::executor::TradeGateway;
use crate::hooks::HookSet;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info};
use trailstop_core::api::PriceOracle;
use trailstop_core::store::PositionStore;
use trailstop_core::types::{CloseReason, Position, Provenance, RiskConfig, RiskOverrides};
use trailstop_core::{Error, Result};
use uuid::Uuid;

/// Request to open a new position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub symbol: String,
    pub quantity: Decimal,
    /// Replacements for the configured risk defaults.
    pub overrides: RiskOverrides,
    pub comment: Option<String>,
    pub signal_id: Option<String>,
}

impl OpenRequest {
    pub fn new(symbol: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            overrides: RiskOverrides::default(),
            comment: None,
            signal_id: None,
        }
    }

    pub fn with_overrides(mut self, overrides: RiskOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_signal_id(mut self, signal_id: impl Into<String>) -> Self {
        self.signal_id = Some(signal_id.into());
        self
    }
}

/// Exclusive access to one position. Held across read-modify-write cycles.
pub struct PositionGuard {
    position_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl PositionGuard {
    pub fn position_id(&self) -> Uuid {
        self.position_id
    }
}

/// Opens and closes positions, running extension hooks around each trade.
pub struct PositionManager {
    store: Arc<dyn PositionStore>,
    oracle: Arc<dyn PriceOracle>,
    gateway: Arc<dyn TradeGateway>,
    hooks: HookSet,
    risk_defaults: RiskConfig,
    lookback: chrono::Duration,
    /// Per-position mutexes keyed by position ID.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl PositionManager {
    /// Create a new position manager.
    pub fn new(
        store: Arc<dyn PositionStore>,
        oracle: Arc<dyn PriceOracle>,
        gateway: Arc<dyn TradeGateway>,
        hooks: HookSet,
        risk_defaults: RiskConfig,
        lookback: chrono::Duration,
    ) -> Result<Self> {
        risk_defaults.validate()?;
        Ok(Self {
            store,
            oracle,
            gateway,
            hooks,
            risk_defaults,
            lookback,
            locks: DashMap::new(),
        })
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    /// Acquire the mutex for one position.
    pub async fn lock_position(&self, id: Uuid) -> PositionGuard {
        // Clone the Arc out so the map shard is not held across the await.
        let mutex = self.locks.entry(id).or_default().clone();
        PositionGuard {
            position_id: id,
            _guard: mutex.lock_owned().await,
        }
    }

    /// Open a position with a market buy. Returns the new position ID.
    pub async fn open_position(&self, request: OpenRequest) -> Result<Uuid> {
        if request.quantity <= Decimal::ZERO {
            return Err(Error::InvalidQuantity {
                quantity: request.quantity,
            });
        }
        let risk = self.risk_defaults.with_overrides(&request.overrides)?;

        self.hooks.before_buy(&request).await?;

        let fill = self
            .gateway
            .execute_buy(&request.symbol, request.quantity)
            .await?;

        let position = Position::open(
            request.symbol.clone(),
            &fill,
            risk,
            Provenance {
                comment: request.comment.clone(),
                signal_id: request.signal_id.clone(),
            },
        )?;

        if let Err(e) = self.store.insert(&position).await {
            error!(
                position_id = %position.id(),
                symbol = %position.symbol(),
                order_id = %fill.order_id,
                error = %e,
                "Buy filled but position could not be stored"
            );
            return Err(e);
        }

        info!(
            position_id = %position.id(),
            symbol = %position.symbol(),
            entry_price = %position.entry_price(),
            quantity = %position.entry_quantity(),
            take_profit_pct = %risk.take_profit_pct,
            stop_loss_pct = %risk.stop_loss_pct,
            "Position opened"
        );

        self.hooks.after_buy(&position).await;
        Ok(position.id())
    }

    /// Close a position with a market sell.
    ///
    /// A second call for the same position fails with
    /// [`Error::PositionAlreadyClosed`] without selling again.
    pub async fn close_position(&self, id: Uuid, reason: CloseReason) -> Result<Position> {
        let guard = self.lock_position(id).await;
        self.close_locked(&guard, reason).await
    }

    /// Close a position while already holding its lock.
    pub async fn close_locked(&self, guard: &PositionGuard, reason: CloseReason) -> Result<Position> {
        let id = guard.position_id();
        let Some(mut position) = self.store.get(id).await? else {
            self.locks.remove(&id);
            return Err(Error::PositionNotFound(id));
        };

        if !position.is_open() {
            return Err(Error::PositionAlreadyClosed(id));
        }

        self.hooks.before_sell(&position, reason).await?;

        let fill = self
            .gateway
            .execute_sell(position.symbol(), position.entry_quantity())
            .await?;
        position.mark_closed(&fill, reason)?;

        if let Err(e) = self.store.update(&position).await {
            error!(
                position_id = %id,
                symbol = %position.symbol(),
                order_id = %fill.order_id,
                error = %e,
                "Sell filled but close could not be stored"
            );
            return Err(e);
        }

        info!(
            position_id = %id,
            symbol = %position.symbol(),
            reason = %reason,
            close_price = %fill.price,
            pnl = ?position.closing_pnl(),
            "Position closed"
        );

        // Later lockers reload the closed row, so the mutex is no longer needed.
        self.locks.remove(&id);

        self.hooks.after_sell(&position).await;
        Ok(position)
    }

    /// Get a position by ID.
    pub async fn get_position(&self, id: Uuid) -> Result<Position> {
        self.store.get(id).await?.ok_or(Error::PositionNotFound(id))
    }

    /// Percentage P&L of a position.
    ///
    /// Open positions are priced at the current quote. Closed positions have
    /// no current P&L and return `None`, unless `use_close_snapshot` asks for
    /// the P&L between entry and close.
    pub async fn get_pl(&self, position: &Position, use_close_snapshot: bool) -> Result<Option<Decimal>> {
        if !position.is_open() {
            return Ok(if use_close_snapshot {
                position.closing_pnl()
            } else {
                None
            });
        }

        let price = self.current_price(position).await?;
        position.pnl_at(price).map(Some)
    }

    /// Whether an open position is currently profitable.
    pub async fn in_profit(&self, position: &Position) -> Result<bool> {
        Ok(self
            .get_pl(position, false)
            .await?
            .is_some_and(|pnl| pnl > Decimal::ZERO))
    }

    pub async fn current_price(&self, position: &Position) -> Result<Decimal> {
        self.oracle.current_price(position.symbol()).await
    }

    /// Open positions within the lookback window, newest first.
    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        self.store.open_positions(self.lookback).await
    }

    /// Closed positions within the lookback window, newest first.
    pub async fn closed_positions(&self) -> Result<Vec<Position>> {
        self.store.closed_positions(self.lookback).await
    }
}
