//! Periodic re-evaluation of open positions.

use crate::trailing::{Decision, TrailingStateMachine};
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use trading_engine::PositionManager;
use trailstop_core::config::MonitorConfig;
use trailstop_core::types::CloseReason;
use trailstop_core::{Error, Result};
use uuid::Uuid;

/// A position closed during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPosition {
    pub position_id: Uuid,
    pub symbol: String,
    pub reason: CloseReason,
    /// Realized P&L between entry and close.
    pub pnl: Option<Decimal>,
}

/// A position whose evaluation failed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionFailure {
    pub position_id: Uuid,
    pub symbol: String,
    pub error: String,
    /// Whether the next cycle is expected to succeed.
    pub retryable: bool,
}

/// Summary of one monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Positions evaluated (including those closed).
    pub evaluated: usize,
    /// Positions closed by another task between listing and locking.
    pub skipped: usize,
    pub closed: Vec<ClosedPosition>,
    pub failures: Vec<PositionFailure>,
}

impl CycleReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn log(&self) {
        for failure in &self.failures {
            warn!(
                position_id = %failure.position_id,
                symbol = %failure.symbol,
                error = %failure.error,
                retryable = failure.retryable,
                "Position evaluation failed"
            );
        }

        info!(
            evaluated = self.evaluated,
            skipped = self.skipped,
            closed = self.closed.len(),
            failed = self.failures.len(),
            "Monitor cycle complete"
        );
    }
}

enum Outcome {
    Held,
    Skipped,
    Closed(ClosedPosition),
}

/// Drives the trailing state machine over every open position.
pub struct PositionMonitor {
    manager: Arc<PositionManager>,
    machine: TrailingStateMachine,
    config: MonitorConfig,
}

impl PositionMonitor {
    pub fn new(
        manager: Arc<PositionManager>,
        machine: TrailingStateMachine,
        config: MonitorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            manager,
            machine,
            config,
        })
    }

    pub fn manager(&self) -> &Arc<PositionManager> {
        &self.manager
    }

    /// Run cycles every poll interval until `shutdown` flips to `true` or its
    /// sender is dropped. `on_cycle` sees every completed report.
    pub async fn run<F>(&self, mut shutdown: watch::Receiver<bool>, mut on_cycle: F) -> Result<()>
    where
        F: FnMut(&CycleReport),
    {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            cycle_deadline_secs = self.config.cycle_deadline_secs,
            max_concurrency = self.config.max_concurrency,
            loss_anchor = %self.machine.loss_anchor(),
            "Position monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => on_cycle(&report),
                        Err(e) => error!(error = %e, "Failed to list open positions"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Position monitor stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Evaluate every open position once.
    ///
    /// Fails only when the open positions cannot be listed. Per-position
    /// failures are collected in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let positions = self.manager.open_positions().await?;
        let deadline = Instant::now()
            .checked_add(self.config.cycle_deadline())
            .ok_or_else(|| Error::config("cycle deadline out of range"))?;

        debug!(count = positions.len(), "Starting monitor cycle");

        let results: Vec<_> = stream::iter(positions)
            .map(|position| {
                let id = position.id();
                let symbol = position.symbol().to_string();
                async move {
                    let result = match tokio::time::timeout_at(deadline, self.process(id)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout {
                            operation: format!("evaluation of position {}", id),
                        }),
                    };
                    (id, symbol, result)
                }
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        let mut report = CycleReport::default();
        for (position_id, symbol, result) in results {
            match result {
                Ok(Outcome::Held) => report.evaluated += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Ok(Outcome::Closed(closed)) => {
                    report.evaluated += 1;
                    report.closed.push(closed);
                }
                Err(e) => report.failures.push(PositionFailure {
                    position_id,
                    symbol,
                    retryable: e.is_retryable(),
                    error: e.to_string(),
                }),
            }
        }

        report.log();
        Ok(report)
    }

    /// Lock, reload, quote, evaluate, persist and close one position.
    async fn process(&self, id: Uuid) -> Result<Outcome> {
        let guard = self.manager.lock_position(id).await;

        let mut position = self.manager.get_position(id).await?;
        if !position.is_open() {
            return Ok(Outcome::Skipped);
        }

        let price = self.manager.current_price(&position).await?;
        let evaluation = self.machine.evaluate(&mut position, price)?;

        position.touch();
        self.manager.store().update(&position).await?;

        if let Some(side) = evaluation.armed {
            info!(
                position_id = %id,
                symbol = %position.symbol(),
                pnl = %evaluation.pnl,
                side = ?side,
                "Trailing mode armed"
            );
        }

        let reason = match evaluation.decision {
            Decision::Hold => return Ok(Outcome::Held),
            Decision::Close(reason) => reason,
        };

        info!(
            position_id = %id,
            symbol = %position.symbol(),
            pnl = %evaluation.pnl,
            max_floated_pnl = %position.trailing().max_floated_pnl(),
            min_floated_pnl = %position.trailing().min_floated_pnl(),
            reason = %reason,
            "Close triggered"
        );

        // The close runs on its own task so that a cycle deadline cannot
        // cancel it between the sell and the write of the close record.
        let manager = self.manager.clone();
        let closed = tokio::spawn(async move { manager.close_locked(&guard, reason).await })
            .await
            .map_err(|e| Error::Execution {
                message: format!("close task failed: {}", e),
            })??;

        Ok(Outcome::Closed(ClosedPosition {
            position_id: id,
            symbol: closed.symbol().to_string(),
            reason,
            pnl: closed.closing_pnl(),
        }))
    }
}
