//! Trade execution: the gateway interface and a paper-trading implementation.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use trailstop_core::api::PriceOracle;
use trailstop_core::types::{Fill, OrderSide};
use trailstop_core::{Error, Result};
use uuid::Uuid;

/// Executes market orders. Fills are complete; partial fills are not modelled.
#[async_trait::async_trait]
pub trait TradeGateway: Send + Sync {
    async fn execute_buy(&self, symbol: &str, quantity: Decimal) -> Result<Fill>;

    async fn execute_sell(&self, symbol: &str, quantity: Decimal) -> Result<Fill>;
}

/// Snapshot of execution counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionMetrics {
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_rejected: u64,
    pub avg_latency_us: u64,
}

#[derive(Debug, Default)]
struct MetricCounters {
    submitted: AtomicU64,
    filled: AtomicU64,
    rejected: AtomicU64,
    total_latency_us: AtomicU64,
}

/// Configuration for the order executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum order quantity.
    pub max_order_size: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_order_size: Decimal::new(1_000_000, 0),
        }
    }
}

/// Paper-trading gateway: every market order fills in full at the current
/// oracle price.
pub struct PaperTradeGateway {
    oracle: Arc<dyn PriceOracle>,
    config: ExecutorConfig,
    metrics: MetricCounters,
}

impl PaperTradeGateway {
    pub fn new(oracle: Arc<dyn PriceOracle>, config: ExecutorConfig) -> Self {
        Self {
            oracle,
            config,
            metrics: MetricCounters::default(),
        }
    }

    /// Get current execution metrics.
    pub fn metrics(&self) -> ExecutionMetrics {
        let submitted = self.metrics.submitted.load(Ordering::Relaxed);
        let filled = self.metrics.filled.load(Ordering::Relaxed);
        let total_latency = self.metrics.total_latency_us.load(Ordering::Relaxed);
        ExecutionMetrics {
            orders_submitted: submitted,
            orders_filled: filled,
            orders_rejected: self.metrics.rejected.load(Ordering::Relaxed),
            avg_latency_us: if filled == 0 { 0 } else { total_latency / filled },
        }
    }

    fn validate(&self, quantity: Decimal) -> Result<()> {
        if quantity <= Decimal::ZERO {
            return Err(Error::InvalidQuantity { quantity });
        }
        if quantity > self.config.max_order_size {
            return Err(Error::Execution {
                message: format!(
                    "Order size {} exceeds maximum {}",
                    quantity, self.config.max_order_size
                ),
            });
        }
        Ok(())
    }

    async fn execute(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<Fill> {
        let start = std::time::Instant::now();
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);

        let result = match self.validate(quantity) {
            Ok(()) => self.oracle.current_price(symbol).await,
            Err(e) => Err(e),
        };

        let price = match result {
            Ok(price) => price,
            Err(e) => {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let fill = Fill {
            order_id: format!("paper-{}", Uuid::new_v4().simple()),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            timestamp: Utc::now(),
        };

        self.metrics.filled.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .total_latency_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);

        info!(
            order_id = %fill.order_id,
            symbol = %symbol,
            side = ?side,
            price = %price,
            quantity = %quantity,
            "[PAPER] Simulated market order fill"
        );
        debug!(latency_us = %start.elapsed().as_micros(), "Order execution complete");

        Ok(fill)
    }
}

#[async_trait::async_trait]
impl TradeGateway for PaperTradeGateway {
    async fn execute_buy(&self, symbol: &str, quantity: Decimal) -> Result<Fill> {
        self.execute(symbol, OrderSide::Buy, quantity).await
    }

    async fn execute_sell(&self, symbol: &str, quantity: Decimal) -> Result<Fill> {
        self.execute(symbol, OrderSide::Sell, quantity).await
    }
}
