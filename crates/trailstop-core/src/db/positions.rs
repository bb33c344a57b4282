//! Database operations for positions.

use crate::store::{lookback_cutoff, PositionStore};
use crate::types::{
    CloseReason, Position, PositionClose, Provenance, RiskConfig, TrailingState,
};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    id, symbol, entry_price, entry_quantity, entry_timestamp, entry_order_id,
    take_profit_pct, stop_loss_pct, trailing_take_profit_pct, trailing_stop_loss_pct,
    is_trailing, max_floated_pnl, min_floated_pnl, current_pnl,
    close_price, close_timestamp, close_reason, close_order_id,
    comment, signal_id, created_at, updated_at
"#;

/// Repository for position data.
pub struct PgPositionStore {
    pool: PgPool,
}

impl PgPositionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn query_since(&self, since: Duration, open: bool) -> Result<Vec<Position>> {
        let cutoff = lookback_cutoff(since)?;
        let sql = format!(
            "SELECT {} FROM positions WHERE created_at > $1 AND (close_price IS NULL) = $2 ORDER BY created_at DESC",
            SELECT_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(open)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_position).collect()
    }

    /// Convert a database row to a Position.
    fn row_to_position(r: &sqlx::postgres::PgRow) -> Result<Position> {
        let close_price: Option<Decimal> = r.try_get("close_price")?;
        let close_timestamp: Option<DateTime<Utc>> = r.try_get("close_timestamp")?;
        let close_reason: Option<String> = r.try_get("close_reason")?;
        let close_order_id: Option<String> = r.try_get("close_order_id")?;

        let close = match (close_price, close_timestamp, close_reason) {
            (Some(price), Some(timestamp), Some(reason)) => Some(PositionClose {
                price,
                timestamp,
                reason: reason.parse::<CloseReason>()?,
                order_id: close_order_id.unwrap_or_default(),
            }),
            (None, None, None) => None,
            _ => {
                let id: Uuid = r.try_get("id")?;
                return Err(Error::Persistence {
                    message: format!("position {} has a partial close record", id),
                });
            }
        };

        Ok(Position {
            id: r.try_get("id")?,
            symbol: r.try_get("symbol")?,
            entry_price: r.try_get("entry_price")?,
            entry_quantity: r.try_get("entry_quantity")?,
            entry_timestamp: r.try_get("entry_timestamp")?,
            entry_order_id: r.try_get("entry_order_id")?,
            risk: RiskConfig {
                take_profit_pct: r.try_get("take_profit_pct")?,
                stop_loss_pct: r.try_get("stop_loss_pct")?,
                trailing_take_profit_pct: r.try_get("trailing_take_profit_pct")?,
                trailing_stop_loss_pct: r.try_get("trailing_stop_loss_pct")?,
            },
            trailing: TrailingState {
                is_trailing: r.try_get("is_trailing")?,
                max_floated_pnl: r.try_get("max_floated_pnl")?,
                min_floated_pnl: r.try_get("min_floated_pnl")?,
            },
            close,
            provenance: Provenance {
                comment: r.try_get("comment")?,
                signal_id: r.try_get("signal_id")?,
            },
            current_pnl: r.try_get("current_pnl")?,
            created_at: r.try_get("created_at")?,
            updated_at: r.try_get("updated_at")?,
        })
    }

    /// Decompose the optional close record into nullable columns.
    fn close_columns(
        position: &Position,
    ) -> (
        Option<Decimal>,
        Option<DateTime<Utc>>,
        Option<&'static str>,
        Option<String>,
    ) {
        match position.close_record() {
            Some(close) => (
                Some(close.price),
                Some(close.timestamp),
                Some(close.reason.as_str()),
                Some(close.order_id.clone()),
            ),
            None => (None, None, None, None),
        }
    }
}

#[async_trait::async_trait]
impl PositionStore for PgPositionStore {
    async fn insert(&self, position: &Position) -> Result<()> {
        let (close_price, close_timestamp, close_reason, close_order_id) =
            Self::close_columns(position);
        let risk = position.risk();
        let trailing = position.trailing();

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, symbol, entry_price, entry_quantity, entry_timestamp, entry_order_id,
                take_profit_pct, stop_loss_pct, trailing_take_profit_pct, trailing_stop_loss_pct,
                is_trailing, max_floated_pnl, min_floated_pnl, current_pnl,
                close_price, close_timestamp, close_reason, close_order_id,
                comment, signal_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(position.id())
        .bind(position.symbol())
        .bind(position.entry_price())
        .bind(position.entry_quantity())
        .bind(position.entry_timestamp())
        .bind(position.entry_order_id())
        .bind(risk.take_profit_pct)
        .bind(risk.stop_loss_pct)
        .bind(risk.trailing_take_profit_pct)
        .bind(risk.trailing_stop_loss_pct)
        .bind(trailing.is_trailing())
        .bind(trailing.max_floated_pnl())
        .bind(trailing.min_floated_pnl())
        .bind(position.current_pnl())
        .bind(close_price)
        .bind(close_timestamp)
        .bind(close_reason)
        .bind(close_order_id)
        .bind(position.comment())
        .bind(position.signal_id())
        .bind(position.created_at())
        .bind(position.updated_at())
        .execute(&self.pool)
        .await?;

        debug!(position_id = %position.id(), symbol = %position.symbol(), "Inserted position");
        Ok(())
    }

    async fn update(&self, position: &Position) -> Result<()> {
        let (close_price, close_timestamp, close_reason, close_order_id) =
            Self::close_columns(position);
        let trailing = position.trailing();

        // The database enforces the monotonic fields as well: trailing mode is
        // never cleared and the high-water mark never lowered.
        let result = sqlx::query(
            r#"
            UPDATE positions SET
                is_trailing = is_trailing OR $2,
                max_floated_pnl = GREATEST(max_floated_pnl, $3),
                min_floated_pnl = $4,
                current_pnl = $5,
                close_price = $6,
                close_timestamp = $7,
                close_reason = $8,
                close_order_id = $9,
                updated_at = $10
            WHERE id = $1 AND close_price IS NULL
            "#,
        )
        .bind(position.id())
        .bind(trailing.is_trailing())
        .bind(trailing.max_floated_pnl())
        .bind(trailing.min_floated_pnl())
        .bind(position.current_pnl())
        .bind(close_price)
        .bind(close_timestamp)
        .bind(close_reason)
        .bind(close_order_id)
        .bind(position.updated_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let closed: Option<bool> =
                sqlx::query_scalar("SELECT close_price IS NOT NULL FROM positions WHERE id = $1")
                    .bind(position.id())
                    .fetch_optional(&self.pool)
                    .await?;

            return Err(match closed {
                Some(true) => Error::PositionAlreadyClosed(position.id()),
                Some(false) => Error::Persistence {
                    message: format!("update of position {} matched no rows", position.id()),
                },
                None => Error::PositionNotFound(position.id()),
            });
        }

        debug!(position_id = %position.id(), "Updated position");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        let sql = format!("SELECT {} FROM positions WHERE id = $1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_position).transpose()
    }

    async fn open_positions(&self, since: Duration) -> Result<Vec<Position>> {
        self.query_since(since, true).await
    }

    async fn closed_positions(&self, since: Duration) -> Result<Vec<Position>> {
        self.query_since(since, false).await
    }
}
