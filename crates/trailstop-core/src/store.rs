//! Position persistence interface and an in-memory implementation.

use crate::types::Position;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage backend for positions.
///
/// Writes are plain data writes; no P&L is recomputed as a side effect.
#[async_trait::async_trait]
pub trait PositionStore: Send + Sync {
    /// Store a newly opened position.
    async fn insert(&self, position: &Position) -> Result<()>;

    /// Write the mutable fields (trailing state, cached P&L, close record).
    ///
    /// Fails with [`Error::PositionNotFound`] for unknown ids and with
    /// [`Error::PositionAlreadyClosed`] when the stored row is already closed.
    async fn update(&self, position: &Position) -> Result<()>;

    /// Get a position by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Position>>;

    /// Open positions created within `since`, newest first.
    async fn open_positions(&self, since: Duration) -> Result<Vec<Position>>;

    /// Closed positions created within `since`, newest first.
    async fn closed_positions(&self, since: Duration) -> Result<Vec<Position>>;
}

/// Creation-time cutoff for a lookback window ending now.
pub(crate) fn lookback_cutoff(since: Duration) -> Result<DateTime<Utc>> {
    Utc::now()
        .checked_sub_signed(since)
        .ok_or_else(|| Error::config(format!("lookback window {} is out of range", since)))
}

/// In-memory position storage for paper trading and tests.
#[derive(Default)]
pub struct MemoryPositionStore {
    positions: RwLock<HashMap<Uuid, Position>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.positions.read().await.is_empty()
    }

    async fn query(&self, since: Duration, open: bool) -> Result<Vec<Position>> {
        let cutoff = lookback_cutoff(since)?;
        let positions = self.positions.read().await;

        let mut matching: Vec<Position> = positions
            .values()
            .filter(|p| p.created_at() > cutoff && p.is_open() == open)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(matching)
    }
}

#[async_trait::async_trait]
impl PositionStore for MemoryPositionStore {
    async fn insert(&self, position: &Position) -> Result<()> {
        let mut positions = self.positions.write().await;
        if positions.contains_key(&position.id()) {
            return Err(Error::Persistence {
                message: format!("position {} already exists", position.id()),
            });
        }
        positions.insert(position.id(), position.clone());
        Ok(())
    }

    async fn update(&self, position: &Position) -> Result<()> {
        let mut positions = self.positions.write().await;
        let stored = positions
            .get_mut(&position.id())
            .ok_or(Error::PositionNotFound(position.id()))?;

        if !stored.is_open() {
            return Err(Error::PositionAlreadyClosed(position.id()));
        }

        *stored = position.clone();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        Ok(self.positions.read().await.get(&id).cloned())
    }

    async fn open_positions(&self, since: Duration) -> Result<Vec<Position>> {
        self.query(since, true).await
    }

    async fn closed_positions(&self, since: Duration) -> Result<Vec<Position>> {
        self.query(since, false).await
    }
}
