//! Integration tests for component interactions.
//!
//! These tests drive the position manager and monitor together against the
//! in-memory store and a fixed price feed.

use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use trailstop::core::api::FixedPriceOracle;
use trailstop::core::config::MonitorConfig;
use trailstop::core::report::group_by_symbol;
use trailstop::core::types::{CloseReason, LossAnchorRule, Position, RiskConfig, RiskOverrides};
use trailstop::core::{Error, MemoryPositionStore};
use trailstop::risk::{PositionMonitor, TrailingStateMachine};
use trailstop::trading::{
    ExecutorConfig, ExtensionHook, HookSet, OpenRequest, PaperTradeGateway, PositionManager,
};

/// Counts hook calls and vetoes buys for one symbol.
#[derive(Default)]
struct RecordingHook {
    blocked_symbol: Option<String>,
    buys: AtomicUsize,
    sells: AtomicUsize,
}

#[async_trait::async_trait]
impl ExtensionHook for RecordingHook {
    fn name(&self) -> String {
        "recorder".to_string()
    }

    async fn before_buy(&self, request: &OpenRequest) -> bool {
        self.blocked_symbol.as_deref() != Some(request.symbol.as_str())
    }

    async fn after_buy(&self, _position: &Position) -> anyhow::Result<()> {
        self.buys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn after_sell(&self, _position: &Position) -> anyhow::Result<()> {
        self.sells.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("downstream notifier offline")
    }
}

struct System {
    oracle: Arc<FixedPriceOracle>,
    gateway: Arc<PaperTradeGateway>,
    manager: Arc<PositionManager>,
    monitor: PositionMonitor,
}

fn system(hooks: HookSet, loss_anchor: LossAnchorRule) -> System {
    let oracle = Arc::new(
        FixedPriceOracle::new()
            .with_price("BTCUSDT", Decimal::new(100, 0))
            .with_price("ETHUSDT", Decimal::new(100, 0)),
    );
    let gateway = Arc::new(PaperTradeGateway::new(oracle.clone(), ExecutorConfig::default()));
    let manager = Arc::new(
        PositionManager::new(
            Arc::new(MemoryPositionStore::new()),
            oracle.clone(),
            gateway.clone(),
            hooks,
            RiskConfig::default(),
            chrono::Duration::days(30),
        )
        .unwrap(),
    );
    let monitor = PositionMonitor::new(
        manager.clone(),
        TrailingStateMachine::new(loss_anchor),
        MonitorConfig::default(),
    )
    .unwrap();

    System {
        oracle,
        gateway,
        manager,
        monitor,
    }
}

async fn open(system: &System, symbol: &str) -> Uuid {
    system
        .manager
        .open_position(OpenRequest::new(symbol, Decimal::ONE))
        .await
        .unwrap()
}

async fn stored(system: &System, id: Uuid) -> Position {
    system.manager.get_position(id).await.unwrap()
}

/// Loss arms trailing, recovery tightens the anchor, a slide past it closes.
#[tokio::test]
async fn test_loss_side_lifecycle() {
    let s = system(HookSet::default(), LossAnchorRule::TightenTowardZero);
    let id = open(&s, "BTCUSDT").await;

    s.oracle.set_price("BTCUSDT", Decimal::new(975, 1));
    s.monitor.run_cycle().await.unwrap();
    let position = stored(&s, id).await;
    assert!(position.trailing().is_trailing());
    assert_eq!(position.trailing().min_floated_pnl(), Decimal::new(-25, 1));

    s.oracle.set_price("BTCUSDT", Decimal::new(99, 0));
    let report = s.monitor.run_cycle().await.unwrap();
    assert!(report.closed.is_empty());
    assert_eq!(stored(&s, id).await.trailing().min_floated_pnl(), Decimal::new(-1, 0));

    s.oracle.set_price("BTCUSDT", Decimal::new(98, 0));
    let report = s.monitor.run_cycle().await.unwrap();
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].reason, CloseReason::TrailingStopLoss);

    let position = stored(&s, id).await;
    assert!(!position.is_open());
    assert_eq!(position.closing_pnl(), Some(Decimal::new(-2, 0)));
    assert!(position.holding_period().is_some());
}

/// The worst-loss anchor keeps the stop further away on recovery.
#[tokio::test]
async fn test_track_worst_anchor_holds_on_recovery_slide() {
    let s = system(HookSet::default(), LossAnchorRule::TrackWorst);
    let id = open(&s, "BTCUSDT").await;

    for cents in [9750, 9900, 9800] {
        s.oracle.set_price("BTCUSDT", Decimal::new(cents, 2));
        let report = s.monitor.run_cycle().await.unwrap();
        assert!(report.closed.is_empty());
    }

    let position = stored(&s, id).await;
    assert!(position.is_open());
    assert_eq!(position.trailing().min_floated_pnl(), Decimal::new(-25, 1));
}

/// Profit arms trailing and a drawdown beyond the trailing distance closes.
#[tokio::test]
async fn test_profit_side_lifecycle_with_override() {
    let s = system(HookSet::default(), LossAnchorRule::default());
    let request = OpenRequest::new("ETHUSDT", Decimal::new(3, 0)).with_overrides(RiskOverrides {
        trailing_take_profit_pct: Some(Decimal::new(15, 1)),
        ..Default::default()
    });
    let id = s.manager.open_position(request).await.unwrap();

    s.oracle.set_price("ETHUSDT", Decimal::new(103, 0));
    s.monitor.run_cycle().await.unwrap();
    assert_eq!(stored(&s, id).await.trailing().max_floated_pnl(), Decimal::new(3, 0));

    s.oracle.set_price("ETHUSDT", Decimal::new(1015, 1));
    assert!(s.monitor.run_cycle().await.unwrap().closed.is_empty());

    s.oracle.set_price("ETHUSDT", Decimal::new(101, 0));
    let report = s.monitor.run_cycle().await.unwrap();
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].reason, CloseReason::TrailingTakeProfit);
    assert_eq!(report.closed[0].pnl, Some(Decimal::ONE));

    let position = stored(&s, id).await;
    assert_eq!(s.manager.get_pl(&position, false).await.unwrap(), None);
    assert_eq!(
        s.manager.get_pl(&position, true).await.unwrap(),
        Some(Decimal::ONE)
    );
}

#[tokio::test]
async fn test_hooks_veto_and_after_hook_failures() {
    let hook = Arc::new(RecordingHook {
        blocked_symbol: Some("ETHUSDT".to_string()),
        ..Default::default()
    });
    let s = system(HookSet::default().with(hook.clone()), LossAnchorRule::default());

    let vetoed = s
        .manager
        .open_position(OpenRequest::new("ETHUSDT", Decimal::ONE))
        .await;
    match vetoed {
        Err(Error::HookRejected { stage, hooks }) => {
            assert_eq!(stage, "before_buy");
            assert_eq!(hooks, vec!["recorder".to_string()]);
        }
        other => panic!("expected HookRejected, got {:?}", other),
    }
    assert!(s.manager.open_positions().await.unwrap().is_empty());

    let id = open(&s, "BTCUSDT").await;
    assert_eq!(hook.buys.load(Ordering::SeqCst), 1);

    // A failing after_sell hook does not undo the close.
    let closed = s.manager.close_position(id, CloseReason::Manual).await.unwrap();
    assert!(!closed.is_open());
    assert_eq!(hook.sells.load(Ordering::SeqCst), 1);
    assert!(!stored(&s, id).await.is_open());
}

/// Manual closes racing the monitor sell exactly once.
#[tokio::test]
async fn test_manual_close_racing_monitor() {
    let s = system(HookSet::default(), LossAnchorRule::default());
    let id = open(&s, "BTCUSDT").await;

    s.oracle.set_price("BTCUSDT", Decimal::new(103, 0));
    s.monitor.run_cycle().await.unwrap();
    s.oracle.set_price("BTCUSDT", Decimal::new(101, 0));

    let manual = {
        let manager = s.manager.clone();
        tokio::spawn(async move { manager.close_position(id, CloseReason::Manual).await })
    };
    let report = s.monitor.run_cycle().await.unwrap();
    let manual = manual.await.unwrap();

    let closes = report.closed.len() + usize::from(manual.is_ok());
    assert_eq!(closes, 1);
    if let Err(e) = manual {
        assert!(matches!(e, Error::PositionAlreadyClosed(_)));
    }
    assert!(!report.has_failures());
    assert_eq!(s.gateway.metrics().orders_filled, 2);
}

#[tokio::test]
async fn test_reporting_groups_by_symbol() {
    let s = system(HookSet::default(), LossAnchorRule::default());
    let btc_old = open(&s, "BTCUSDT").await;
    let eth = open(&s, "ETHUSDT").await;
    let btc_new = open(&s, "BTCUSDT").await;

    s.manager.close_position(eth, CloseReason::Manual).await.unwrap();

    let open_groups = group_by_symbol(s.manager.open_positions().await.unwrap());
    assert_eq!(open_groups.len(), 1);
    let btc: Vec<Uuid> = open_groups["BTCUSDT"].iter().map(|p| p.id()).collect();
    assert_eq!(btc.len(), 2);
    assert!(btc.contains(&btc_old) && btc.contains(&btc_new));

    let closed_groups = group_by_symbol(s.manager.closed_positions().await.unwrap());
    assert_eq!(closed_groups["ETHUSDT"][0].id(), eth);

    s.oracle.set_price("BTCUSDT", Decimal::new(101, 0));
    let position = stored(&s, btc_old).await;
    assert!(s.manager.in_profit(&position).await.unwrap());
    assert_eq!(s.manager.current_price(&position).await.unwrap(), Decimal::new(101, 0));
}
