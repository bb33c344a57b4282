//! Position Monitor
//!
//! Re-evaluates open positions on a fixed interval and closes them when a
//! trailing take-profit or stop-loss fires. Also exposes one-shot commands for
//! opening, closing and listing positions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use risk_manager::{PositionMonitor, TrailingStateMachine};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_engine::{ExecutorConfig, HookSet, OpenRequest, PaperTradeGateway, PositionManager};
use trailstop_core::api::HttpPriceOracle;
use trailstop_core::config::Config;
use trailstop_core::db::{self, PgPositionStore};
use trailstop_core::report::{format_duration, group_by_symbol};
use trailstop_core::types::{CloseReason, RiskOverrides};
use uuid::Uuid;

const HEALTH_FILE: &str = "/tmp/healthy";

fn touch_health_file() {
    let _ = std::fs::write(HEALTH_FILE, format!("{}", chrono::Utc::now().timestamp()));
}

#[derive(Debug, Parser)]
#[command(name = "position-monitor", version, about)]
struct Cli {
    /// Configuration file. Environment variables are used when omitted.
    #[arg(long, env = "TRAILSTOP_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monitor open positions until interrupted (default).
    Run,
    /// Run a single monitoring cycle and print its report as JSON.
    Once,
    /// Open a position with a paper market buy.
    Open {
        symbol: String,
        quantity: Decimal,
        #[arg(long)]
        take_profit_pct: Option<Decimal>,
        #[arg(long)]
        stop_loss_pct: Option<Decimal>,
        #[arg(long)]
        trailing_take_profit_pct: Option<Decimal>,
        #[arg(long)]
        trailing_stop_loss_pct: Option<Decimal>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        signal_id: Option<String>,
    },
    /// Close a position manually.
    Close { id: Uuid },
    /// List positions within the lookback window, grouped by symbol.
    Positions {
        /// List closed positions instead of open ones.
        #[arg(long)]
        closed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let manager = Arc::new(build_manager(&config).await?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(manager, &config).await,
        Command::Once => {
            let monitor = monitor(manager, &config)?;
            let report = monitor.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Open {
            symbol,
            quantity,
            take_profit_pct,
            stop_loss_pct,
            trailing_take_profit_pct,
            trailing_stop_loss_pct,
            comment,
            signal_id,
        } => {
            let mut request = OpenRequest::new(symbol, quantity).with_overrides(RiskOverrides {
                take_profit_pct,
                stop_loss_pct,
                trailing_take_profit_pct,
                trailing_stop_loss_pct,
            });
            if let Some(comment) = comment {
                request = request.with_comment(comment);
            }
            if let Some(signal_id) = signal_id {
                request = request.with_signal_id(signal_id);
            }

            let id = manager.open_position(request).await?;
            println!("{}", id);
            Ok(())
        }
        Command::Close { id } => {
            let position = manager.close_position(id, CloseReason::Manual).await?;
            println!(
                "closed {} {} pnl={}%",
                position.id(),
                position.symbol(),
                position
                    .closing_pnl()
                    .map(|pnl| pnl.round_dp(2).to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            Ok(())
        }
        Command::Positions { closed } => list_positions(&manager, closed).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "position_monitor=info,risk_manager=info,trading_engine=info,trailstop_core=warn,sqlx=warn,hyper=warn"
            .into()
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn build_manager(config: &Config) -> Result<PositionManager> {
    let pool = db::create_pool(&config.database)
        .await
        .context("failed to connect to database")?;
    db::run_migrations(&pool).await?;

    let oracle = Arc::new(HttpPriceOracle::new(
        config.exchange.api_url.clone(),
        std::time::Duration::from_secs(config.exchange.timeout_secs),
    )?);
    let gateway = Arc::new(PaperTradeGateway::new(oracle.clone(), ExecutorConfig::default()));

    Ok(PositionManager::new(
        Arc::new(PgPositionStore::new(pool)),
        oracle,
        gateway,
        HookSet::default(),
        config.risk,
        config.monitor.lookback(),
    )?)
}

fn monitor(manager: Arc<PositionManager>, config: &Config) -> Result<PositionMonitor> {
    Ok(PositionMonitor::new(
        manager,
        TrailingStateMachine::new(config.loss_anchor),
        config.monitor.clone(),
    )?)
}

async fn run(manager: Arc<PositionManager>, config: &Config) -> Result<()> {
    info!("Starting Position Monitor");
    touch_health_file();

    let monitor = monitor(manager, config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    monitor
        .run(shutdown_rx, |report| {
            touch_health_file();
            for closed in &report.closed {
                info!(
                    position_id = %closed.position_id,
                    symbol = %closed.symbol,
                    reason = %closed.reason,
                    pnl = ?closed.pnl,
                    "Position closed by monitor"
                );
            }
        })
        .await?;

    Ok(())
}

async fn list_positions(manager: &PositionManager, closed: bool) -> Result<()> {
    let positions = if closed {
        manager.closed_positions().await?
    } else {
        manager.open_positions().await?
    };

    for (symbol, positions) in group_by_symbol(positions) {
        println!("{} ({})", symbol, positions.len());
        for position in positions {
            let detail = if position.is_open() {
                match manager.get_pl(&position, false).await {
                    Ok(Some(pnl)) => format!(
                        "pnl={}% mode={:?}",
                        pnl.round_dp(2),
                        position.trailing().mode()
                    ),
                    Ok(None) => "pnl=-".to_string(),
                    Err(e) => format!("pnl=unavailable ({})", e),
                }
            } else {
                format!(
                    "pnl={}% reason={} held={}",
                    position
                        .closing_pnl()
                        .map(|pnl| pnl.round_dp(2).to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    position
                        .close_record()
                        .map(|close| close.reason.to_string())
                        .unwrap_or_default(),
                    position
                        .holding_period()
                        .map(format_duration)
                        .unwrap_or_default(),
                )
            };
            println!(
                "  {} entry={} qty={} {}",
                position.id(),
                position.entry_price(),
                position.entry_quantity(),
                detail
            );
        }
    }

    Ok(())
}
