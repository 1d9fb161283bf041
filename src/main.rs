//! Spectator
//!
//! Prints a live depth ladder, mid price and recent trades for one product.
//! The replica is restarted with backoff whenever it closes.
//!
//! Usage:
//!   spectator --symbol BTC-USD --depth 15
//!
//! Environment:
//!   SPECTATOR_SYMBOL - Product to follow (default: ETH-USD)
//!   SPECTATOR_WS_URL - Feed URL override
//!   SPECTATOR_REST_URL - Snapshot base URL override
//!   RUST_LOG - Log filter (default: spectator=info), logs go to stderr

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spectator::{Backoff, Replica, ReplicaConfig, ReplicaSignal, Side, TradeHistory};

#[derive(Parser, Debug)]
#[command(name = "spectator")]
#[command(about = "Live level-3 order book replica")]
struct Args {
    /// Product to follow
    #[arg(long, env = "SPECTATOR_SYMBOL", default_value = "ETH-USD")]
    symbol: String,

    /// Levels shown per side
    #[arg(long, default_value = "10")]
    depth: usize,

    /// Recent trades shown
    #[arg(long, default_value = "10")]
    trades: usize,

    /// Redraw interval in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Feed URL
    #[arg(long, env = "SPECTATOR_WS_URL")]
    ws_url: Option<String>,

    /// Snapshot base URL
    #[arg(long, env = "SPECTATOR_REST_URL")]
    rest_url: Option<String>,

    /// Print ingestion counters as JSON with every redraw
    #[arg(long)]
    metrics: bool,
}

impl Args {
    fn config(&self) -> ReplicaConfig {
        let mut cfg = ReplicaConfig::from_env().with_symbol(self.symbol.clone());
        if let Some(url) = &self.ws_url {
            cfg.ws_url = url.clone();
        }
        if let Some(url) = &self.rest_url {
            cfg.rest_url = url.clone();
        }
        cfg
    }
}

enum SessionEnd {
    Quit,
    Restart,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = args.config();

    info!(symbol = %config.symbol, ws = %config.ws_url, rest = %config.rest_url, "Starting spectator");

    let (quit_tx, mut quit_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = quit_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Ctrl-C handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    });

    let mut backoff = Backoff::from_config(&config);
    let mut history = TradeHistory::default();

    loop {
        match Replica::start_with_config(config.clone()).await {
            Ok(replica) => {
                backoff.reset();
                let end = run_session(&replica, &args, &mut history, &mut quit_rx).await;
                replica.shutdown().await;
                match end? {
                    SessionEnd::Quit => break,
                    SessionEnd::Restart => {}
                }
            }
            Err(e) => error!(kind = e.kind(), error = %e, "Replica failed to start"),
        }

        let delay = backoff.next_delay();
        warn!(
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Restarting replica"
        );
        tokio::select! {
            _ = sleep(delay) => {}
            _ = quit_rx.changed() => break,
        }
    }

    info!("Spectator stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spectator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn run_session(
    replica: &Replica,
    args: &Args,
    history: &mut TradeHistory,
    quit: &mut watch::Receiver<bool>,
) -> Result<SessionEnd> {
    let mut events = replica.events();
    let mut signals = replica
        .errors()
        .context("signal receiver already taken")?;

    let mut redraw = interval(Duration::from_millis(args.interval_ms.max(50)));
    redraw.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = quit.changed() => return Ok(SessionEnd::Quit),

            _ = redraw.tick() => {
                render(replica, history, args).context("Failed to write to stdout")?;
            }

            event = events.recv() => match event {
                Ok(delta) => {
                    history.record(&delta);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Trade history fell behind the feed");
                }
                Err(RecvError::Closed) => return Ok(SessionEnd::Restart),
            },

            signal = signals.recv() => match signal {
                Some(ReplicaSignal::Resynced { expected, received, snapshot_sequence }) => {
                    info!(expected, received, snapshot_sequence, "Book resynced");
                }
                Some(ReplicaSignal::Fatal(e)) => {
                    error!(kind = e.kind(), error = %e, "Replica closed");
                    return Ok(SessionEnd::Restart);
                }
                None => {
                    info!("Replica ingestion ended");
                    return Ok(SessionEnd::Restart);
                }
            },
        }
    }
}

fn render(replica: &Replica, history: &TradeHistory, args: &Args) -> io::Result<()> {
    let asks = replica.entries(Side::Sell, args.depth);
    let bids = replica.entries(Side::Buy, args.depth);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    writeln!(
        out,
        "{}  seq {}  state {:?}",
        replica.symbol(),
        replica.last_applied(),
        replica.state()
    )?;
    writeln!(out, "{:>16} {:>16} {:>7}", "price", "size", "orders")?;

    // highest ask on top so the best prices meet in the middle
    for level in asks.iter().rev() {
        writeln!(
            out,
            "{:>16} {:>16} {:>7}  ask",
            level.price, level.size, level.order_count
        )?;
    }

    match (replica.mid_price(), replica.spread()) {
        (Some(mid), Some(spread)) => writeln!(out, "{:>16} mid  spread {}", mid, spread)?,
        _ => writeln!(out, "{:>16}", "-")?,
    }

    for level in &bids {
        writeln!(
            out,
            "{:>16} {:>16} {:>7}  bid",
            level.price, level.size, level.order_count
        )?;
    }

    if args.trades > 0 && !history.is_empty() {
        writeln!(out, "recent trades")?;
        for trade in history.recent(args.trades) {
            let time = trade
                .time
                .map(|t| t.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_default();
            writeln!(
                out,
                "{:>12} {:>16} {:>16}  {}",
                time, trade.price, trade.size, trade.side
            )?;
        }
    }

    if args.metrics {
        let summary = serde_json::to_string(&replica.metrics()).unwrap_or_default();
        writeln!(out, "{}", summary)?;
    }

    writeln!(out)?;
    out.flush()
}
