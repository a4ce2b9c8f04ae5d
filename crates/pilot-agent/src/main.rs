//! Pilot trading agent entry point.
//!
//! Runs the control loop in paper mode against the in-process mock
//! exchange and a scripted decision source. Live deployments embed
//! [`pilot_agent::Application`] with real clients instead.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rust_decimal::Decimal;
use tracing::info;

use pilot_backtest::MemCandleSource;
use pilot_core::{Price, Symbol, Usd};
use pilot_decision::ScriptedDecisionSource;
use pilot_engine::NoopNotifier;
use pilot_exchange::MockExchange;

/// Pilot autonomous trading agent (paper mode).
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PILOT_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    pilot_telemetry::init_logging()?;

    info!("Starting pilot agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(path) => pilot_agent::AppConfig::from_file(&path)?,
        None => pilot_agent::AppConfig::load()?,
    };
    info!(
        accounts = config.agent.accounts.len(),
        tick_interval_secs = config.agent.tick_interval_secs,
        "Configuration loaded"
    );

    // Paper-mode collaborators. The mock exchange starts every account at
    // $10k with flat placeholder prices; the empty script always holds.
    let exchange = Arc::new(MockExchange::new());
    exchange.set_account_value(Usd::new(Decimal::from(10_000)));
    for (i, symbol) in config.agent.universe.iter().enumerate() {
        let price = Price::new(Decimal::from(1_000 * (i as i64 + 1)));
        exchange.set_price(Symbol::new(symbol), price);
    }

    let app = pilot_agent::Application::new(
        config,
        exchange,
        Arc::new(ScriptedDecisionSource::new()),
        Arc::new(MemCandleSource::new()),
        Arc::new(NoopNotifier),
    );

    app.run().await;

    Ok(())
}
