//! Application wiring.
//!
//! Builds the live control loop and the backtest runner from one
//! [`AppConfig`] plus the injected external collaborators: the exchange
//! client, the decision source, the candle source and the notifier. The
//! in-memory store backend is the reference implementation; a durable
//! deployment implements the `pilot-store` traits against its database
//! and swaps it in here.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use pilot_backtest::{BacktestRunner, CandleSource, ChunkBudget, MemRunStore};
use pilot_core::{AccountId, Symbol};
use pilot_decision::DecisionSource;
use pilot_engine::{ControlLoop, Notifier, RecentTradeCache};
use pilot_exchange::ExchangeClient;
use pilot_locks::{LockManager, SystemClock};
use pilot_store::MemStore;

use crate::config::AppConfig;

pub struct Application {
    accounts: Vec<AccountId>,
    tick_interval: Duration,
    control: Arc<ControlLoop>,
    backtests: Arc<BacktestRunner>,
}

impl Application {
    pub fn new(
        config: AppConfig,
        exchange: Arc<dyn ExchangeClient>,
        decision_source: Arc<dyn DecisionSource>,
        candles: Arc<dyn CandleSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = Arc::new(MemStore::new());
        let clock = Arc::new(SystemClock);
        let locks = Arc::new(LockManager::new(store.clone(), clock.clone()));
        let universe: Vec<Symbol> = config.agent.universe.iter().map(Symbol::new).collect();

        let control = Arc::new(ControlLoop::new(
            locks,
            exchange,
            decision_source.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(RecentTradeCache::new()),
            notifier,
            clock,
            config.breaker.clone(),
            config.limits.clone(),
            universe,
        ));

        let backtests = Arc::new(BacktestRunner::new(
            Arc::new(MemRunStore::new()),
            candles,
            decision_source,
            config.cost.clone(),
            ChunkBudget {
                max_ai_calls: config.backtest.max_ai_calls,
                max_elapsed: Duration::from_secs(config.backtest.max_elapsed_secs),
            },
        ));

        Self {
            accounts: config.agent.accounts.iter().map(|a| AccountId::from(a.as_str())).collect(),
            tick_interval: Duration::from_secs(config.agent.tick_interval_secs),
            control,
            backtests,
        }
    }

    #[must_use]
    pub fn control_loop(&self) -> Arc<ControlLoop> {
        self.control.clone()
    }

    #[must_use]
    pub fn backtests(&self) -> Arc<BacktestRunner> {
        self.backtests.clone()
    }

    /// One control-loop tick over the configured accounts.
    pub async fn tick_once(&self) {
        self.control.run_tick(&self.accounts).await;
    }

    /// Run the control loop on its fixed interval until the task is
    /// dropped or aborted by the caller.
    pub async fn run(&self) {
        info!(
            accounts = self.accounts.len(),
            interval_secs = self.tick_interval.as_secs(),
            "Control loop scheduler started"
        );
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick_once().await;
        }
    }
}
