//! The per-tick control loop.
//!
//! One tick processes every eligible account sequentially; a failure in
//! one account is logged and must not affect the others. Per account the
//! order is fixed: breaker gate, trading lock, reconcile, decision,
//! dispatch, breaker bookkeeping, lock release.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use pilot_breaker::{
    allow_trading, record_ai_failure, record_ai_success, record_trade_outcome, BreakerConfig,
};
use pilot_core::{AccountId, CircuitBreakerState, Side, Symbol, TradeLimits, Usd};
use pilot_decision::{Decision, DecisionContext, DecisionSource, OpenIntent};
use pilot_exchange::ExchangeClient;
use pilot_locks::{Clock, LockManager, TradingLease};
use pilot_store::{BreakerStore, PositionStore, TradeStore};

use crate::cooldown::RecentTradeCache;
use crate::error::EngineResult;
use crate::execute::{Notifier, OpenOutcome, OpenRequest, TradeExecutor};
use crate::reconcile::Reconciler;
use crate::sanitize::sanitize_protections;
use crate::validate::OpenValidator;

/// Everything one control loop needs, wired once at startup.
pub struct ControlLoop {
    locks: Arc<LockManager>,
    exchange: Arc<dyn ExchangeClient>,
    decision_source: Arc<dyn DecisionSource>,
    breaker_store: Arc<dyn BreakerStore>,
    positions: Arc<dyn PositionStore>,
    reconciler: Reconciler,
    validator: OpenValidator,
    executor: TradeExecutor,
    clock: Arc<dyn Clock>,
    breaker_config: BreakerConfig,
    /// Symbols priced into every decision context.
    universe: Vec<Symbol>,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        locks: Arc<LockManager>,
        exchange: Arc<dyn ExchangeClient>,
        decision_source: Arc<dyn DecisionSource>,
        positions: Arc<dyn PositionStore>,
        trades: Arc<dyn TradeStore>,
        breaker_store: Arc<dyn BreakerStore>,
        recent: Arc<RecentTradeCache>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        breaker_config: BreakerConfig,
        limits: TradeLimits,
        universe: Vec<Symbol>,
    ) -> Self {
        let reconciler = Reconciler::new(positions.clone(), trades.clone());
        let validator = OpenValidator::new(
            locks.clone(),
            exchange.clone(),
            positions.clone(),
            trades.clone(),
            recent.clone(),
            limits,
        );
        let executor = TradeExecutor::new(
            exchange.clone(),
            positions.clone(),
            trades,
            recent,
            notifier,
        );
        Self {
            locks,
            exchange,
            decision_source,
            breaker_store,
            positions,
            reconciler,
            validator,
            executor,
            clock,
            breaker_config,
            universe,
        }
    }

    /// One scheduled tick over all accounts.
    pub async fn run_tick(&self, accounts: &[AccountId]) {
        if let Err(err) = self.locks.sweep_expired().await {
            warn!(%err, "Lease sweep failed");
        }

        for account in accounts {
            if let Err(err) = self.run_account(account).await {
                // Account isolation: log and move to the next one.
                error!(account = %account, %err, "Account iteration failed");
            }
        }
    }

    async fn run_account(&self, account: &AccountId) -> EngineResult<()> {
        let now = self.clock.now();

        // Breaker gate. `allow_trading` may transition tripped->cooldown on
        // the boundary, so the state is persisted either way.
        let mut breaker = self
            .breaker_store
            .breaker_state(account.clone())
            .await?
            .unwrap_or_default();
        let allowed = allow_trading(&mut breaker, &self.breaker_config, now);
        self.breaker_store
            .put_breaker_state(account.clone(), breaker.clone())
            .await?;
        if !allowed {
            info!(account = %account, "Circuit breaker open, skipping account");
            return Ok(());
        }

        let lease = match self.locks.acquire_trading_lock(account).await? {
            Ok(lease) => lease,
            Err(rejection) => {
                debug!(account = %account, ?rejection, "Another iteration in flight");
                return Ok(());
            }
        };

        let result = self.run_locked(account, &mut breaker, now).await;
        self.breaker_store
            .put_breaker_state(account.clone(), breaker)
            .await?;
        self.release_trading(&lease).await;
        result
    }

    async fn run_locked(
        &self,
        account: &AccountId,
        breaker: &mut CircuitBreakerState,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let equity = self.exchange.account_value(account.clone()).await?;

        // Reconcile against exchange truth, but only when the read itself
        // succeeded. An API outage must not look like "no positions".
        let open_positions = match self.exchange.positions(account.clone()).await {
            Ok(remote) => self.reconciler.reconcile(account, &remote, now).await?,
            Err(err) => {
                warn!(account = %account, %err, "Position read failed, skipping reconcile");
                self.positions.positions(account.clone()).await?
            }
        };

        let context = DecisionContext {
            account_id: account.clone(),
            equity,
            prices: self.collect_prices(&open_positions).await,
            open_positions,
        };

        let decision = match self.decision_source.request_decision(context).await {
            Ok(decision) => {
                record_ai_success(breaker);
                decision
            }
            Err(err) => {
                warn!(account = %account, %err, "Decision source failed");
                record_ai_failure(breaker, &self.breaker_config, now);
                return Ok(());
            }
        };
        debug!(account = %account, decision = decision.label(), "Decision received");

        match decision {
            Decision::Hold => Ok(()),
            Decision::Close { symbol } => {
                if let Some(outcome) = self
                    .executor
                    .close(account, &symbol, "ai_decision", now)
                    .await?
                {
                    record_trade_outcome(breaker, outcome.won, &self.breaker_config, now);
                }
                Ok(())
            }
            Decision::OpenLong(intent) => {
                self.open(account, breaker, intent, Side::Long, equity, now)
                    .await
            }
            Decision::OpenShort(intent) => {
                self.open(account, breaker, intent, Side::Short, equity, now)
                    .await
            }
        }
    }

    async fn open(
        &self,
        account: &AccountId,
        breaker: &mut CircuitBreakerState,
        intent: OpenIntent,
        side: Side,
        equity: Usd,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let validated = match self
            .validator
            .validate_open(account, &intent.symbol, side, intent.size_usd, equity, now)
            .await?
        {
            Ok(validated) => validated,
            // Rejections are logged by the validator; nothing to do here.
            Err(_) => return Ok(()),
        };

        let result = self.open_validated(account, breaker, intent, side, now).await;
        if let Err(err) = self.locks.release_symbol_lock(&validated.lease).await {
            warn!(account = %account, %err, "Symbol lease release failed");
        }
        result
    }

    async fn open_validated(
        &self,
        account: &AccountId,
        breaker: &mut CircuitBreakerState,
        intent: OpenIntent,
        side: Side,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let entry = self.exchange.market_price(intent.symbol.clone()).await?;
        let levels = sanitize_protections(entry, side, intent.stop_loss, intent.take_profit);

        let outcome = self
            .executor
            .open(
                account,
                OpenRequest {
                    symbol: intent.symbol,
                    side,
                    size_usd: intent.size_usd,
                    leverage: intent.leverage,
                    levels,
                    reasoning: intent.reasoning,
                },
                now,
            )
            .await?;

        if let OpenOutcome::EmergencyClosed { pnl } = outcome {
            record_trade_outcome(
                breaker,
                !pnl.inner().is_sign_negative(),
                &self.breaker_config,
                now,
            );
        }
        Ok(())
    }

    /// Mark prices for the universe plus any held symbols. Missing prices
    /// are dropped rather than failing the tick.
    async fn collect_prices(
        &self,
        open_positions: &[pilot_core::Position],
    ) -> HashMap<Symbol, pilot_core::Price> {
        let mut symbols: Vec<Symbol> = self.universe.clone();
        for position in open_positions {
            if !symbols.contains(&position.symbol) {
                symbols.push(position.symbol.clone());
            }
        }

        let mut prices = HashMap::new();
        for symbol in symbols {
            match self.exchange.market_price(symbol.clone()).await {
                Ok(price) => {
                    prices.insert(symbol, price);
                }
                Err(err) => debug!(%symbol, %err, "Price unavailable"),
            }
        }
        prices
    }

    async fn release_trading(&self, lease: &TradingLease) {
        if let Err(err) = self.locks.release_trading_lock(lease).await {
            warn!(%err, "Trading lease release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::NoopNotifier;
    use chrono::Duration;
    use pilot_core::{BreakerPhase, Price};
    use pilot_decision::{DecisionError, ScriptedDecisionSource};
    use pilot_exchange::MockExchange;
    use pilot_locks::ManualClock;
    use pilot_store::{LockStore, MemStore};
    use rust_decimal_macros::dec;

    fn acct() -> AccountId {
        AccountId::from("acct1")
    }

    fn btc() -> Symbol {
        Symbol::new("BTC")
    }

    struct Fixture {
        store: Arc<MemStore>,
        exchange: Arc<MockExchange>,
        source: Arc<ScriptedDecisionSource>,
        clock: Arc<ManualClock>,
        control: ControlLoop,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemStore::new());
        let exchange = Arc::new(MockExchange::new());
        let source = Arc::new(ScriptedDecisionSource::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = Arc::new(LockManager::new(store.clone(), clock.clone()));
        let control = ControlLoop::new(
            locks,
            exchange.clone(),
            source.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(RecentTradeCache::new()),
            Arc::new(NoopNotifier),
            clock.clone(),
            BreakerConfig::default(),
            TradeLimits::default(),
            vec![btc()],
        );
        Fixture {
            store,
            exchange,
            source,
            clock,
            control,
        }
    }

    fn open_long_intent() -> OpenIntent {
        OpenIntent {
            symbol: btc(),
            size_usd: Usd::new(dec!(1000)),
            leverage: 10,
            stop_loss: Some(Price::new(dec!(58200))),
            take_profit: Some(Price::new(dec!(60480))),
            confidence: 0.9,
            reasoning: "breakout".into(),
        }
    }

    async fn breaker_of(fx: &Fixture) -> CircuitBreakerState {
        fx.store
            .breaker_state(acct())
            .await
            .unwrap()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_tick_opens_position_and_releases_locks() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        fx.source.push(Ok(Decision::OpenLong(open_long_intent())));

        fx.control.run_tick(&[acct()]).await;

        let position = fx.store.position(acct(), btc()).await.unwrap().unwrap();
        assert_eq!(position.side, Side::Long);
        assert_eq!(position.stop_loss, Some(Price::new(dec!(58200))));
        assert_eq!(fx.store.all_trades().len(), 1);

        // Both lease kinds released after the tick.
        assert_eq!(fx.store.symbol_lock_count(), 0);
        assert!(fx.store.trading_lock(acct()).await.unwrap().is_none());

        let breaker = breaker_of(&fx).await;
        assert_eq!(breaker.phase, BreakerPhase::Active);
        assert_eq!(breaker.consecutive_ai_failures, 0);
    }

    #[tokio::test]
    async fn test_hold_decision_does_nothing() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        fx.source.push(Ok(Decision::Hold));

        fx.control.run_tick(&[acct()]).await;

        assert!(fx.store.position(acct(), btc()).await.unwrap().is_none());
        assert_eq!(fx.store.trade_count(), 0);
    }

    #[tokio::test]
    async fn test_ai_failures_trip_breaker_and_gate_next_tick() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        for _ in 0..3 {
            fx.source
                .push(Err(DecisionError::Unavailable("down".into())));
        }

        for _ in 0..3 {
            fx.control.run_tick(&[acct()]).await;
        }
        assert_eq!(breaker_of(&fx).await.phase, BreakerPhase::Tripped);
        assert_eq!(fx.source.contexts().len(), 3);

        // Tripped: the next tick never reaches the decision source.
        fx.control.run_tick(&[acct()]).await;
        assert_eq!(fx.source.contexts().len(), 3);

        // After the cooldown window the account trades again, on probation.
        fx.clock.advance(Duration::minutes(61));
        fx.source.push(Ok(Decision::Hold));
        fx.control.run_tick(&[acct()]).await;
        assert_eq!(fx.source.contexts().len(), 4);
        // The successful decision call promoted cooldown back to active.
        assert_eq!(breaker_of(&fx).await.phase, BreakerPhase::Active);
    }

    #[tokio::test]
    async fn test_losing_close_extends_loss_streak() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(59000)));
        fx.exchange.push_position(pilot_exchange::ExchangePosition {
            symbol: btc(),
            signed_qty: pilot_core::Qty::new(dec!(0.1)),
            entry_price: Price::new(dec!(60000)),
            mark_price: Price::new(dec!(59000)),
            leverage: 10,
            liquidation_price: Price::ZERO,
            unrealized_pnl: Usd::new(dec!(-100)),
        });
        fx.source.push(Ok(Decision::Close { symbol: btc() }));

        fx.control.run_tick(&[acct()]).await;

        let breaker = breaker_of(&fx).await;
        assert_eq!(breaker.consecutive_losses, 1);
        assert_eq!(breaker.phase, BreakerPhase::Active);
        assert_eq!(fx.store.all_trades()[0].pnl, Some(Usd::new(dec!(-100))));
    }

    #[tokio::test]
    async fn test_account_failure_does_not_affect_others() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        // First account's equity read fails; the second account's succeeds.
        fx.exchange.fail_next("account_value", 1);
        fx.source.push(Ok(Decision::Hold));

        let acct_b = AccountId::from("acct2");
        fx.control.run_tick(&[acct(), acct_b.clone()]).await;

        // Only the healthy account reached the decision source.
        let contexts = fx.source.contexts();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].account_id, acct_b);
        // The failed account's trading lock was still released.
        assert!(fx.store.trading_lock(acct()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_position_read_failure_skips_reconcile() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        // A stale local row that normal reconciliation would SYNC_CLOSE.
        fx.store
            .put_position(
                acct(),
                pilot_core::Position {
                    symbol: btc(),
                    side: Side::Long,
                    size_usd: Usd::new(dec!(1000)),
                    leverage: 10,
                    entry_price: Price::new(dec!(60000)),
                    current_price: Price::new(dec!(60000)),
                    stop_loss: None,
                    take_profit: None,
                    liquidation_price: Price::ZERO,
                    opened_at: fx.clock.now() - Duration::minutes(30),
                },
            )
            .await
            .unwrap();
        fx.exchange.fail_next("positions", 1);
        fx.source.push(Ok(Decision::Hold));

        fx.control.run_tick(&[acct()]).await;

        // An outage is not "no positions": the row survives untouched.
        assert!(fx.store.position(acct(), btc()).await.unwrap().is_some());
        assert_eq!(fx.store.trade_count(), 0);
        // The unreconciled replica was still offered as context.
        assert_eq!(fx.source.contexts()[0].open_positions.len(), 1);
    }
}
