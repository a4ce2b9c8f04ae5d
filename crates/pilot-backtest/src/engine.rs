//! Chunked candle-by-candle simulation.
//!
//! Per step, strictly in order: funding accrual, liquidation check at the
//! candle's worst price, stop-loss/take-profit fills (stop first, the
//! pessimistic reading when both could trigger in one candle), and only
//! when flat a decision request. A chunk gives the snapshot back the
//! moment it exceeds its AI-call or wall-clock budget, so one invocation's
//! duration is bounded regardless of how many candles remain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration as ChronoDuration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use pilot_core::{AccountId, Price, Side, Symbol, Usd};
use pilot_decision::{Decision, DecisionContext, DecisionSource, OpenIntent};
use pilot_engine::sanitize_protections;

use crate::candle::Candle;
use crate::cost::CostModel;
use crate::error::BacktestResult;
use crate::snapshot::{SimPosition, SimulationSnapshot};
use crate::stats::{finalize, BacktestReport};

/// Per-chunk resource limits.
#[derive(Debug, Clone)]
pub struct ChunkBudget {
    pub max_ai_calls: u32,
    pub max_elapsed: std::time::Duration,
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self {
            max_ai_calls: 25,
            max_elapsed: std::time::Duration::from_secs(30),
        }
    }
}

/// How a chunk ended.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Budget exhausted; resume from this snapshot.
    Continue(SimulationSnapshot),
    /// Candle series exhausted; the run is done.
    Completed(Box<BacktestReport>),
}

pub struct SimulationEngine {
    cost: CostModel,
    decision_source: Arc<dyn DecisionSource>,
    symbol: Symbol,
    /// Run-level leverage cap, applied on top of per-asset caps.
    max_leverage: u32,
    initial_capital: Usd,
}

impl SimulationEngine {
    pub fn new(
        cost: CostModel,
        decision_source: Arc<dyn DecisionSource>,
        symbol: Symbol,
        max_leverage: u32,
        initial_capital: Usd,
    ) -> Self {
        Self {
            cost,
            decision_source,
            symbol,
            max_leverage,
            initial_capital,
        }
    }

    /// Advance the simulation by one chunk. The caller checks the
    /// cancellation flag before invoking this.
    pub async fn run_chunk(
        &self,
        candles: &[Candle],
        mut snapshot: SimulationSnapshot,
        budget: &ChunkBudget,
    ) -> BacktestResult<ChunkOutcome> {
        let started = Instant::now();
        let mut ai_calls_this_chunk = 0u32;

        while snapshot.cursor < candles.len() {
            if ai_calls_this_chunk >= budget.max_ai_calls
                || started.elapsed() >= budget.max_elapsed
            {
                debug!(
                    cursor = snapshot.cursor,
                    ai_calls = ai_calls_this_chunk,
                    "Chunk budget exhausted, rescheduling"
                );
                return Ok(ChunkOutcome::Continue(snapshot));
            }

            let candle = &candles[snapshot.cursor];
            self.step(candle, &mut snapshot, &mut ai_calls_this_chunk)
                .await?;
            snapshot.cursor += 1;
        }

        // Out of candles: flatten at the final close and report.
        if let Some(position) = snapshot.open_position.take() {
            if let Some(last) = candles.last() {
                self.settle_close(&mut snapshot, position, last.close, Usd::ZERO, false);
            }
        }
        let report = finalize(&snapshot, self.initial_capital);
        info!(
            trades = report.total_trades,
            final_capital = %report.final_capital,
            "Backtest complete"
        );
        Ok(ChunkOutcome::Completed(Box::new(report)))
    }

    async fn step(
        &self,
        candle: &Candle,
        snapshot: &mut SimulationSnapshot,
        ai_calls_this_chunk: &mut u32,
    ) -> BacktestResult<()> {
        if snapshot.open_position.is_some() {
            self.accrue_funding(candle, snapshot);
            if !self.check_liquidation(candle, snapshot) {
                self.check_protections(candle, snapshot);
            }
        }

        if snapshot.open_position.is_none() {
            self.maybe_open(candle, snapshot, ai_calls_this_chunk).await;
        }
        Ok(())
    }

    /// Accrue funding for each whole hour since the position's checkpoint.
    fn accrue_funding(&self, candle: &Candle, snapshot: &mut SimulationSnapshot) {
        let Some(position) = snapshot.open_position.as_mut() else {
            return;
        };
        let hours = (candle.open_time - position.last_funding_at).num_hours();
        if hours < 1 {
            return;
        }
        let payment = self.cost.hourly_funding(
            &position.symbol,
            position.notional(),
            position.side,
        ) * Decimal::from(hours);
        position.accrued_funding = position.accrued_funding + payment;
        position.last_funding_at = position.last_funding_at + ChronoDuration::hours(hours);
    }

    /// Liquidation at the candle's worst price. Returns true if the
    /// position was liquidated.
    fn check_liquidation(&self, candle: &Candle, snapshot: &mut SimulationSnapshot) -> bool {
        let Some(position) = snapshot.open_position.as_ref() else {
            return false;
        };
        let worst = match position.side {
            Side::Long => candle.low,
            Side::Short => candle.high,
        };
        let equity =
            position.margin_usd + position.unrealized_pnl(worst) - position.accrued_funding;
        let maintenance =
            Usd::new(position.notional().inner() * self.cost.maintenance_margin_rate);
        if equity > maintenance {
            return false;
        }

        let Some(position) = snapshot.open_position.take() else {
            return false;
        };
        warn!(
            symbol = %position.symbol,
            price = %worst,
            "Simulated position liquidated"
        );
        let fee = self.cost.liquidation_fee(position.notional());
        self.settle_close(snapshot, position, worst, fee, true);
        true
    }

    /// Stop-loss and take-profit fills against the candle's extremes.
    /// The stop is checked first: when both could trigger inside one
    /// candle, assume the worse outcome.
    fn check_protections(&self, candle: &Candle, snapshot: &mut SimulationSnapshot) {
        let Some(position) = snapshot.open_position.as_ref() else {
            return;
        };
        let notional = position.notional();
        let (stop_hit, tp_hit) = match position.side {
            Side::Long => (
                candle.low <= position.stop_loss,
                candle.high >= position.take_profit,
            ),
            Side::Short => (
                candle.high >= position.stop_loss,
                candle.low <= position.take_profit,
            ),
        };

        if stop_hit {
            let Some(position) = snapshot.open_position.take() else {
                return;
            };
            let fill = self
                .cost
                .stop_fill(position.stop_loss, position.side, notional, candle);
            self.settle_close(snapshot, position, fill, Usd::ZERO, false);
        } else if tp_hit {
            let Some(position) = snapshot.open_position.take() else {
                return;
            };
            let fill =
                self.cost
                    .take_profit_fill(position.take_profit, position.side, notional, candle);
            self.settle_close(snapshot, position, fill, Usd::ZERO, false);
        }
    }

    /// Ask the decision source whether to open. A failed or malformed
    /// decision is a hold; the backtest keeps going.
    async fn maybe_open(
        &self,
        candle: &Candle,
        snapshot: &mut SimulationSnapshot,
        ai_calls_this_chunk: &mut u32,
    ) {
        let mut prices = HashMap::new();
        prices.insert(self.symbol.clone(), candle.close);
        let context = DecisionContext {
            account_id: AccountId::from("backtest"),
            equity: snapshot.capital,
            open_positions: vec![],
            prices,
        };

        snapshot.ai_calls_used += 1;
        *ai_calls_this_chunk += 1;

        match self.decision_source.request_decision(context).await {
            Ok(Decision::OpenLong(intent)) => self.open(candle, snapshot, Side::Long, intent),
            Ok(Decision::OpenShort(intent)) => self.open(candle, snapshot, Side::Short, intent),
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "Decision source failed during backtest, holding");
            }
        }
    }

    fn open(
        &self,
        candle: &Candle,
        snapshot: &mut SimulationSnapshot,
        side: Side,
        intent: OpenIntent,
    ) {
        let leverage = self
            .cost
            .clamp_leverage(&self.symbol, intent.leverage.min(self.max_leverage));
        let margin = intent.size_usd.min(snapshot.capital);
        if !margin.is_positive() {
            return;
        }
        let notional = margin * Decimal::from(leverage);
        let entry = self.cost.entry_fill(candle.close, side, notional, candle);
        let levels = sanitize_protections(entry, side, intent.stop_loss, intent.take_profit);

        let fee = self.cost.taker_fee(notional);
        snapshot.capital = snapshot.capital - fee;
        snapshot.fees_paid = snapshot.fees_paid + fee;

        debug!(
            symbol = %self.symbol,
            ?side,
            %entry,
            leverage,
            margin = %margin,
            "Simulated open"
        );
        snapshot.open_position = Some(SimPosition {
            symbol: self.symbol.clone(),
            side,
            margin_usd: margin,
            leverage,
            entry_price: entry,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            opened_at: candle.open_time,
            accrued_funding: Usd::ZERO,
            last_funding_at: candle.open_time,
        });
        snapshot.update_drawdown();
    }

    /// Book a closed position into the snapshot.
    fn settle_close(
        &self,
        snapshot: &mut SimulationSnapshot,
        position: SimPosition,
        fill: Price,
        extra_fee: Usd,
        liquidated: bool,
    ) {
        let pnl = position.unrealized_pnl(fill);
        let exit_notional = Usd::new(position.qty() * fill.inner());
        let fees = self.cost.taker_fee(exit_notional) + extra_fee;

        snapshot.capital =
            (snapshot.capital + pnl - fees - position.accrued_funding).max_zero();
        snapshot.fees_paid = snapshot.fees_paid + fees;
        snapshot.funding_paid = snapshot.funding_paid + position.accrued_funding;
        snapshot.total_trades += 1;
        if liquidated {
            snapshot.liquidation_count += 1;
        }

        let net = pnl - fees - position.accrued_funding;
        if !net.inner().is_sign_negative() {
            snapshot.wins += 1;
        }
        if position.margin_usd.is_positive() {
            let ret = (net.inner() / position.margin_usd.inner())
                .to_f64()
                .unwrap_or(0.0);
            snapshot.return_sum += ret;
            snapshot.return_sq_sum += ret * ret;
        }
        snapshot.update_drawdown();

        debug!(
            symbol = %position.symbol,
            %fill,
            pnl = %pnl,
            liquidated,
            "Simulated close"
        );
    }
}

trait UsdExt {
    fn max_zero(self) -> Usd;
}

impl UsdExt for Usd {
    fn max_zero(self) -> Usd {
        if self.inner().is_sign_negative() {
            Usd::ZERO
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pilot_decision::ScriptedDecisionSource;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::new("BTC")
    }

    fn candle(at: chrono::DateTime<Utc>, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Candle {
        Candle {
            open_time: at,
            open: Price::new(o),
            high: Price::new(h),
            low: Price::new(l),
            close: Price::new(c),
            volume: dec!(100),
        }
    }

    fn flat_series(n: usize, price: Decimal) -> Vec<Candle> {
        let start = Utc::now();
        (0..n)
            .map(|i| candle(start + Duration::seconds(300 * i as i64), price, price, price, price))
            .collect()
    }

    fn open_long(size: Decimal, leverage: u32, sl: Decimal, tp: Decimal) -> Decision {
        Decision::OpenLong(OpenIntent {
            symbol: btc(),
            size_usd: Usd::new(size),
            leverage,
            stop_loss: Some(Price::new(sl)),
            take_profit: Some(Price::new(tp)),
            confidence: 0.8,
            reasoning: "test".into(),
        })
    }

    fn engine(source: Arc<ScriptedDecisionSource>, max_leverage: u32, capital: Decimal) -> SimulationEngine {
        let mut cost = CostModel::default();
        cost.leverage_caps.insert(btc(), 40);
        SimulationEngine::new(cost, source, btc(), max_leverage, Usd::new(capital))
    }

    async fn complete(
        engine: &SimulationEngine,
        candles: &[Candle],
        mut snapshot: SimulationSnapshot,
        budget: &ChunkBudget,
    ) -> BacktestReport {
        loop {
            match engine.run_chunk(candles, snapshot, budget).await.unwrap() {
                ChunkOutcome::Continue(next) => snapshot = next,
                ChunkOutcome::Completed(report) => return *report,
            }
        }
    }

    #[tokio::test]
    async fn test_stop_loss_fill_with_slippage() {
        // $1000 capital, 40x cap, model opens 5x long at 60000 with a 3%
        // stop and 0.8% target; the next candle trades down to 58100.
        let source = Arc::new(ScriptedDecisionSource::new());
        source.push(Ok(open_long(dec!(1000), 5, dec!(58200), dec!(60480))));
        let engine = engine(source, 40, dec!(1000));

        let start = Utc::now();
        let candles = vec![
            candle(start, dec!(60000), dec!(60000), dec!(60000), dec!(60000)),
            candle(
                start + Duration::seconds(300),
                dec!(60000),
                dec!(60000),
                dec!(58100),
                dec!(58200),
            ),
        ];

        let report = complete(
            &engine,
            &candles,
            SimulationSnapshot::new(Usd::new(dec!(1000))),
            &ChunkBudget::default(),
        )
        .await;

        assert_eq!(report.total_trades, 1);
        assert_eq!(report.liquidation_count, 0);
        assert_eq!(report.wins, 0);
        // Stop filled below the trigger and the loss is bounded by the
        // stop distance plus slippage, well short of the margin.
        assert!(report.total_pnl.inner() < Decimal::ZERO);
        assert!(report.final_capital.inner() > dec!(800));
    }

    #[tokio::test]
    async fn test_liquidation_at_worst_price() {
        // 40x long: a 3% adverse move is far past the ~2.5% liquidation
        // threshold.
        let source = Arc::new(ScriptedDecisionSource::new());
        source.push(Ok(open_long(dec!(1000), 40, dec!(50000), dec!(70000))));
        let engine = engine(source, 40, dec!(1000));

        let start = Utc::now();
        let candles = vec![
            candle(start, dec!(60000), dec!(60000), dec!(60000), dec!(60000)),
            candle(
                start + Duration::seconds(300),
                dec!(60000),
                dec!(60000),
                dec!(58100),
                dec!(58200),
            ),
        ];

        let report = complete(
            &engine,
            &candles,
            SimulationSnapshot::new(Usd::new(dec!(1000))),
            &ChunkBudget::default(),
        )
        .await;

        assert_eq!(report.liquidation_count, 1);
        assert_eq!(report.total_trades, 1);
        // The margin is effectively gone.
        assert!(report.final_capital.inner() < dec!(100));
    }

    #[tokio::test]
    async fn test_flat_price_pnl_is_fees_only() {
        let source = Arc::new(ScriptedDecisionSource::new());
        source.push(Ok(open_long(dec!(500), 2, dec!(90), dec!(120))));
        let mut cost = CostModel::default().frictionless_slippage();
        cost.leverage_caps.insert(btc(), 40);
        let engine = SimulationEngine::new(
            cost.clone(),
            source,
            btc(),
            40,
            Usd::new(dec!(1000)),
        );

        let candles = flat_series(5, dec!(100));
        let report = complete(
            &engine,
            &candles,
            SimulationSnapshot::new(Usd::new(dec!(1000))),
            &ChunkBudget::default(),
        )
        .await;

        // Position survives to the end and is closed at the final price.
        // With zero slippage and a flat series, the only loss is fees.
        let notional = Usd::new(dec!(1000));
        let expected_fees = cost.taker_fee(notional) + cost.taker_fee(notional);
        assert_eq!(report.total_pnl, -expected_fees);
        assert_eq!(report.fees_paid, expected_fees);
        assert_eq!(report.total_trades, 1);
        assert_eq!(report.sharpe_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_funding_accrues_hourly_and_flips_for_short() {
        let source = Arc::new(ScriptedDecisionSource::new());
        source.push(Ok(Decision::OpenShort(OpenIntent {
            symbol: btc(),
            size_usd: Usd::new(dec!(1000)),
            leverage: 2,
            stop_loss: Some(Price::new(dec!(110))),
            take_profit: Some(Price::new(dec!(50))),
            confidence: 0.8,
            reasoning: "test".into(),
        })));
        let cost = CostModel::default().frictionless_slippage();
        let engine =
            SimulationEngine::new(cost.clone(), source, btc(), 10, Usd::new(dec!(1000)));

        // 5-minute candles spanning 2 hours at a flat price.
        let candles = flat_series(25, dec!(100));
        let report = complete(
            &engine,
            &candles,
            SimulationSnapshot::new(Usd::new(dec!(1000))),
            &ChunkBudget::default(),
        )
        .await;

        // Short pays negative funding: it is received, not paid.
        assert!(report.funding_paid.inner() < Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_chunk_budget_suspends_and_resumes() {
        let source = Arc::new(ScriptedDecisionSource::new());
        let engine = engine(source, 10, dec!(1000));
        let candles = flat_series(10, dec!(100));

        let budget = ChunkBudget {
            max_ai_calls: 2,
            max_elapsed: std::time::Duration::from_secs(30),
        };

        // Every step is flat, so every step costs one AI call (scripted
        // source holds once exhausted): 10 candles at 2 calls per chunk.
        let mut snapshot = SimulationSnapshot::new(Usd::new(dec!(1000)));
        let mut chunks = 0;
        let report = loop {
            match engine.run_chunk(&candles, snapshot, &budget).await.unwrap() {
                ChunkOutcome::Continue(next) => {
                    chunks += 1;
                    assert!(next.cursor <= candles.len());
                    snapshot = next;
                }
                ChunkOutcome::Completed(report) => break *report,
            }
        };

        // Two AI calls per chunk over ten flat candles: four suspensions
        // before the final chunk completes the series.
        assert_eq!(chunks, 4);
        assert_eq!(report.ai_calls_used, 10);
        assert_eq!(report.total_trades, 0);
    }
}
