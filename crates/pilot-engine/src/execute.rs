//! Trade execution.
//!
//! Open path ordering is the safety-critical part: the trade and position
//! rows are persisted before any protective order is attempted, so a
//! position can never be filled yet untracked. An unconfirmed stop-loss is
//! fatal for the position and forces an immediate market close; an
//! unconfirmed take-profit is only a warning.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use pilot_core::{AccountId, Position, Price, Qty, Side, Symbol, TradeAction, TradeRecord, Usd};
use pilot_exchange::{ExchangeClient, OrderKind, OrderRequest};
use pilot_store::{BoxFuture, PositionStore, TradeStore};

use crate::cooldown::RecentTradeCache;
use crate::error::EngineResult;
use crate::sanitize::ProtectiveLevels;

/// Protective-order placement attempts.
const PROTECTION_MAX_ATTEMPTS: u32 = 3;

/// Backoff before retry attempts 2 and 3.
const PROTECTION_BACKOFF: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(4)];

/// Best-effort outbound notification channel. Failures must never abort
/// trading logic; the executor logs and moves on.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: String) -> BoxFuture<'_, Result<(), String>>;
}

/// Notifier that drops everything.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _message: String) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }
}

/// Post-placement visibility of protective orders, from re-reading the
/// open-order list after both placements acked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionVisibility {
    pub stop_loss: bool,
    pub take_profit: bool,
}

/// What the open path did.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// Position opened and stop-loss confirmed (take-profit best-effort).
    Opened,
    /// Stop-loss could not be placed; the position was closed at market.
    EmergencyClosed { pnl: Usd },
}

/// A realized close, fed into the circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    pub pnl: Usd,
    pub won: bool,
}

/// Fully specified open request, post-validation and post-sanitization.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub size_usd: Usd,
    pub leverage: u32,
    pub levels: ProtectiveLevels,
    pub reasoning: String,
}

pub struct TradeExecutor {
    exchange: Arc<dyn ExchangeClient>,
    positions: Arc<dyn PositionStore>,
    trades: Arc<dyn TradeStore>,
    recent: Arc<RecentTradeCache>,
    notifier: Arc<dyn Notifier>,
}

impl TradeExecutor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        positions: Arc<dyn PositionStore>,
        trades: Arc<dyn TradeStore>,
        recent: Arc<RecentTradeCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            exchange,
            positions,
            trades,
            recent,
            notifier,
        }
    }

    /// Open a position. The caller has already validated and sanitized.
    pub async fn open(
        &self,
        account: &AccountId,
        request: OpenRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<OpenOutcome> {
        let entry = self.exchange.market_price(request.symbol.clone()).await?;
        let notional = request.size_usd * Decimal::from(request.leverage);
        let qty = notional.to_qty(entry);

        let fill = self
            .exchange
            .place_order(
                account.clone(),
                OrderRequest {
                    symbol: request.symbol.clone(),
                    side: request.side,
                    qty,
                    leverage: request.leverage,
                },
            )
            .await?;
        info!(
            account = %account,
            symbol = %request.symbol,
            side = ?request.side,
            price = %fill.price,
            qty = %fill.qty,
            "Entry filled"
        );

        // Persist before protections: a filled position must be tracked
        // even if every protective placement fails.
        self.trades
            .append_trade(
                TradeRecord::new(
                    account.clone(),
                    request.symbol.clone(),
                    request.side,
                    TradeAction::Open,
                    fill.price,
                    request.size_usd,
                    request.leverage,
                    now,
                )
                .with_reason(request.reasoning.clone()),
            )
            .await?;
        self.positions
            .put_position(
                account.clone(),
                Position {
                    symbol: request.symbol.clone(),
                    side: request.side,
                    size_usd: request.size_usd,
                    leverage: request.leverage,
                    entry_price: fill.price,
                    current_price: fill.price,
                    stop_loss: Some(request.levels.stop_loss),
                    take_profit: Some(request.levels.take_profit),
                    liquidation_price: Price::ZERO,
                    opened_at: now,
                },
            )
            .await?;
        self.recent.mark(&request.symbol, request.side, now);

        let signed_qty = match request.side {
            Side::Long => fill.qty,
            Side::Short => -fill.qty,
        };

        if !self
            .place_protection(account, &request, fill.qty, OrderKind::StopLoss)
            .await
        {
            return Ok(OpenOutcome::EmergencyClosed {
                pnl: self
                    .emergency_close(account, &request, fill.price, signed_qty, now)
                    .await?,
            });
        }

        if !self
            .place_protection(account, &request, fill.qty, OrderKind::TakeProfit)
            .await
        {
            warn!(
                account = %account,
                symbol = %request.symbol,
                "Take-profit could not be placed, position remains without one"
            );
        }

        let visibility = self.verify_protections(account, &request.symbol).await;
        if !visibility.stop_loss {
            self.send_notification(format!(
                "UNVERIFIED STOP LOSS {} {}: placement acked but order not on the book",
                account, request.symbol
            ))
            .await;
        }
        Ok(OpenOutcome::Opened)
    }

    /// Place one protective order with bounded retries. Before each retry
    /// the open-order list is re-read: a previous attempt may have landed
    /// despite its call failing, and a duplicate protective order is worse
    /// than a late one.
    async fn place_protection(
        &self,
        account: &AccountId,
        request: &OpenRequest,
        qty: Qty,
        kind: OrderKind,
    ) -> bool {
        let trigger = match kind {
            OrderKind::StopLoss => request.levels.stop_loss,
            OrderKind::TakeProfit => request.levels.take_profit,
            OrderKind::Entry => return false,
        };

        for attempt in 1..=PROTECTION_MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(PROTECTION_BACKOFF[(attempt - 2) as usize]).await;
                match self.protection_exists(account, &request.symbol, kind).await {
                    Ok(true) => {
                        debug!(symbol = %request.symbol, ?kind, "Earlier attempt landed");
                        return true;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(symbol = %request.symbol, %err, "Duplicate check failed")
                    }
                }
            }

            let placed = match kind {
                OrderKind::StopLoss => {
                    self.exchange
                        .place_stop_loss(
                            account.clone(),
                            request.symbol.clone(),
                            request.side,
                            qty,
                            trigger,
                        )
                        .await
                }
                OrderKind::TakeProfit => {
                    self.exchange
                        .place_take_profit(
                            account.clone(),
                            request.symbol.clone(),
                            request.side,
                            qty,
                            trigger,
                        )
                        .await
                }
                OrderKind::Entry => unreachable!(),
            };

            match placed {
                Ok(ack) => {
                    debug!(
                        symbol = %request.symbol,
                        ?kind,
                        order_id = %ack.order_id,
                        attempt,
                        "Protective order placed"
                    );
                    return true;
                }
                Err(err) => {
                    warn!(
                        symbol = %request.symbol,
                        ?kind,
                        attempt,
                        %err,
                        "Protective placement failed"
                    );
                }
            }
        }
        false
    }

    async fn protection_exists(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        kind: OrderKind,
    ) -> EngineResult<bool> {
        let orders = self
            .exchange
            .open_orders(account.clone(), Some(symbol.clone()))
            .await?;
        Ok(orders.iter().any(|o| o.kind == kind))
    }

    /// An unprotected leveraged position is an unacceptable risk, not a
    /// warning. Close it at market and record why.
    async fn emergency_close(
        &self,
        account: &AccountId,
        request: &OpenRequest,
        entry: Price,
        signed_qty: Qty,
        now: DateTime<Utc>,
    ) -> EngineResult<Usd> {
        error!(
            account = %account,
            symbol = %request.symbol,
            "Stop-loss unconfirmed after all retries, emergency closing"
        );

        let fill = self
            .exchange
            .close_position(account.clone(), request.symbol.clone(), signed_qty)
            .await?;
        let pnl = realized_pnl(entry, fill.price, fill.qty, request.side);

        self.trades
            .append_trade(
                TradeRecord::new(
                    account.clone(),
                    request.symbol.clone(),
                    request.side,
                    TradeAction::EmergencyClose,
                    fill.price,
                    request.size_usd,
                    request.leverage,
                    now,
                )
                .with_pnl(pnl)
                .with_reason("stop_loss_unprotected"),
            )
            .await?;
        self.positions
            .delete_position(account.clone(), request.symbol.clone())
            .await?;

        self.send_notification(format!(
            "EMERGENCY CLOSE {} {}: stop-loss could not be placed (pnl {pnl})",
            account, request.symbol
        ))
        .await;
        Ok(pnl)
    }

    /// An ack is a claim, not proof. Re-read the order book and scream if
    /// the stop-loss is not actually there.
    ///
    /// When the order list itself cannot be read, both orders are treated
    /// as visible: an unverifiable placement is not evidence of a missing
    /// one, and the next reconcile pass re-checks anyway.
    async fn verify_protections(
        &self,
        account: &AccountId,
        symbol: &Symbol,
    ) -> ProtectionVisibility {
        match self
            .exchange
            .open_orders(account.clone(), Some(symbol.clone()))
            .await
        {
            Ok(orders) => {
                let visibility = ProtectionVisibility {
                    stop_loss: orders.iter().any(|o| o.kind == OrderKind::StopLoss),
                    take_profit: orders.iter().any(|o| o.kind == OrderKind::TakeProfit),
                };
                if !visibility.stop_loss {
                    error!(
                        account = %account,
                        symbol = %symbol,
                        "Stop-loss reported placed but not visible on exchange"
                    );
                }
                if !visibility.take_profit {
                    warn!(
                        account = %account,
                        symbol = %symbol,
                        "Take-profit not visible on exchange"
                    );
                }
                visibility
            }
            Err(err) => {
                warn!(account = %account, symbol = %symbol, %err, "Protection verify failed");
                ProtectionVisibility {
                    stop_loss: true,
                    take_profit: true,
                }
            }
        }
    }

    /// Close a position, preferring exchange truth for sizing.
    ///
    /// Returns `None` when there was nothing to close on the exchange (a
    /// reconciling ledger row may still have been written).
    pub async fn close(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<CloseOutcome>> {
        let remote = self.exchange.positions(account.clone()).await?;
        let Some(remote_pos) = remote.iter().find(|p| &p.symbol == symbol && p.is_open()) else {
            return self.close_already_gone(account, symbol, now).await;
        };

        // Best-effort: a stuck protective order must not block the close.
        match self
            .exchange
            .cancel_orders_for_symbol(account.clone(), symbol.clone())
            .await
        {
            Ok(cancelled) if cancelled > 0 => {
                debug!(symbol = %symbol, cancelled, "Cancelled protective orders")
            }
            Ok(_) => {}
            Err(err) => warn!(symbol = %symbol, %err, "Cancel before close failed"),
        }

        let side = remote_pos.side();
        let fill = self
            .exchange
            .close_position(account.clone(), symbol.clone(), remote_pos.signed_qty)
            .await?;
        let mark = self.exchange.market_price(symbol.clone()).await?;
        let pnl = realized_pnl(remote_pos.entry_price, mark, fill.qty, side);

        let local = self.positions.position(account.clone(), symbol.clone()).await?;
        let (size_usd, leverage) = local
            .as_ref()
            .map(|p| (p.size_usd, p.leverage))
            .unwrap_or_else(|| {
                let lev = remote_pos.leverage.max(1);
                (remote_pos.notional() / Decimal::from(lev), lev)
            });

        self.trades
            .append_trade(
                TradeRecord::new(
                    account.clone(),
                    symbol.clone(),
                    side,
                    TradeAction::Close,
                    fill.price,
                    size_usd,
                    leverage,
                    now,
                )
                .with_pnl(pnl)
                .with_reason(reason),
            )
            .await?;
        self.positions
            .delete_position(account.clone(), symbol.clone())
            .await?;

        let won = pnl.inner() >= Decimal::ZERO;
        info!(
            account = %account,
            symbol = %symbol,
            pnl = %pnl,
            won,
            "Position closed"
        );
        self.send_notification(format!("CLOSE {account} {symbol}: pnl {pnl}"))
            .await;

        Ok(Some(CloseOutcome { pnl, won }))
    }

    /// The exchange has no position: treat the close as already done and
    /// reconcile the ledger from local data, without touching the exchange
    /// again.
    async fn close_already_gone(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<CloseOutcome>> {
        let Some(local) = self.positions.position(account.clone(), symbol.clone()).await? else {
            debug!(account = %account, symbol = %symbol, "Nothing to close");
            return Ok(None);
        };

        warn!(
            account = %account,
            symbol = %symbol,
            "Close requested but exchange reports no position, reconciling"
        );
        let pnl = local.unrealized_pnl(local.current_price);
        self.trades
            .append_trade(
                TradeRecord::new(
                    account.clone(),
                    symbol.clone(),
                    local.side,
                    TradeAction::Close,
                    local.current_price,
                    local.size_usd,
                    local.leverage,
                    now,
                )
                .with_pnl(pnl)
                .with_reason("already_closed_on_exchange"),
            )
            .await?;
        self.positions
            .delete_position(account.clone(), symbol.clone())
            .await?;
        Ok(None)
    }

    async fn send_notification(&self, message: String) {
        if let Err(err) = self.notifier.notify(message).await {
            warn!(%err, "Notification failed");
        }
    }
}

/// Realized PnL for a filled quantity between two prices.
fn realized_pnl(entry: Price, exit: Price, qty: Qty, side: Side) -> Usd {
    Usd::new((exit.inner() - entry.inner()) * qty.inner().abs() * side.sign())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::sanitize_protections;
    use parking_lot::Mutex;
    use pilot_exchange::{ExchangeCall, ExchangePosition, MockExchange};
    use pilot_store::MemStore;
    use rust_decimal_macros::dec;

    fn acct() -> AccountId {
        AccountId::from("acct1")
    }

    fn btc() -> Symbol {
        Symbol::new("BTC")
    }

    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: String) -> BoxFuture<'_, Result<(), String>> {
            Box::pin(async move {
                self.messages.lock().push(message);
                Ok(())
            })
        }
    }

    struct Fixture {
        store: Arc<MemStore>,
        exchange: Arc<MockExchange>,
        notifier: Arc<RecordingNotifier>,
        executor: TradeExecutor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemStore::new());
        let exchange = Arc::new(MockExchange::new());
        let notifier = Arc::new(RecordingNotifier {
            messages: Mutex::new(Vec::new()),
        });
        let executor = TradeExecutor::new(
            exchange.clone(),
            store.clone(),
            store.clone(),
            Arc::new(RecentTradeCache::new()),
            notifier.clone(),
        );
        Fixture {
            store,
            exchange,
            notifier,
            executor,
        }
    }

    fn open_request() -> OpenRequest {
        let entry = Price::new(dec!(60000));
        OpenRequest {
            symbol: btc(),
            side: Side::Long,
            size_usd: Usd::new(dec!(1000)),
            leverage: 10,
            levels: sanitize_protections(
                entry,
                Side::Long,
                Some(Price::new(dec!(58200))),
                Some(Price::new(dec!(60480))),
            ),
            reasoning: "breakout".into(),
        }
    }

    #[tokio::test]
    async fn test_open_happy_path() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));

        let outcome = fx
            .executor
            .open(&acct(), open_request(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::Opened);

        let position = fx.store.position(acct(), btc()).await.unwrap().unwrap();
        assert_eq!(position.stop_loss, Some(Price::new(dec!(58200))));
        assert_eq!(position.take_profit, Some(Price::new(dec!(60480))));

        let trades = fx.store.all_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].action, TradeAction::Open);

        // Both protective orders visible on the exchange.
        let orders = fx.exchange.open_orders(acct(), Some(btc())).await.unwrap();
        assert!(orders.iter().any(|o| o.kind == OrderKind::StopLoss));
        assert!(orders.iter().any(|o| o.kind == OrderKind::TakeProfit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_loss_retry_then_success() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        fx.exchange.fail_next("place_stop_loss", 2);

        let outcome = fx
            .executor
            .open(&acct(), open_request(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::Opened);
        assert_eq!(
            fx.exchange
                .call_count(|c| matches!(c, ExchangeCall::PlaceStopLoss { .. })),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_loss_failure_forces_emergency_close() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        fx.exchange.fail_next("place_stop_loss", PROTECTION_MAX_ATTEMPTS);

        let outcome = fx
            .executor
            .open(&acct(), open_request(), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, OpenOutcome::EmergencyClosed { .. }));

        // No local position remains and the exchange is flat.
        assert!(fx.store.position(acct(), btc()).await.unwrap().is_none());
        assert!(fx.exchange.position_for(&btc()).is_none());

        let trades = fx.store.all_trades();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].action, TradeAction::Open);
        assert_eq!(trades[1].action, TradeAction::EmergencyClose);
        assert_eq!(trades[1].reason.as_deref(), Some("stop_loss_unprotected"));

        assert_eq!(fx.notifier.messages.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_profit_failure_is_not_fatal() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        fx.exchange
            .fail_next("place_take_profit", PROTECTION_MAX_ATTEMPTS);

        let outcome = fx
            .executor
            .open(&acct(), open_request(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::Opened);

        // Position still tracked, stop-loss placed, no take-profit.
        assert!(fx.store.position(acct(), btc()).await.unwrap().is_some());
        let orders = fx.exchange.open_orders(acct(), Some(btc())).await.unwrap();
        assert!(orders.iter().any(|o| o.kind == OrderKind::StopLoss));
        assert!(!orders.iter().any(|o| o.kind == OrderKind::TakeProfit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skips_when_earlier_attempt_landed() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        // The call fails but the order lands anyway (ack lost in transit).
        fx.exchange.fail_next("place_stop_loss", 1);

        // Pre-seed the order the "failed" call actually created.
        fx.exchange.set_open_orders(vec![pilot_exchange::OpenOrder {
            order_id: "landed".into(),
            symbol: btc(),
            kind: OrderKind::StopLoss,
            side: Side::Long,
            qty: Qty::new(dec!(0.1)),
            trigger_price: Some(Price::new(dec!(58200))),
        }]);

        let outcome = fx
            .executor
            .open(&acct(), open_request(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::Opened);
        // Only the one failed placement call, no duplicate.
        assert_eq!(
            fx.exchange
                .call_count(|c| matches!(c, ExchangeCall::PlaceStopLoss { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_invisible_stop_loss_is_detected_and_reported() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));
        // Placement acks succeed but neither order ever reaches the book.
        fx.exchange.suppress_protective_visibility(true);

        let outcome = fx
            .executor
            .open(&acct(), open_request(), Utc::now())
            .await
            .unwrap();
        // The ack was accepted, so the position stays open; detection is
        // the verify step's job, not a close trigger.
        assert_eq!(outcome, OpenOutcome::Opened);

        let visibility = fx.executor.verify_protections(&acct(), &btc()).await;
        assert!(!visibility.stop_loss);
        assert!(!visibility.take_profit);

        // The missing stop-loss was escalated to the operator channel.
        let messages = fx.notifier.messages.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("UNVERIFIED STOP LOSS"));
    }

    #[tokio::test]
    async fn test_verify_assumes_visible_when_order_read_fails() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(60000)));

        let outcome = fx
            .executor
            .open(&acct(), open_request(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::Opened);

        fx.exchange.fail_next("open_orders", 1);
        let visibility = fx.executor.verify_protections(&acct(), &btc()).await;
        assert!(visibility.stop_loss);
        assert!(visibility.take_profit);
        assert!(fx.notifier.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_close_happy_path() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(61000)));
        fx.exchange.push_position(ExchangePosition {
            symbol: btc(),
            signed_qty: Qty::new(dec!(0.1)),
            entry_price: Price::new(dec!(60000)),
            mark_price: Price::new(dec!(61000)),
            leverage: 10,
            liquidation_price: Price::ZERO,
            unrealized_pnl: Usd::new(dec!(100)),
        });
        fx.store
            .put_position(
                acct(),
                Position {
                    symbol: btc(),
                    side: Side::Long,
                    size_usd: Usd::new(dec!(600)),
                    leverage: 10,
                    entry_price: Price::new(dec!(60000)),
                    current_price: Price::new(dec!(61000)),
                    stop_loss: Some(Price::new(dec!(58200))),
                    take_profit: None,
                    liquidation_price: Price::ZERO,
                    opened_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let outcome = fx
            .executor
            .close(&acct(), &btc(), "decision", Utc::now())
            .await
            .unwrap()
            .unwrap();
        // (61000 - 60000) * 0.1 = $100 profit.
        assert_eq!(outcome.pnl, Usd::new(dec!(100)));
        assert!(outcome.won);

        assert!(fx.store.position(acct(), btc()).await.unwrap().is_none());
        let trades = fx.store.all_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].action, TradeAction::Close);
        assert_eq!(trades[0].pnl, Some(Usd::new(dec!(100))));
        assert_eq!(fx.notifier.messages.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_close_when_exchange_already_flat() {
        let fx = fixture();
        fx.store
            .put_position(
                acct(),
                Position {
                    symbol: btc(),
                    side: Side::Short,
                    size_usd: Usd::new(dec!(500)),
                    leverage: 5,
                    entry_price: Price::new(dec!(60000)),
                    current_price: Price::new(dec!(59000)),
                    stop_loss: None,
                    take_profit: None,
                    liquidation_price: Price::ZERO,
                    opened_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let outcome = fx
            .executor
            .close(&acct(), &btc(), "decision", Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_none());

        // Reconciling ledger row written, local row gone, and crucially the
        // exchange was never asked to close anything.
        let trades = fx.store.all_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason.as_deref(), Some("already_closed_on_exchange"));
        assert!(fx.store.position(acct(), btc()).await.unwrap().is_none());
        assert_eq!(
            fx.exchange
                .call_count(|c| matches!(c, ExchangeCall::ClosePosition { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_close_cancel_failure_does_not_abort() {
        let fx = fixture();
        fx.exchange.set_price(btc(), Price::new(dec!(59000)));
        fx.exchange.push_position(ExchangePosition {
            symbol: btc(),
            signed_qty: Qty::new(dec!(-0.2)),
            entry_price: Price::new(dec!(60000)),
            mark_price: Price::new(dec!(59000)),
            leverage: 5,
            liquidation_price: Price::ZERO,
            unrealized_pnl: Usd::new(dec!(200)),
        });
        fx.exchange.fail_next("cancel_orders", 1);

        let outcome = fx
            .executor
            .close(&acct(), &btc(), "decision", Utc::now())
            .await
            .unwrap()
            .unwrap();
        // Short from 60000 closed at 59000: (59000-60000)*0.2*-1 = +$200.
        assert_eq!(outcome.pnl, Usd::new(dec!(200)));
        assert!(outcome.won);
    }
}
