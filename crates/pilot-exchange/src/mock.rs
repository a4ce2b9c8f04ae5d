//! Recording exchange double for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use pilot_core::{AccountId, Price, Qty, Side, Symbol, Usd};

use crate::client::{BoxFuture, ExchangeClient, ExchangeError, ExchangeResult};
use crate::types::{ExchangePosition, OpenOrder, OrderAck, OrderFill, OrderKind, OrderRequest};

/// One recorded call, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeCall {
    AccountValue,
    Positions,
    OpenOrders { symbol: Option<Symbol> },
    MarketPrice { symbol: Symbol },
    PlaceOrder { symbol: Symbol, side: Side, qty: Qty },
    PlaceStopLoss { symbol: Symbol, trigger: Price },
    PlaceTakeProfit { symbol: Symbol, trigger: Price },
    CancelOrders { symbol: Symbol },
    ClosePosition { symbol: Symbol, signed_qty: Qty },
}

/// Scriptable exchange state.
///
/// - `set_price` / `set_positions` / `set_open_orders` seed state
/// - `fail_next(op, n)` makes the next `n` calls of an operation fail
/// - successful entry fills create positions; successful protective
///   placements become visible as open orders (unless suppressed)
/// - `calls()` returns the full call log
#[derive(Default)]
pub struct MockExchange {
    prices: Mutex<HashMap<Symbol, Price>>,
    positions: Mutex<Vec<ExchangePosition>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    account_value: Mutex<Usd>,
    /// op name -> remaining forced failures.
    failures: Mutex<HashMap<&'static str, u32>>,
    calls: Mutex<Vec<ExchangeCall>>,
    /// When set, SL/TP placements ack but never show up in open orders.
    suppress_protective_visibility: AtomicBool,
}

impl MockExchange {
    #[must_use]
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.account_value.lock() = Usd::new(Decimal::from(10_000));
        mock
    }

    pub fn set_price(&self, symbol: Symbol, price: Price) {
        self.prices.lock().insert(symbol, price);
    }

    pub fn set_account_value(&self, value: Usd) {
        *self.account_value.lock() = value;
    }

    pub fn set_positions(&self, positions: Vec<ExchangePosition>) {
        *self.positions.lock() = positions;
    }

    pub fn push_position(&self, position: ExchangePosition) {
        self.positions.lock().push(position);
    }

    pub fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        *self.open_orders.lock() = orders;
    }

    /// Force the next `count` calls of `op` to fail.
    ///
    /// Operation names: `account_value`, `positions`, `open_orders`,
    /// `market_price`, `place_order`, `place_stop_loss`,
    /// `place_take_profit`, `cancel_orders`, `close_position`.
    pub fn fail_next(&self, op: &'static str, count: u32) {
        self.failures.lock().insert(op, count);
    }

    /// Acks for SL/TP will succeed without the order becoming visible.
    pub fn suppress_protective_visibility(&self, suppress: bool) {
        self.suppress_protective_visibility
            .store(suppress, Ordering::SeqCst);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self, matches: impl Fn(&ExchangeCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    #[must_use]
    pub fn position_for(&self, symbol: &Symbol) -> Option<ExchangePosition> {
        self.positions
            .lock()
            .iter()
            .find(|p| &p.symbol == symbol)
            .cloned()
    }

    fn take_failure(&self, op: &'static str) -> Option<ExchangeError> {
        let mut failures = self.failures.lock();
        match failures.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(ExchangeError::Api(format!("scripted failure: {op}")))
            }
            _ => None,
        }
    }

    fn price_of(&self, symbol: &Symbol) -> ExchangeResult<Price> {
        self.prices
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.clone()))
    }

    fn record(&self, call: ExchangeCall) {
        self.calls.lock().push(call);
    }
}

impl ExchangeClient for MockExchange {
    fn account_value(&self, _account: AccountId) -> BoxFuture<'_, ExchangeResult<Usd>> {
        Box::pin(async move {
            self.record(ExchangeCall::AccountValue);
            if let Some(err) = self.take_failure("account_value") {
                return Err(err);
            }
            Ok(*self.account_value.lock())
        })
    }

    fn positions(
        &self,
        _account: AccountId,
    ) -> BoxFuture<'_, ExchangeResult<Vec<ExchangePosition>>> {
        Box::pin(async move {
            self.record(ExchangeCall::Positions);
            if let Some(err) = self.take_failure("positions") {
                return Err(err);
            }
            Ok(self
                .positions
                .lock()
                .iter()
                .filter(|p| p.is_open())
                .cloned()
                .collect())
        })
    }

    fn open_orders(
        &self,
        _account: AccountId,
        symbol: Option<Symbol>,
    ) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            self.record(ExchangeCall::OpenOrders {
                symbol: symbol.clone(),
            });
            if let Some(err) = self.take_failure("open_orders") {
                return Err(err);
            }
            Ok(self
                .open_orders
                .lock()
                .iter()
                .filter(|o| symbol.as_ref().map_or(true, |s| &o.symbol == s))
                .cloned()
                .collect())
        })
    }

    fn market_price(&self, symbol: Symbol) -> BoxFuture<'_, ExchangeResult<Price>> {
        Box::pin(async move {
            self.record(ExchangeCall::MarketPrice {
                symbol: symbol.clone(),
            });
            if let Some(err) = self.take_failure("market_price") {
                return Err(err);
            }
            self.price_of(&symbol)
        })
    }

    fn place_order(
        &self,
        _account: AccountId,
        request: OrderRequest,
    ) -> BoxFuture<'_, ExchangeResult<OrderFill>> {
        Box::pin(async move {
            self.record(ExchangeCall::PlaceOrder {
                symbol: request.symbol.clone(),
                side: request.side,
                qty: request.qty,
            });
            if let Some(err) = self.take_failure("place_order") {
                return Err(err);
            }
            let price = self.price_of(&request.symbol)?;

            let signed = match request.side {
                Side::Long => request.qty,
                Side::Short => -request.qty,
            };
            self.positions.lock().push(ExchangePosition {
                symbol: request.symbol.clone(),
                signed_qty: signed,
                entry_price: price,
                mark_price: price,
                leverage: request.leverage,
                liquidation_price: Price::ZERO,
                unrealized_pnl: Usd::ZERO,
            });

            Ok(OrderFill {
                price,
                qty: request.qty,
            })
        })
    }

    fn place_stop_loss(
        &self,
        _account: AccountId,
        symbol: Symbol,
        side: Side,
        qty: Qty,
        trigger: Price,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>> {
        Box::pin(async move {
            self.record(ExchangeCall::PlaceStopLoss {
                symbol: symbol.clone(),
                trigger,
            });
            if let Some(err) = self.take_failure("place_stop_loss") {
                return Err(err);
            }
            let order_id = uuid::Uuid::new_v4().to_string();
            if !self.suppress_protective_visibility.load(Ordering::SeqCst) {
                self.open_orders.lock().push(OpenOrder {
                    order_id: order_id.clone(),
                    symbol,
                    kind: OrderKind::StopLoss,
                    side,
                    qty,
                    trigger_price: Some(trigger),
                });
            }
            Ok(OrderAck { order_id })
        })
    }

    fn place_take_profit(
        &self,
        _account: AccountId,
        symbol: Symbol,
        side: Side,
        qty: Qty,
        trigger: Price,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>> {
        Box::pin(async move {
            self.record(ExchangeCall::PlaceTakeProfit {
                symbol: symbol.clone(),
                trigger,
            });
            if let Some(err) = self.take_failure("place_take_profit") {
                return Err(err);
            }
            let order_id = uuid::Uuid::new_v4().to_string();
            if !self.suppress_protective_visibility.load(Ordering::SeqCst) {
                self.open_orders.lock().push(OpenOrder {
                    order_id: order_id.clone(),
                    symbol,
                    kind: OrderKind::TakeProfit,
                    side,
                    qty,
                    trigger_price: Some(trigger),
                });
            }
            Ok(OrderAck { order_id })
        })
    }

    fn cancel_orders_for_symbol(
        &self,
        _account: AccountId,
        symbol: Symbol,
    ) -> BoxFuture<'_, ExchangeResult<usize>> {
        Box::pin(async move {
            self.record(ExchangeCall::CancelOrders {
                symbol: symbol.clone(),
            });
            if let Some(err) = self.take_failure("cancel_orders") {
                return Err(err);
            }
            let mut orders = self.open_orders.lock();
            let before = orders.len();
            orders.retain(|o| o.symbol != symbol);
            Ok(before - orders.len())
        })
    }

    fn close_position(
        &self,
        _account: AccountId,
        symbol: Symbol,
        signed_qty: Qty,
    ) -> BoxFuture<'_, ExchangeResult<OrderFill>> {
        Box::pin(async move {
            self.record(ExchangeCall::ClosePosition {
                symbol: symbol.clone(),
                signed_qty,
            });
            if let Some(err) = self.take_failure("close_position") {
                return Err(err);
            }
            let price = self.price_of(&symbol)?;
            self.positions.lock().retain(|p| p.symbol != symbol);
            Ok(OrderFill {
                price,
                qty: signed_qty.abs(),
            })
        })
    }
}
