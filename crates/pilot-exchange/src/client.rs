//! The exchange client trait.

use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use pilot_core::{AccountId, Price, Qty, Side, Symbol, Usd};

use crate::types::{ExchangePosition, OpenOrder, OrderAck, OrderFill, OrderRequest};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Exchange call failure.
#[derive(Debug, Error, Clone)]
pub enum ExchangeError {
    #[error("Exchange API error: {0}")]
    Api(String),

    #[error("Exchange request timed out: {0}")]
    Timeout(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(Symbol),

    #[error("Order rejected: {0}")]
    OrderRejected(String),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Opaque client for a derivatives exchange.
///
/// Every method is a blocking I/O call from the loop's point of view.
/// Implementations own signing, transport and rate limiting.
pub trait ExchangeClient: Send + Sync {
    /// Total account value (margin balance plus unrealized PnL), USD.
    fn account_value(&self, account: AccountId) -> BoxFuture<'_, ExchangeResult<Usd>>;

    /// All positions with non-zero size.
    fn positions(&self, account: AccountId)
        -> BoxFuture<'_, ExchangeResult<Vec<ExchangePosition>>>;

    /// Resting orders, optionally filtered to one symbol.
    fn open_orders(
        &self,
        account: AccountId,
        symbol: Option<Symbol>,
    ) -> BoxFuture<'_, ExchangeResult<Vec<OpenOrder>>>;

    /// Current mark price for a symbol.
    fn market_price(&self, symbol: Symbol) -> BoxFuture<'_, ExchangeResult<Price>>;

    /// Submit a market entry order.
    fn place_order(
        &self,
        account: AccountId,
        request: OrderRequest,
    ) -> BoxFuture<'_, ExchangeResult<OrderFill>>;

    /// Place a stop-loss for an existing position.
    fn place_stop_loss(
        &self,
        account: AccountId,
        symbol: Symbol,
        side: Side,
        qty: Qty,
        trigger: Price,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>>;

    /// Place a take-profit for an existing position.
    fn place_take_profit(
        &self,
        account: AccountId,
        symbol: Symbol,
        side: Side,
        qty: Qty,
        trigger: Price,
    ) -> BoxFuture<'_, ExchangeResult<OrderAck>>;

    /// Cancel every resting order for a symbol. Returns the count.
    fn cancel_orders_for_symbol(
        &self,
        account: AccountId,
        symbol: Symbol,
    ) -> BoxFuture<'_, ExchangeResult<usize>>;

    /// Close a position at market, sized by the signed quantity the
    /// exchange reported.
    fn close_position(
        &self,
        account: AccountId,
        symbol: Symbol,
        signed_qty: Qty,
    ) -> BoxFuture<'_, ExchangeResult<OrderFill>>;
}

/// Arc wrapper for exchange trait objects.
pub type DynExchange = Arc<dyn ExchangeClient>;
