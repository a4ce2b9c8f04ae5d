//! Table traits the agent persists through.
//!
//! Dyn-compatible async via a boxed-future alias. Methods take owned
//! arguments so implementations are free to move them into request
//! futures.

use chrono::{DateTime, Utc};
use std::pin::Pin;

use pilot_core::{
    AccountId, CircuitBreakerState, Position, Side, Symbol, SymbolTradeLock, TradeRecord,
    TradingLock,
};

use crate::StoreResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Lease rows for the lock manager.
pub trait LockStore: Send + Sync {
    /// The current trading lease for an account, expired or not.
    fn trading_lock(&self, account: AccountId) -> BoxFuture<'_, StoreResult<Option<TradingLock>>>;

    fn insert_trading_lock(&self, lock: TradingLock) -> BoxFuture<'_, StoreResult<()>>;

    /// Delete by lease id. No-op when the row is already gone.
    fn delete_trading_lock(
        &self,
        account: AccountId,
        lease_id: String,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// All symbol-lock rows for an account+symbol+side key, including
    /// expired ones.
    fn symbol_locks(
        &self,
        account: AccountId,
        symbol: Symbol,
        side: Side,
    ) -> BoxFuture<'_, StoreResult<Vec<SymbolTradeLock>>>;

    /// Insert a symbol lock. The store stamps `seq` with a monotonically
    /// increasing insertion sequence and returns the stored row.
    fn insert_symbol_lock(
        &self,
        lock: SymbolTradeLock,
    ) -> BoxFuture<'_, StoreResult<SymbolTradeLock>>;

    /// Delete by token. No-op when the row is already gone.
    fn delete_symbol_lock(&self, token: String) -> BoxFuture<'_, StoreResult<()>>;

    /// Delete every lease (both kinds) past its expiry. Returns the number
    /// of rows removed.
    fn sweep_expired_locks(&self, now: DateTime<Utc>) -> BoxFuture<'_, StoreResult<usize>>;
}

/// Local position replica, indexed by (account) and (account, symbol).
pub trait PositionStore: Send + Sync {
    fn positions(&self, account: AccountId) -> BoxFuture<'_, StoreResult<Vec<Position>>>;

    fn position(
        &self,
        account: AccountId,
        symbol: Symbol,
    ) -> BoxFuture<'_, StoreResult<Option<Position>>>;

    fn put_position(
        &self,
        account: AccountId,
        position: Position,
    ) -> BoxFuture<'_, StoreResult<()>>;

    fn delete_position(
        &self,
        account: AccountId,
        symbol: Symbol,
    ) -> BoxFuture<'_, StoreResult<()>>;
}

/// Append-only trade ledger.
pub trait TradeStore: Send + Sync {
    fn append_trade(&self, trade: TradeRecord) -> BoxFuture<'_, StoreResult<()>>;

    /// Ledger entries for an account+symbol executed at or after `since`,
    /// newest first.
    fn trades_for_symbol_since(
        &self,
        account: AccountId,
        symbol: Symbol,
        since: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<TradeRecord>>>;
}

/// Per-account circuit-breaker snapshot.
pub trait BreakerStore: Send + Sync {
    fn breaker_state(
        &self,
        account: AccountId,
    ) -> BoxFuture<'_, StoreResult<Option<CircuitBreakerState>>>;

    fn put_breaker_state(
        &self,
        account: AccountId,
        state: CircuitBreakerState,
    ) -> BoxFuture<'_, StoreResult<()>>;
}

/// Umbrella trait for a backend that serves every table family.
pub trait Store: LockStore + PositionStore + TradeStore + BreakerStore {}

impl<T: LockStore + PositionStore + TradeStore + BreakerStore> Store for T {}
