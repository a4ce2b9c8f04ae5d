//! In-memory store backed by DashMap.
//!
//! Reference implementation used by tests and single-process deployments.
//! Each method is individually atomic, but no cross-call transactionality
//! is provided; the lock manager's insert-then-verify protocol is designed
//! for exactly that weakness.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use pilot_core::{
    AccountId, CircuitBreakerState, Position, Side, Symbol, SymbolTradeLock, TradeRecord,
    TradingLock,
};

use crate::traits::{BoxFuture, BreakerStore, LockStore, PositionStore, TradeStore};
use crate::StoreResult;

/// DashMap-backed store.
#[derive(Default)]
pub struct MemStore {
    trading_locks: DashMap<AccountId, TradingLock>,
    /// token -> lock row.
    symbol_locks: DashMap<String, SymbolTradeLock>,
    positions: DashMap<(AccountId, Symbol), Position>,
    trades: RwLock<Vec<TradeRecord>>,
    breakers: DashMap<AccountId, CircuitBreakerState>,
    /// Insertion sequence for symbol-lock tie-breaking.
    seq: AtomicU64,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total ledger length, for test assertions.
    #[must_use]
    pub fn trade_count(&self) -> usize {
        self.trades.read().len()
    }

    /// Full ledger snapshot, for test assertions.
    #[must_use]
    pub fn all_trades(&self) -> Vec<TradeRecord> {
        self.trades.read().clone()
    }

    /// Number of symbol-lock rows currently stored, expired or not.
    #[must_use]
    pub fn symbol_lock_count(&self) -> usize {
        self.symbol_locks.len()
    }
}

impl LockStore for MemStore {
    fn trading_lock(&self, account: AccountId) -> BoxFuture<'_, StoreResult<Option<TradingLock>>> {
        Box::pin(async move { Ok(self.trading_locks.get(&account).map(|r| r.clone())) })
    }

    fn insert_trading_lock(&self, lock: TradingLock) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.trading_locks.insert(lock.account_id.clone(), lock);
            Ok(())
        })
    }

    fn delete_trading_lock(
        &self,
        account: AccountId,
        lease_id: String,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.trading_locks
                .remove_if(&account, |_, lock| lock.lease_id == lease_id);
            Ok(())
        })
    }

    fn symbol_locks(
        &self,
        account: AccountId,
        symbol: Symbol,
        side: Side,
    ) -> BoxFuture<'_, StoreResult<Vec<SymbolTradeLock>>> {
        Box::pin(async move {
            Ok(self
                .symbol_locks
                .iter()
                .filter(|r| {
                    let lock = r.value();
                    lock.account_id == account && lock.symbol == symbol && lock.side == side
                })
                .map(|r| r.value().clone())
                .collect())
        })
    }

    fn insert_symbol_lock(
        &self,
        mut lock: SymbolTradeLock,
    ) -> BoxFuture<'_, StoreResult<SymbolTradeLock>> {
        Box::pin(async move {
            lock.seq = self.seq.fetch_add(1, Ordering::SeqCst);
            self.symbol_locks.insert(lock.token.clone(), lock.clone());
            Ok(lock)
        })
    }

    fn delete_symbol_lock(&self, token: String) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.symbol_locks.remove(&token);
            Ok(())
        })
    }

    fn sweep_expired_locks(&self, now: DateTime<Utc>) -> BoxFuture<'_, StoreResult<usize>> {
        Box::pin(async move {
            let before = self.trading_locks.len() + self.symbol_locks.len();
            self.trading_locks.retain(|_, lock| !lock.is_expired(now));
            self.symbol_locks.retain(|_, lock| !lock.is_expired(now));
            Ok(before - (self.trading_locks.len() + self.symbol_locks.len()))
        })
    }
}

impl PositionStore for MemStore {
    fn positions(&self, account: AccountId) -> BoxFuture<'_, StoreResult<Vec<Position>>> {
        Box::pin(async move {
            Ok(self
                .positions
                .iter()
                .filter(|r| r.key().0 == account)
                .map(|r| r.value().clone())
                .collect())
        })
    }

    fn position(
        &self,
        account: AccountId,
        symbol: Symbol,
    ) -> BoxFuture<'_, StoreResult<Option<Position>>> {
        Box::pin(async move {
            Ok(self
                .positions
                .get(&(account, symbol))
                .map(|r| r.value().clone()))
        })
    }

    fn put_position(
        &self,
        account: AccountId,
        position: Position,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.positions
                .insert((account, position.symbol.clone()), position);
            Ok(())
        })
    }

    fn delete_position(
        &self,
        account: AccountId,
        symbol: Symbol,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.positions.remove(&(account, symbol));
            Ok(())
        })
    }
}

impl TradeStore for MemStore {
    fn append_trade(&self, trade: TradeRecord) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.trades.write().push(trade);
            Ok(())
        })
    }

    fn trades_for_symbol_since(
        &self,
        account: AccountId,
        symbol: Symbol,
        since: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<TradeRecord>>> {
        Box::pin(async move {
            let mut rows: Vec<TradeRecord> = self
                .trades
                .read()
                .iter()
                .filter(|t| t.account_id == account && t.symbol == symbol && t.executed_at >= since)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
            Ok(rows)
        })
    }
}

impl BreakerStore for MemStore {
    fn breaker_state(
        &self,
        account: AccountId,
    ) -> BoxFuture<'_, StoreResult<Option<CircuitBreakerState>>> {
        Box::pin(async move { Ok(self.breakers.get(&account).map(|r| r.clone())) })
    }

    fn put_breaker_state(
        &self,
        account: AccountId,
        state: CircuitBreakerState,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.breakers.insert(account, state);
            Ok(())
        })
    }
}
