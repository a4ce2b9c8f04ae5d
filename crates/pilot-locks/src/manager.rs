//! Lease acquisition and race resolution.

use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use pilot_core::{AccountId, Side, Symbol, SymbolTradeLock, TradingLock};
use pilot_store::{LockStore, StoreError};

use crate::Clock;

/// Trading lease lifetime. Long enough for one full control-loop
/// iteration, short enough that a crashed process frees the account
/// without manual cleanup.
pub const TRADING_LOCK_TTL_SECS: i64 = 120;

/// Symbol trade lease lifetime.
pub const SYMBOL_LOCK_TTL_SECS: i64 = 120;

/// Infrastructure failure while talking to the lock store.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock store error: {0}")]
    Store(#[from] StoreError),
}

/// Why a trading lock was not granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradingLockRejection {
    /// A non-expired lease already exists for the account.
    Held {
        lease_id: String,
        remaining_secs: i64,
    },
}

/// Why a symbol trade lock was not granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolLockRejection {
    /// A non-expired lease already existed before we inserted ours.
    SymbolLocked { remaining_secs: i64 },
    /// We inserted a row but another concurrent caller won the verify step.
    RaceConditionLost,
}

impl std::fmt::Display for SymbolLockRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SymbolLocked { remaining_secs } => {
                write!(f, "symbol_locked ({remaining_secs}s remaining)")
            }
            Self::RaceConditionLost => write!(f, "race_condition_lost"),
        }
    }
}

/// Granted per-account lease. Release with
/// [`LockManager::release_trading_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingLease {
    pub account_id: AccountId,
    pub lease_id: String,
}

/// Granted per-symbol-per-side lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolLease {
    pub token: String,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
}

/// Acquires and releases both lease kinds against the shared store.
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Acquire the per-account trading lock.
    ///
    /// Inserts a lease only if no non-expired lease exists for the
    /// account; otherwise reports the existing lease id.
    pub async fn acquire_trading_lock(
        &self,
        account: &AccountId,
    ) -> Result<Result<TradingLease, TradingLockRejection>, LockError> {
        let now = self.clock.now();

        if let Some(existing) = self.store.trading_lock(account.clone()).await? {
            if !existing.is_expired(now) {
                debug!(
                    account = %account,
                    lease_id = %existing.lease_id,
                    "Trading lock held"
                );
                return Ok(Err(TradingLockRejection::Held {
                    remaining_secs: (existing.expires_at - now).num_seconds().max(0),
                    lease_id: existing.lease_id,
                }));
            }
            // Stale lease from a crashed run; reap it in passing.
            self.store
                .delete_trading_lock(account.clone(), existing.lease_id)
                .await?;
        }

        let lease_id = Uuid::new_v4().to_string();
        self.store
            .insert_trading_lock(TradingLock {
                account_id: account.clone(),
                lease_id: lease_id.clone(),
                acquired_at: now,
                expires_at: now + Duration::seconds(TRADING_LOCK_TTL_SECS),
            })
            .await?;

        Ok(Ok(TradingLease {
            account_id: account.clone(),
            lease_id,
        }))
    }

    /// Release a trading lease. No-op if the row is already gone.
    pub async fn release_trading_lock(&self, lease: &TradingLease) -> Result<(), LockError> {
        self.store
            .delete_trading_lock(lease.account_id.clone(), lease.lease_id.clone())
            .await?;
        Ok(())
    }

    /// Acquire the per-symbol-per-side trade lock under the
    /// insert-then-verify protocol.
    ///
    /// 1. Delete already-expired leases for this key.
    /// 2. Fail with remaining seconds if a non-expired lease exists.
    /// 3. Insert a new lease with a globally unique token.
    /// 4. Re-read all non-expired leases for the key. If more than one
    ///    exists, the row with the earliest `attempted_at` wins (ties by
    ///    store insertion sequence); the loser deletes its own row, the
    ///    winner deletes every other row.
    pub async fn acquire_symbol_lock(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        side: Side,
    ) -> Result<Result<SymbolLease, SymbolLockRejection>, LockError> {
        let now = self.clock.now();

        // Step 1: reap expired rows for this key.
        let rows = self
            .store
            .symbol_locks(account.clone(), symbol.clone(), side)
            .await?;
        for row in rows.iter().filter(|r| r.is_expired(now)) {
            self.store.delete_symbol_lock(row.token.clone()).await?;
        }

        // Step 2: a live lease means someone is already opening this key.
        if let Some(live) = rows.iter().find(|r| !r.is_expired(now)) {
            return Ok(Err(SymbolLockRejection::SymbolLocked {
                remaining_secs: live.remaining_secs(now),
            }));
        }

        // Step 3: insert our own row.
        let token = Uuid::new_v4().to_string();
        let mine = self
            .store
            .insert_symbol_lock(SymbolTradeLock {
                token: token.clone(),
                account_id: account.clone(),
                symbol: symbol.clone(),
                side,
                attempted_at: now,
                expires_at: now + Duration::seconds(SYMBOL_LOCK_TTL_SECS),
                seq: 0,
            })
            .await?;

        // Step 4: re-read and resolve any race deterministically.
        let contenders: Vec<SymbolTradeLock> = self
            .store
            .symbol_locks(account.clone(), symbol.clone(), side)
            .await?
            .into_iter()
            .filter(|r| !r.is_expired(self.clock.now()))
            .collect();

        // A winner that already settled the race may have deleted our row
        // between our insert and this read.
        if !contenders.iter().any(|r| r.token == mine.token) {
            debug!(account = %account, symbol = %symbol, "Symbol lock row reaped by race winner");
            return Ok(Err(SymbolLockRejection::RaceConditionLost));
        }

        if contenders.len() > 1 {
            let winner = pick_winner(&contenders).cloned();
            match winner {
                Some(winner) if winner.token == mine.token => {
                    for other in contenders.iter().filter(|r| r.token != mine.token) {
                        self.store.delete_symbol_lock(other.token.clone()).await?;
                    }
                    warn!(
                        account = %account,
                        symbol = %symbol,
                        contenders = contenders.len(),
                        "Symbol lock race resolved in our favor"
                    );
                }
                _ => {
                    self.store.delete_symbol_lock(mine.token).await?;
                    debug!(account = %account, symbol = %symbol, "Symbol lock race lost");
                    return Ok(Err(SymbolLockRejection::RaceConditionLost));
                }
            }
        }

        Ok(Ok(SymbolLease {
            token,
            account_id: account.clone(),
            symbol: symbol.clone(),
            side,
        }))
    }

    /// Release a symbol lease. No-op if the row is already gone.
    pub async fn release_symbol_lock(&self, lease: &SymbolLease) -> Result<(), LockError> {
        self.store.delete_symbol_lock(lease.token.clone()).await?;
        Ok(())
    }

    /// Delete every lease past its expiry. Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<usize, LockError> {
        let removed = self.store.sweep_expired_locks(self.clock.now()).await?;
        if removed > 0 {
            debug!(removed, "Swept expired leases");
        }
        Ok(removed)
    }
}

/// Deterministic winner among racing lease rows: earliest `attempted_at`,
/// ties broken by store insertion sequence.
fn pick_winner(rows: &[SymbolTradeLock]) -> Option<&SymbolTradeLock> {
    rows.iter().min_by_key(|r| (r.attempted_at, r.seq))
}
