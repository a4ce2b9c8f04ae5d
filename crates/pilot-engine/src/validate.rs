//! Pre-open validation pipeline.
//!
//! Nine ordered checks; the first failure aborts the open with a labeled
//! reason used in logs, ledger rows and tests. Exchange state is checked
//! before local state because the exchange is authoritative. The only
//! side effects are lock-manager calls: an acquired symbol lease is
//! released again when a later check fails.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use pilot_core::{AccountId, Side, Symbol, TradeAction, TradeLimits, Usd};
use pilot_exchange::ExchangeClient;
use pilot_locks::{LockManager, SymbolLease, SymbolLockRejection};
use pilot_store::{PositionStore, TradeStore};

use crate::cooldown::RecentTradeCache;
use crate::error::EngineResult;

/// Why an open was refused. `Display` gives the stable label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRejection {
    SymbolLocked { remaining_secs: i64 },
    RaceConditionLost,
    ExchangePositionExists,
    PendingOrderExists,
    RecentlyTradedMemory,
    DuplicateLocalPosition,
    MaxPositionsReached { open: usize },
    MaxDirectionPositionsReached { open: usize },
    PositionTooSmall { minimum: Usd },
    DuplicateGuard,
    SymbolCooldown,
}

impl std::fmt::Display for OpenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::SymbolLocked { .. } => "symbol_locked",
            Self::RaceConditionLost => "race_condition_lost",
            Self::ExchangePositionExists => "exchange_position_exists",
            Self::PendingOrderExists => "pending_order_exists",
            Self::RecentlyTradedMemory => "recently_traded_memory",
            Self::DuplicateLocalPosition => "duplicate_local_position",
            Self::MaxPositionsReached { .. } => "max_positions_reached",
            Self::MaxDirectionPositionsReached { .. } => "max_direction_positions_reached",
            Self::PositionTooSmall { .. } => "position_too_small",
            Self::DuplicateGuard => "duplicate_guard",
            Self::SymbolCooldown => "symbol_cooldown",
        };
        f.write_str(label)
    }
}

/// A validated open: the symbol lease the executor must release when done.
#[derive(Debug)]
pub struct ValidatedOpen {
    pub lease: SymbolLease,
}

pub struct OpenValidator {
    locks: Arc<LockManager>,
    exchange: Arc<dyn ExchangeClient>,
    positions: Arc<dyn PositionStore>,
    trades: Arc<dyn TradeStore>,
    recent: Arc<RecentTradeCache>,
    limits: TradeLimits,
}

impl OpenValidator {
    pub fn new(
        locks: Arc<LockManager>,
        exchange: Arc<dyn ExchangeClient>,
        positions: Arc<dyn PositionStore>,
        trades: Arc<dyn TradeStore>,
        recent: Arc<RecentTradeCache>,
        limits: TradeLimits,
    ) -> Self {
        Self {
            locks,
            exchange,
            positions,
            trades,
            recent,
            limits,
        }
    }

    /// Run the full pipeline for one open intent.
    pub async fn validate_open(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        side: Side,
        size_usd: Usd,
        account_value: Usd,
        now: DateTime<Utc>,
    ) -> EngineResult<Result<ValidatedOpen, OpenRejection>> {
        // 1. Symbol+side lock.
        let lease = match self.locks.acquire_symbol_lock(account, symbol, side).await? {
            Ok(lease) => lease,
            Err(SymbolLockRejection::SymbolLocked { remaining_secs }) => {
                return Ok(Err(OpenRejection::SymbolLocked { remaining_secs }));
            }
            Err(SymbolLockRejection::RaceConditionLost) => {
                return Ok(Err(OpenRejection::RaceConditionLost));
            }
        };

        match self
            .checks_after_lock(account, symbol, side, size_usd, account_value, now)
            .await
        {
            Ok(None) => Ok(Ok(ValidatedOpen { lease })),
            Ok(Some(rejection)) => {
                info!(
                    account = %account,
                    symbol = %symbol,
                    reason = %rejection,
                    "Open rejected"
                );
                self.locks.release_symbol_lock(&lease).await?;
                Ok(Err(rejection))
            }
            Err(err) => {
                self.locks.release_symbol_lock(&lease).await?;
                Err(err)
            }
        }
    }

    /// Checks 2-9. `None` means the open may proceed.
    async fn checks_after_lock(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        side: Side,
        size_usd: Usd,
        account_value: Usd,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<OpenRejection>> {
        // 2. Exchange position check (authoritative).
        let remote = self.exchange.positions(account.clone()).await?;
        if remote.iter().any(|p| &p.symbol == symbol && p.is_open()) {
            return Ok(Some(OpenRejection::ExchangePositionExists));
        }

        // 3. Exchange pending-order check (authoritative).
        let orders = self
            .exchange
            .open_orders(account.clone(), Some(symbol.clone()))
            .await?;
        if !orders.is_empty() {
            return Ok(Some(OpenRejection::PendingOrderExists));
        }

        // 4. Process-local fast path.
        if self.recent.recently_opened(symbol, side, now) {
            return Ok(Some(OpenRejection::RecentlyTradedMemory));
        }

        // 5. Local duplicate.
        let local = self.positions.positions(account.clone()).await?;
        if local.iter().any(|p| &p.symbol == symbol) {
            return Ok(Some(OpenRejection::DuplicateLocalPosition));
        }

        // 6. Total position cap.
        if local.len() >= self.limits.max_open_positions {
            return Ok(Some(OpenRejection::MaxPositionsReached { open: local.len() }));
        }

        // 7. Same-direction cap.
        let same_direction = local.iter().filter(|p| p.side == side).count();
        if same_direction >= self.limits.max_same_direction {
            return Ok(Some(OpenRejection::MaxDirectionPositionsReached {
                open: same_direction,
            }));
        }

        // 8. Minimum size.
        let minimum = self.limits.min_position_size(account_value);
        if size_usd < minimum {
            return Ok(Some(OpenRejection::PositionTooSmall { minimum }));
        }

        // 9. Ledger cooldowns. The 60s guard targets repeated same-side
        // opens; the 5-minute cooldown covers any activity on the symbol.
        let cooldown_start =
            now - Duration::seconds(self.limits.symbol_cooldown_secs as i64);
        let recent_trades = self
            .trades
            .trades_for_symbol_since(account.clone(), symbol.clone(), cooldown_start)
            .await?;

        let guard_start = now - Duration::seconds(self.limits.duplicate_guard_secs as i64);
        if recent_trades
            .iter()
            .any(|t| t.action == TradeAction::Open && t.side == side && t.executed_at >= guard_start)
        {
            return Ok(Some(OpenRejection::DuplicateGuard));
        }
        if !recent_trades.is_empty() {
            return Ok(Some(OpenRejection::SymbolCooldown));
        }

        debug!(account = %account, symbol = %symbol, "Open validation passed");
        Ok(None)
    }
}
