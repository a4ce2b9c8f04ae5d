//! Time-boxed lease rows backing the lock manager.
//!
//! Both lease kinds expire on their own so a crashed process cannot
//! deadlock an account; a periodic sweep deletes rows past `expires_at`.

use crate::{AccountId, Side, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-account trading lease. At most one non-expired row per account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingLock {
    pub account_id: AccountId,
    /// Globally unique lease token.
    pub lease_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TradingLock {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Per-symbol-per-side trade lease guarding duplicate concurrent entries.
///
/// Racing callers may insert several rows for the same key; the lock
/// manager's verify step picks exactly one winner, ordered by
/// (`attempted_at`, `seq`). `seq` is stamped by the store at insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTradeLock {
    /// Globally unique lease token, also the row id.
    pub token: String,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub attempted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Store-assigned insertion sequence, used to break `attempted_at` ties.
    pub seq: u64,
}

impl SymbolTradeLock {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds until expiry, clamped at zero.
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}
