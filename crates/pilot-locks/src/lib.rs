//! Time-boxed leases guarding concurrent control-loop invocations.
//!
//! Two lease kinds, both backed by the shared store:
//! - the per-account trading lock, guaranteeing at most one in-flight
//!   control-loop iteration per account
//! - the per-symbol-per-side trade lock, guaranteeing at most one
//!   in-flight open attempt per symbol+side per account
//!
//! The symbol lock tolerates racing callers without requiring the store to
//! support atomic compare-and-swap: every caller inserts its own row, then
//! re-reads all rows for the key and deterministically picks one winner.

pub mod clock;
pub mod manager;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{
    LockError, LockManager, SymbolLease, SymbolLockRejection, TradingLease, TradingLockRejection,
    SYMBOL_LOCK_TTL_SECS, TRADING_LOCK_TTL_SECS,
};
