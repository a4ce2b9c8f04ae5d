//! Persisted circuit-breaker snapshot, one per account.
//!
//! The transition rules live in `pilot-breaker` as pure functions over
//! this state; this crate only defines the row so the store can hold it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Breaker phase.
///
/// `Active` and `Cooldown` both permit trading. `Cooldown` is probation:
/// the first successful cycle after a trip promotes back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerPhase {
    #[default]
    Active,
    Cooldown,
    Tripped,
}

impl fmt::Display for BreakerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerPhase::Active => write!(f, "active"),
            BreakerPhase::Cooldown => write!(f, "cooldown"),
            BreakerPhase::Tripped => write!(f, "tripped"),
        }
    }
}

/// Per-account breaker state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub phase: BreakerPhase,
    /// Consecutive decision-source failures.
    pub consecutive_ai_failures: u32,
    /// Consecutive losing trades.
    pub consecutive_losses: u32,
    /// When the breaker last tripped, if it is (or was) tripped.
    pub tripped_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.phase == BreakerPhase::Tripped
    }
}
