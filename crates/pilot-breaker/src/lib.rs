//! Circuit breaker gating whether the control loop may trade an account.
//!
//! Pure functions over [`CircuitBreakerState`], no I/O. Two independent
//! failure kinds trip the breaker: decision-source failures (the model
//! cannot be reached or parsed) and realized trading losses (the model is
//! reachable but consistently losing money). Either alone must be able to
//! halt trading, which is why the counters are tracked separately.
//!
//! Once tripped, trading stays blocked until the cooldown window elapses.
//! The breaker then enters `cooldown`, a probation phase. The first
//! successful cycle promotes it back to `active`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pilot_core::{BreakerPhase, CircuitBreakerState};

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive decision-source failures that trip the breaker.
    #[serde(default = "default_ai_failure_threshold")]
    pub ai_failure_threshold: u32,
    /// Consecutive losing trades that trip the breaker.
    #[serde(default = "default_loss_threshold")]
    pub loss_threshold: u32,
    /// Minutes a tripped breaker blocks trading.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

fn default_ai_failure_threshold() -> u32 {
    3
}

fn default_loss_threshold() -> u32 {
    5
}

fn default_cooldown_minutes() -> i64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            ai_failure_threshold: default_ai_failure_threshold(),
            loss_threshold: default_loss_threshold(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

impl BreakerConfig {
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::minutes(self.cooldown_minutes)
    }
}

/// Whether the account may trade right now.
///
/// `active` and `cooldown` both permit trading. `tripped` blocks until the
/// cooldown window has elapsed; on that boundary this function transitions
/// the state to `cooldown`, not back to `active`; the account must prove
/// itself with one successful cycle first.
pub fn allow_trading(
    state: &mut CircuitBreakerState,
    config: &BreakerConfig,
    now: DateTime<Utc>,
) -> bool {
    match state.phase {
        BreakerPhase::Active | BreakerPhase::Cooldown => true,
        BreakerPhase::Tripped => {
            let Some(tripped_at) = state.tripped_at else {
                // Tripped without a timestamp should not happen; fail open
                // into probation rather than blocking the account forever.
                warn!("Tripped breaker missing tripped_at, entering cooldown");
                state.phase = BreakerPhase::Cooldown;
                return true;
            };
            if now - tripped_at >= config.cooldown() {
                info!("Breaker cooldown elapsed, entering probation");
                state.phase = BreakerPhase::Cooldown;
                true
            } else {
                false
            }
        }
    }
}

/// Record a decision-source failure. Trips the breaker at the threshold.
pub fn record_ai_failure(
    state: &mut CircuitBreakerState,
    config: &BreakerConfig,
    now: DateTime<Utc>,
) {
    state.consecutive_ai_failures += 1;
    if state.consecutive_ai_failures >= config.ai_failure_threshold {
        trip(state, now, "consecutive AI failures");
    }
}

/// Record a successful decision-source call.
///
/// Resets the AI failure counter; a `cooldown` breaker is promoted back to
/// `active` because the account has now completed a successful cycle.
pub fn record_ai_success(state: &mut CircuitBreakerState) {
    state.consecutive_ai_failures = 0;
    if state.phase == BreakerPhase::Cooldown {
        info!("Breaker probation passed, back to active");
        state.phase = BreakerPhase::Active;
        state.tripped_at = None;
    }
}

/// Record a realized trade outcome. A win resets the loss streak; a loss
/// extends it and trips the breaker at the threshold.
pub fn record_trade_outcome(
    state: &mut CircuitBreakerState,
    won: bool,
    config: &BreakerConfig,
    now: DateTime<Utc>,
) {
    if won {
        state.consecutive_losses = 0;
    } else {
        state.consecutive_losses += 1;
        if state.consecutive_losses >= config.loss_threshold {
            trip(state, now, "consecutive losses");
        }
    }
}

fn trip(state: &mut CircuitBreakerState, now: DateTime<Utc>, cause: &str) {
    if state.phase != BreakerPhase::Tripped {
        warn!(
            cause,
            ai_failures = state.consecutive_ai_failures,
            losses = state.consecutive_losses,
            "Circuit breaker tripped"
        );
        state.phase = BreakerPhase::Tripped;
        state.tripped_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BreakerConfig {
        BreakerConfig::default()
    }

    #[test]
    fn test_fresh_state_allows_trading() {
        let mut state = CircuitBreakerState::default();
        assert!(allow_trading(&mut state, &cfg(), Utc::now()));
        assert_eq!(state.phase, BreakerPhase::Active);
    }

    #[test]
    fn test_ai_failures_trip_at_threshold() {
        let mut state = CircuitBreakerState::default();
        let now = Utc::now();

        record_ai_failure(&mut state, &cfg(), now);
        record_ai_failure(&mut state, &cfg(), now);
        assert_eq!(state.phase, BreakerPhase::Active);

        record_ai_failure(&mut state, &cfg(), now);
        assert_eq!(state.phase, BreakerPhase::Tripped);
        assert_eq!(state.tripped_at, Some(now));
        assert!(!allow_trading(&mut state, &cfg(), now));
    }

    #[test]
    fn test_tripped_blocks_until_cooldown_elapses() {
        let mut state = CircuitBreakerState::default();
        let tripped_at = Utc::now();
        for _ in 0..3 {
            record_ai_failure(&mut state, &cfg(), tripped_at);
        }

        let just_before = tripped_at + Duration::minutes(59);
        assert!(!allow_trading(&mut state, &cfg(), just_before));
        assert_eq!(state.phase, BreakerPhase::Tripped);

        // On the boundary: allowed, and demoted to probation only.
        let boundary = tripped_at + Duration::minutes(60);
        assert!(allow_trading(&mut state, &cfg(), boundary));
        assert_eq!(state.phase, BreakerPhase::Cooldown);
    }

    #[test]
    fn test_success_during_cooldown_restores_active() {
        let mut state = CircuitBreakerState {
            phase: BreakerPhase::Cooldown,
            consecutive_ai_failures: 3,
            consecutive_losses: 0,
            tripped_at: Some(Utc::now() - Duration::hours(2)),
        };

        record_ai_success(&mut state);
        assert_eq!(state.phase, BreakerPhase::Active);
        assert_eq!(state.consecutive_ai_failures, 0);
        assert!(state.tripped_at.is_none());
    }

    #[test]
    fn test_success_while_active_only_resets_counter() {
        let mut state = CircuitBreakerState::default();
        record_ai_failure(&mut state, &cfg(), Utc::now());
        assert_eq!(state.consecutive_ai_failures, 1);

        record_ai_success(&mut state);
        assert_eq!(state.consecutive_ai_failures, 0);
        assert_eq!(state.phase, BreakerPhase::Active);
    }

    #[test]
    fn test_losses_trip_independently_of_ai_failures() {
        let mut state = CircuitBreakerState::default();
        let now = Utc::now();

        for _ in 0..4 {
            record_trade_outcome(&mut state, false, &cfg(), now);
        }
        assert_eq!(state.phase, BreakerPhase::Active);

        record_trade_outcome(&mut state, false, &cfg(), now);
        assert_eq!(state.phase, BreakerPhase::Tripped);
        assert_eq!(state.consecutive_losses, 5);
    }

    #[test]
    fn test_win_resets_loss_streak() {
        let mut state = CircuitBreakerState::default();
        let now = Utc::now();

        for _ in 0..4 {
            record_trade_outcome(&mut state, false, &cfg(), now);
        }
        record_trade_outcome(&mut state, true, &cfg(), now);
        assert_eq!(state.consecutive_losses, 0);

        // A fresh streak starts from zero.
        record_trade_outcome(&mut state, false, &cfg(), now);
        assert_eq!(state.consecutive_losses, 1);
        assert_eq!(state.phase, BreakerPhase::Active);
    }

    #[test]
    fn test_second_trip_keeps_original_timestamp() {
        let mut state = CircuitBreakerState::default();
        let first = Utc::now();
        for _ in 0..3 {
            record_ai_failure(&mut state, &cfg(), first);
        }

        let later = first + Duration::minutes(5);
        record_ai_failure(&mut state, &cfg(), later);
        assert_eq!(state.tripped_at, Some(first));
    }

    #[test]
    fn test_tripped_without_timestamp_fails_open_to_cooldown() {
        let mut state = CircuitBreakerState {
            phase: BreakerPhase::Tripped,
            consecutive_ai_failures: 3,
            consecutive_losses: 0,
            tripped_at: None,
        };

        assert!(allow_trading(&mut state, &cfg(), Utc::now()));
        assert_eq!(state.phase, BreakerPhase::Cooldown);
    }
}
