//! Reconnection supervisor.
//!
//! A synchronous state machine deciding whether and when a closed session
//! reconnects. It owns no timers itself: [`RetryDecision::Retry`] carries a
//! token that the caller attaches to the timer it schedules, and
//! [`ReconnectSupervisor::begin_retry`] rejects any token that is no longer
//! current. Cancelling or resetting bumps the token, so a timer already in
//! flight can never reopen a session.
//!
//! ```text
//!            closed (n < max)             timer fires
//!   idle ───────────────────▶ awaiting-retry ─────────▶ retrying
//!    ▲                              │                      │
//!    │ opened / cancel / reset      │ cancel               │ closed (n < max) → awaiting-retry
//!    └──────────────────────────────┴──────────────────────┤
//!                                                          │ closed (n ≥ max)
//!                                                          ▼
//!                                                      exhausted
//! ```
//!
//! Backoff is linear: attempt `k` waits `k * base_delay`.

use std::fmt;
use std::time::Duration;

use chatwire_settings::ReconnectSettings;

/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay unit.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Retry budget and delay unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before the supervisor gives up.
    pub max_attempts: u32,
    /// Delay unit for linear backoff.
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.base_delay(),
        }
    }
}

/// Supervisor state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// No retry pending.
    #[default]
    Idle,
    /// A retry timer is scheduled.
    AwaitingRetry,
    /// A retry connection attempt is in flight.
    Retrying,
    /// The attempt budget is spent.
    Exhausted,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::AwaitingRetry => "awaiting-retry",
            Self::Retrying => "retrying",
            Self::Exhausted => "exhausted",
        })
    }
}

/// Outcome of a `closed` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule a reconnect after `delay`, then call
    /// [`ReconnectSupervisor::begin_retry`] with `token`.
    Retry {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
        /// Identifies the scheduled timer.
        token: u64,
    },
    /// No further automatic attempts.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Bounded, linear-backoff reconnection state machine.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    state: SupervisorState,
    attempts: u32,
    token: u64,
    pending_delay: Option<Duration>,
}

impl ReconnectSupervisor {
    /// A supervisor in `idle` with no attempts made.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: SupervisorState::Idle,
            attempts: 0,
            token: 0,
            pending_delay: None,
        }
    }

    /// The policy in effect.
    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Attempts since the last successful open or reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay of the scheduled retry while `awaiting-retry`.
    pub fn pending_delay(&self) -> Option<Duration> {
        self.pending_delay
    }

    /// Whether a retry is scheduled or in flight.
    pub fn is_mid_retry(&self) -> bool {
        matches!(
            self.state,
            SupervisorState::AwaitingRetry | SupervisorState::Retrying
        )
    }

    /// A connection opened: forget past failures.
    pub fn on_opened(&mut self) {
        self.attempts = 0;
        self.pending_delay = None;
        self.state = SupervisorState::Idle;
    }

    /// A connection closed: decide whether to retry.
    pub fn on_closed(&mut self) -> RetryDecision {
        if self.attempts >= self.policy.max_attempts {
            self.state = SupervisorState::Exhausted;
            self.pending_delay = None;
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.token += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.state = SupervisorState::AwaitingRetry;
        self.pending_delay = Some(delay);
        RetryDecision::Retry {
            attempt: self.attempts,
            delay,
            token: self.token,
        }
    }

    /// A retry timer fired. Returns `false` if `token` is stale.
    pub fn begin_retry(&mut self, token: u64) -> bool {
        if self.state != SupervisorState::AwaitingRetry || token != self.token {
            return false;
        }
        self.state = SupervisorState::Retrying;
        self.pending_delay = None;
        true
    }

    /// Skip the remaining wait of a scheduled retry and attempt now.
    ///
    /// Invalidates the pending timer. No-op unless `awaiting-retry`.
    pub fn retry_now(&mut self) -> bool {
        if self.state != SupervisorState::AwaitingRetry {
            return false;
        }
        self.token += 1;
        self.state = SupervisorState::Retrying;
        self.pending_delay = None;
        true
    }

    /// Explicit disconnect: drop any pending retry, keep the count.
    pub fn cancel(&mut self) {
        self.token += 1;
        self.pending_delay = None;
        self.state = SupervisorState::Idle;
    }

    /// Explicit connect from a settled state: start a fresh budget.
    pub fn reset(&mut self) {
        self.cancel();
        self.attempts = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn supervisor() -> ReconnectSupervisor {
        ReconnectSupervisor::new(ReconnectPolicy::default())
    }

    fn expect_retry(decision: RetryDecision) -> (u32, Duration, u64) {
        match decision {
            RetryDecision::Retry {
                attempt,
                delay,
                token,
            } => (attempt, delay, token),
            RetryDecision::Exhausted { .. } => panic!("expected a retry, got {decision:?}"),
        }
    }

    // -- policy --

    #[test]
    fn policy_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn delay_is_linear() {
        let policy = ReconnectPolicy::default();
        for k in 1..=5 {
            assert_eq!(policy.delay_for(k), Duration::from_secs(u64::from(k)));
        }
    }

    #[test]
    fn policy_from_settings() {
        let settings = ReconnectSettings {
            max_attempts: 2,
            base_delay_ms: 300,
        };
        let policy = ReconnectPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay_for(2), Duration::from_millis(600));
    }

    // -- transitions --

    #[test]
    fn starts_idle() {
        let sup = supervisor();
        assert_eq!(sup.state(), SupervisorState::Idle);
        assert_eq!(sup.attempts(), 0);
        assert!(!sup.is_mid_retry());
    }

    #[test]
    fn five_retries_then_exhausted() {
        let mut sup = supervisor();
        for k in 1..=5 {
            let (attempt, delay, token) = expect_retry(sup.on_closed());
            assert_eq!(attempt, k);
            assert_eq!(delay, Duration::from_secs(u64::from(k)));
            assert_eq!(sup.state(), SupervisorState::AwaitingRetry);
            assert_eq!(sup.pending_delay(), Some(delay));
            assert!(sup.begin_retry(token));
            assert_eq!(sup.state(), SupervisorState::Retrying);
        }
        assert_matches!(sup.on_closed(), RetryDecision::Exhausted { attempts: 5 });
        assert_eq!(sup.state(), SupervisorState::Exhausted);
        assert_eq!(sup.pending_delay(), None);
    }

    #[test]
    fn exhausted_stays_exhausted() {
        let mut sup = ReconnectSupervisor::new(ReconnectPolicy {
            max_attempts: 0,
            base_delay: Duration::from_secs(1),
        });
        assert_matches!(sup.on_closed(), RetryDecision::Exhausted { attempts: 0 });
        assert_matches!(sup.on_closed(), RetryDecision::Exhausted { attempts: 0 });
    }

    #[test]
    fn opened_resets_counter() {
        let mut sup = supervisor();
        for _ in 0..3 {
            let (_, _, token) = expect_retry(sup.on_closed());
            assert!(sup.begin_retry(token));
        }
        sup.on_opened();
        assert_eq!(sup.attempts(), 0);
        assert_eq!(sup.state(), SupervisorState::Idle);
        let (attempt, delay, _) = expect_retry(sup.on_closed());
        assert_eq!(attempt, 1);
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn cancel_invalidates_pending_token() {
        let mut sup = supervisor();
        let (_, _, token) = expect_retry(sup.on_closed());
        sup.cancel();
        assert_eq!(sup.state(), SupervisorState::Idle);
        assert_eq!(sup.attempts(), 1);
        assert!(!sup.begin_retry(token));
    }

    #[test]
    fn stale_token_rejected_after_new_schedule() {
        let mut sup = supervisor();
        let (_, _, first) = expect_retry(sup.on_closed());
        assert!(sup.begin_retry(first));
        let (_, _, second) = expect_retry(sup.on_closed());
        assert_ne!(first, second);
        assert!(!sup.begin_retry(first));
        assert!(sup.begin_retry(second));
    }

    #[test]
    fn begin_retry_requires_awaiting() {
        let mut sup = supervisor();
        let (_, _, token) = expect_retry(sup.on_closed());
        assert!(sup.begin_retry(token));
        assert!(!sup.begin_retry(token));
    }

    #[test]
    fn retry_now_skips_wait_and_keeps_count() {
        let mut sup = supervisor();
        let (_, _, token) = expect_retry(sup.on_closed());
        assert!(sup.retry_now());
        assert_eq!(sup.state(), SupervisorState::Retrying);
        assert_eq!(sup.attempts(), 1);
        assert!(!sup.begin_retry(token));
        assert!(!sup.retry_now());
    }

    #[test]
    fn reset_after_three_attempts_restarts_at_one() {
        let mut sup = supervisor();
        for _ in 0..3 {
            let (_, _, token) = expect_retry(sup.on_closed());
            assert!(sup.begin_retry(token));
        }
        sup.cancel();
        sup.reset();
        let (attempt, delay, _) = expect_retry(sup.on_closed());
        assert_eq!(attempt, 1);
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn state_display() {
        assert_eq!(SupervisorState::AwaitingRetry.to_string(), "awaiting-retry");
        assert_eq!(SupervisorState::Exhausted.to_string(), "exhausted");
    }
}
