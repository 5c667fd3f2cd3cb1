//! Retry policy as an explicit state machine
//!
//! [`RetryState`] decides after each failed attempt whether to try again and
//! how long to wait, without doing any I/O itself.

use crate::error::{BluosError, RetryClass};
use std::collections::HashSet;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Error classes considered transient
    pub retryable: HashSet<RetryClass>,
    /// Whether non-idempotent requests may be repeated
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            retryable: [RetryClass::Timeout, RetryClass::Connection, RetryClass::ServerError]
                .into_iter()
                .collect(),
            retry_non_idempotent: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn start(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempts: 0,
            delays: Vec::new(),
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Progress through one request's attempts
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    delays: Vec<Duration>,
}

impl RetryState<'_> {
    /// Record that an attempt is being made
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Decide what follows a failed attempt
    pub fn next(&mut self, err: &BluosError, idempotent: bool) -> RetryDecision {
        if self.attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp;
        }
        if !idempotent && !self.policy.retry_non_idempotent {
            return RetryDecision::GiveUp;
        }
        match err.retry_class() {
            Some(class) if self.policy.retryable.contains(&class) => {
                let delay = self.policy.delay_for(self.attempts);
                self.delays.push(delay);
                RetryDecision::Retry { delay }
            }
            _ => RetryDecision::GiveUp,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Backoff delays decided so far
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn into_delays(self) -> Vec<Duration> {
        self.delays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> BluosError {
        BluosError::Timeout(Duration::from_secs(1))
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(64), Duration::from_secs(10));
    }

    #[test]
    fn transient_errors_retry_until_ceiling() {
        let policy = RetryPolicy::default();
        let mut state = policy.start();

        state.begin_attempt();
        assert!(matches!(state.next(&timeout(), true), RetryDecision::Retry { .. }));
        state.begin_attempt();
        assert!(matches!(
            state.next(&BluosError::Status { status: 503 }, true),
            RetryDecision::Retry { .. }
        ));
        state.begin_attempt();
        assert_eq!(state.next(&timeout(), true), RetryDecision::GiveUp);

        assert_eq!(state.attempts(), 3);
        let delays = state.into_delays();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] <= delays[1]);
    }

    #[test]
    fn permanent_errors_give_up_immediately() {
        let policy = RetryPolicy::default();
        for err in [
            BluosError::Status { status: 404 },
            BluosError::Validation("bad".into()),
            BluosError::Protocol("bad".into()),
            BluosError::CircuitOpen(std::net::Ipv4Addr::new(10, 0, 0, 1)),
        ] {
            let mut state = policy.start();
            state.begin_attempt();
            assert_eq!(state.next(&err, true), RetryDecision::GiveUp, "{}", err);
        }
    }

    #[test]
    fn non_idempotent_requests_are_not_retried_by_default() {
        let policy = RetryPolicy::default();
        let mut state = policy.start();
        state.begin_attempt();
        assert_eq!(state.next(&timeout(), false), RetryDecision::GiveUp);

        let permissive = RetryPolicy {
            retry_non_idempotent: true,
            ..RetryPolicy::default()
        };
        let mut state = permissive.start();
        state.begin_attempt();
        assert!(matches!(state.next(&timeout(), false), RetryDecision::Retry { .. }));
    }

    #[test]
    fn retryable_set_is_respected() {
        let policy = RetryPolicy {
            retryable: [RetryClass::Timeout].into_iter().collect(),
            ..RetryPolicy::default()
        };
        let mut state = policy.start();
        state.begin_attempt();
        assert_eq!(
            state.next(&BluosError::Status { status: 500 }, true),
            RetryDecision::GiveUp
        );
    }
}
