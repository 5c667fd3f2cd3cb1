//! Optional per-device circuit breaker
//!
//! After `failure_threshold` consecutive failures a device is skipped for
//! `cooldown`; calls fail fast with [`BluosError::CircuitOpen`]. Once the
//! cooldown passes a single trial call is let through, and its outcome closes
//! or reopens the circuit. A trial call that never reports back (it was
//! cancelled) is replaced by a new one after another cooldown.

use crate::error::{BluosError, Result};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Circuit {
    Closed { failures: u32 },
    Open { until: Instant },
    /// A trial call has been in flight since `since`
    HalfOpen { since: Instant },
}

impl Default for Circuit {
    fn default() -> Self {
        Circuit::Closed { failures: 0 }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<Ipv4Addr, Circuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Ask permission to call `address`
    pub async fn check(&self, address: Ipv4Addr) -> Result<()> {
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits.entry(address).or_default();
        match *circuit {
            Circuit::Closed { .. } => Ok(()),
            Circuit::Open { until } if Instant::now() >= until => {
                tracing::info!("Circuit for {} half-open, allowing one call", address);
                *circuit = Circuit::HalfOpen { since: Instant::now() };
                Ok(())
            }
            Circuit::HalfOpen { since } if since.elapsed() >= self.config.cooldown => {
                tracing::warn!("Half-open call to {} never completed, allowing another", address);
                *circuit = Circuit::HalfOpen { since: Instant::now() };
                Ok(())
            }
            Circuit::Open { .. } | Circuit::HalfOpen { .. } => Err(BluosError::CircuitOpen(address)),
        }
    }

    pub async fn record_success(&self, address: Ipv4Addr) {
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits.entry(address).or_default();
        if matches!(circuit, Circuit::HalfOpen { .. }) {
            tracing::info!("Circuit for {} closed", address);
        }
        *circuit = Circuit::Closed { failures: 0 };
    }

    pub async fn record_failure(&self, address: Ipv4Addr) {
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits.entry(address).or_default();
        let failures = match *circuit {
            Circuit::Closed { failures } => failures + 1,
            Circuit::HalfOpen { .. } => self.config.failure_threshold,
            Circuit::Open { .. } => return,
        };
        if failures >= self.config.failure_threshold {
            tracing::warn!("Circuit for {} opened after {} failure(s)", address, failures);
            *circuit = Circuit::Open {
                until: Instant::now() + self.config.cooldown,
            };
        } else {
            *circuit = Circuit::Closed { failures };
        }
    }

    pub async fn state(&self, address: Ipv4Addr) -> CircuitState {
        match self.circuits.lock().await.get(&address).copied().unwrap_or_default() {
            Circuit::Closed { .. } => CircuitState::Closed,
            Circuit::Open { .. } => CircuitState::Open,
            Circuit::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 40);

    fn breaker(cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown,
        })
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let breaker = breaker(Duration::from_secs(60));
        breaker.record_failure(ADDR).await;
        assert!(breaker.check(ADDR).await.is_ok());
        breaker.record_failure(ADDR).await;

        assert_eq!(breaker.state(ADDR).await, CircuitState::Open);
        assert!(matches!(breaker.check(ADDR).await, Err(BluosError::CircuitOpen(a)) if a == ADDR));
        assert!(breaker.check(Ipv4Addr::new(192, 168, 1, 41)).await.is_ok());
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = breaker(Duration::from_secs(60));
        breaker.record_failure(ADDR).await;
        breaker.record_success(ADDR).await;
        breaker.record_failure(ADDR).await;
        assert_eq!(breaker.state(ADDR).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_allows_one_call() {
        let breaker = breaker(Duration::from_millis(10));
        breaker.record_failure(ADDR).await;
        breaker.record_failure(ADDR).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(breaker.check(ADDR).await.is_ok());
        assert_eq!(breaker.state(ADDR).await, CircuitState::HalfOpen);
        assert!(breaker.check(ADDR).await.is_err());

        breaker.record_failure(ADDR).await;
        assert_eq!(breaker.state(ADDR).await, CircuitState::Open);
    }

    #[tokio::test]
    async fn abandoned_half_open_call_is_replaced_after_cooldown() {
        let breaker = breaker(Duration::from_millis(30));
        breaker.record_failure(ADDR).await;
        breaker.record_failure(ADDR).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // The trial call is let through but its outcome is never recorded
        assert!(breaker.check(ADDR).await.is_ok());
        assert!(breaker.check(ADDR).await.is_err());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.check(ADDR).await.is_ok());
        assert_eq!(breaker.state(ADDR).await, CircuitState::HalfOpen);

        breaker.record_success(ADDR).await;
        assert_eq!(breaker.state(ADDR).await, CircuitState::Closed);
    }
}
