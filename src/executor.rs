use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::connection::{HttpTransport, Transport};
use crate::error::{BluosError, Result};
use crate::protocol::{DeviceRequest, RawResponse, Response};
use crate::rate_limiter::{RateLimiter, DEFAULT_INTERVAL};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::Device;
use crate::validate;
use std::sync::Arc;
use std::time::Duration;

/// Default cap on response bodies
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Executor tunables
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    pub rate_limit_interval: Duration,
    pub max_response_bytes: usize,
    /// Circuit breaking is off unless configured
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            rate_limit_interval: DEFAULT_INTERVAL,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            circuit_breaker: None,
        }
    }
}

/// Issues calls to one device at a time with validation, rate limiting,
/// timeouts, retry and an optional circuit breaker
///
/// Cloning is cheap; clones share the rate limiter and breaker state.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    breaker: Option<Arc<CircuitBreaker>>,
    policy: RetryPolicy,
    max_response_bytes: usize,
}

impl RequestExecutor {
    /// Executor over the built-in HTTP transport
    pub fn http(config: ExecutorConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?), config))
    }

    pub fn new(transport: Arc<dyn Transport>, config: ExecutorConfig) -> Self {
        Self {
            transport,
            limiter: Arc::new(RateLimiter::new(config.rate_limit_interval)),
            breaker: config.circuit_breaker.map(|c| Arc::new(CircuitBreaker::new(c))),
            policy: config.retry,
            max_response_bytes: config.max_response_bytes,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `request` against `device`
    ///
    /// Succeeds only on a 2xx status. The returned [`Response`] records the
    /// attempts made and the backoff applied between them.
    pub async fn execute(&self, device: &Device, request: &DeviceRequest, timeout: Duration) -> Result<Response> {
        let timeout = validate::validate_timeout(timeout)?;
        validate::check_device_address(device.address)?;

        let mut state = self.policy.start();
        loop {
            if let Some(breaker) = &self.breaker {
                breaker.check(device.address).await?;
            }

            self.limiter.acquire(device.address).await;
            state.begin_attempt();

            let outcome = self.attempt(device, request, timeout).await;
            match outcome {
                Ok(raw) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success(device.address).await;
                    }
                    let attempts = state.attempts();
                    return Ok(Response {
                        status: raw.status,
                        body: raw.body,
                        attempts,
                        backoff: state.into_delays(),
                    });
                }
                Err(err) => {
                    if let Some(breaker) = &self.breaker {
                        // Permanent errors still mean the device answered
                        if err.retry_class().is_some() {
                            breaker.record_failure(device.address).await;
                        } else {
                            breaker.record_success(device.address).await;
                        }
                    }
                    match state.next(&err, request.idempotent) {
                        RetryDecision::Retry { delay } => {
                            tracing::warn!(
                                "{} {} attempt {} failed: {}, retrying in {:?}",
                                device.address,
                                request.endpoint.path(),
                                state.attempts(),
                                err,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            tracing::debug!(
                                "{} {} failed after {} attempt(s): {}",
                                device.address,
                                request.endpoint.path(),
                                state.attempts(),
                                err
                            );
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    async fn attempt(&self, device: &Device, request: &DeviceRequest, timeout: Duration) -> Result<RawResponse> {
        let call = self
            .transport
            .send(device.address, device.port, request, timeout, self.max_response_bytes);
        let raw = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result?,
            Err(_) => return Err(BluosError::Timeout(timeout)),
        };

        if raw.body.len() > self.max_response_bytes {
            return Err(BluosError::ResponseTooLarge {
                limit: self.max_response_bytes,
            });
        }
        if !raw.is_success() {
            return Err(BluosError::Status { status: raw.status });
        }
        Ok(raw)
    }
}
