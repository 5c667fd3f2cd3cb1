//! Runtime settings
//!
//! Settings arrive as already-resolved values; loading them from files or the
//! environment is the caller's job.

use crate::cache::{default_cache_path, DEFAULT_TTL, MAX_TTL};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::Result;
use crate::executor::{ExecutorConfig, DEFAULT_MAX_RESPONSE_BYTES};
use crate::mdns::DEFAULT_SERVICE_TYPE;
use crate::retry::RetryPolicy;
use crate::types::DiscoveryMethod;
use crate::validate::{self, MAX_TIMEOUT, MAX_VOLUME, MIN_TIMEOUT};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Volume applied by a volume reset
pub const DEFAULT_SAFE_VOLUME: u8 = 14;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// mDNS service type to browse
    pub service_type: String,

    #[serde(deserialize_with = "lenient_method")]
    pub discovery_method: DiscoveryMethod,

    pub discovery_timeout_secs: u64,

    /// Zero disables cache hits
    pub cache_ttl_secs: u64,

    pub cache_path: PathBuf,

    /// Minimum spacing between calls to one device
    pub rate_limit_ms: u64,

    /// Attempts per request including the first
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    pub request_timeout_secs: u64,

    /// Bound on one device's share of a dispatch, retries included
    pub per_device_timeout_secs: u64,

    pub max_response_bytes: usize,

    pub safe_volume: u8,

    pub network_stats_enabled: bool,

    /// Consecutive failures that open a device's circuit; unset disables the breaker
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            discovery_method: DiscoveryMethod::Mdns,
            discovery_timeout_secs: 5,
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            cache_path: default_cache_path(),
            rate_limit_ms: 100,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            request_timeout_secs: 2,
            per_device_timeout_secs: 30,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            safe_volume: DEFAULT_SAFE_VOLUME,
            network_stats_enabled: false,
            circuit_breaker_threshold: None,
            circuit_breaker_cooldown_secs: 30,
        }
    }
}

fn lenient_method<'de, D>(deserializer: D) -> std::result::Result<DiscoveryMethod, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        tracing::warn!("Unknown discovery method {:?}, using mdns", raw);
        DiscoveryMethod::Mdns
    }))
}

impl Settings {
    /// Parse settings from JSON, then clamp them into range
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        Ok(settings.validated())
    }

    /// Clamp every value into its accepted range
    pub fn validated(mut self) -> Self {
        let timeout_range = MIN_TIMEOUT.as_secs()..=MAX_TIMEOUT.as_secs();
        self.discovery_timeout_secs = self
            .discovery_timeout_secs
            .clamp(*timeout_range.start(), *timeout_range.end());
        self.request_timeout_secs = self
            .request_timeout_secs
            .clamp(*timeout_range.start(), *timeout_range.end());
        self.cache_ttl_secs = self.cache_ttl_secs.min(MAX_TTL.as_secs());
        self.safe_volume = self.safe_volume.min(MAX_VOLUME);
        self.max_attempts = self.max_attempts.max(1);
        self.retry_max_delay_ms = self.retry_max_delay_ms.max(self.retry_base_delay_ms);
        self.per_device_timeout_secs = self.per_device_timeout_secs.max(1);
        self.max_response_bytes = self.max_response_bytes.max(1);

        if let Err(e) = validate::validate_service_type(&self.service_type) {
            tracing::warn!("{}, using {}", e, DEFAULT_SERVICE_TYPE);
            self.service_type = DEFAULT_SERVICE_TYPE.to_string();
        }
        self
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn per_device_timeout(&self) -> Duration {
        Duration::from_secs(self.per_device_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                ..RetryPolicy::default()
            },
            rate_limit_interval: Duration::from_millis(self.rate_limit_ms),
            max_response_bytes: self.max_response_bytes,
            circuit_breaker: self.circuit_breaker_threshold.map(|failure_threshold| CircuitBreakerConfig {
                failure_threshold: failure_threshold.max(1),
                cooldown: Duration::from_secs(self.circuit_breaker_cooldown_secs),
            }),
        }
    }
}
