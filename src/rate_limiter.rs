//! Per-device call spacing
//!
//! Embedded players fall over when hammered, so every call to one device waits
//! until at least `interval` has passed since the previous call to it. Callers
//! wait rather than being rejected.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Default minimum spacing between calls to one device
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

type Slot = Arc<Mutex<Option<Instant>>>;

/// Mutex-guarded map of per-device last-call instants
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    slots: Mutex<HashMap<Ipv4Addr, Slot>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a call to `address` is allowed, then record it
    ///
    /// The per-device lock is held across the wait so concurrent callers for
    /// one device are serialized and none can skip the spacing.
    pub async fn acquire(&self, address: Ipv4Addr) {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(address).or_default().clone()
        };

        let mut last = slot.lock().await;
        if let Some(previous) = *last {
            let ready = previous + self.interval;
            if ready > Instant::now() {
                tracing::trace!("Rate limiting {} for {:?}", address, ready - Instant::now());
                sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Number of devices with recorded calls
    pub async fn tracked(&self) -> usize {
        self.slots.lock().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}
