use crate::error::{BluosError, Result};
use crate::types::Device;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

/// Workload classes with their own concurrency limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Discovery,
    Status,
    Command,
}

impl OperationClass {
    /// Tasks of this class allowed to run at once
    pub fn max_concurrency(&self) -> usize {
        match self {
            OperationClass::Discovery => 10,
            OperationClass::Status | OperationClass::Command => 20,
        }
    }
}

/// Result of one device's share of a dispatch
#[derive(Debug)]
pub struct CommandOutcome<T> {
    pub device: Device,
    pub result: Result<T>,
}

impl<T> CommandOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fans an operation out to many devices in parallel
///
/// Every device gets its own task and its own timeout. A failure, timeout or
/// panic in one task only ever lands in that device's [`CommandOutcome`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    discovery: Arc<Semaphore>,
    requests: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            discovery: Arc::new(Semaphore::new(OperationClass::Discovery.max_concurrency())),
            requests: Arc::new(Semaphore::new(OperationClass::Command.max_concurrency())),
        }
    }

    fn semaphore(&self, class: OperationClass) -> Arc<Semaphore> {
        match class {
            OperationClass::Discovery => self.discovery.clone(),
            OperationClass::Status | OperationClass::Command => self.requests.clone(),
        }
    }

    /// Run `operation` once per unique device and wait for every task to settle
    ///
    /// Returns exactly one outcome per unique address. An empty device set is
    /// rejected.
    pub async fn dispatch<T, F, Fut>(
        &self,
        devices: &[Device],
        class: OperationClass,
        per_device_timeout: Duration,
        operation: F,
    ) -> Result<HashMap<Ipv4Addr, CommandOutcome<T>>>
    where
        T: Send + 'static,
        F: Fn(Device) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if devices.is_empty() {
            return Err(BluosError::validation("no target devices"));
        }
        if per_device_timeout.is_zero() {
            return Err(BluosError::validation("per-device timeout must be positive"));
        }

        let targets: BTreeMap<Ipv4Addr, Device> = devices.iter().map(|d| (d.address, d.clone())).collect();
        let batch = Uuid::new_v4();
        let span = tracing::info_span!("dispatch", %batch, ?class, devices = targets.len());
        tracing::debug!(parent: &span, "Dispatching to {} device(s)", targets.len());

        let operation = Arc::new(operation);
        let semaphore = self.semaphore(class);

        let mut handles = Vec::with_capacity(targets.len());
        for device in targets.values().cloned() {
            let operation = operation.clone();
            let semaphore = semaphore.clone();
            let task = async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| BluosError::Connection("dispatcher closed".into()))?;
                match tokio::time::timeout(per_device_timeout, (*operation)(device)).await {
                    Ok(result) => result,
                    Err(_) => Err(BluosError::Timeout(per_device_timeout)),
                }
            };
            handles.push(tokio::spawn(task.instrument(span.clone())));
        }

        let mut outcomes = HashMap::with_capacity(targets.len());
        for ((address, device), handle) in targets.into_iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(parent: &span, "Task for {} did not complete: {}", address, e);
                    Err(BluosError::Device(format!("task failed: {}", e)))
                }
            };
            if let Err(e) = &result {
                tracing::warn!(parent: &span, "{} failed: {}", address, e);
            }
            outcomes.insert(address, CommandOutcome { device, result });
        }

        let failed = outcomes.values().filter(|o| !o.is_success()).count();
        tracing::info!(parent: &span, "Dispatch complete: {} ok, {} failed", outcomes.len() - failed, failed);
        Ok(outcomes)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn devices(n: u8) -> Vec<Device> {
        (1..=n).map(|i| Device::new(Ipv4Addr::new(192, 168, 1, i))).collect()
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_others() {
        let outcomes = Dispatcher::new()
            .dispatch(&devices(5), OperationClass::Command, Duration::from_secs(1), |d| async move {
                if d.address.octets()[3] == 3 {
                    Err(BluosError::Connection("unreachable".into()))
                } else {
                    Ok(d.address.octets()[3])
                }
            })
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes.values().filter(|o| o.is_success()).count(), 4);
        assert!(!outcomes[&Ipv4Addr::new(192, 168, 1, 3)].is_success());
    }

    #[tokio::test]
    async fn wall_time_tracks_slowest_device() {
        let start = Instant::now();
        let outcomes = Dispatcher::new()
            .dispatch(&devices(8), OperationClass::Status, Duration::from_secs(2), |d| async move {
                let delay = if d.address.octets()[3] == 1 { 300 } else { 50 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(())
            })
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcomes.len(), 8);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn timeouts_and_panics_are_isolated() {
        let outcomes = Dispatcher::new()
            .dispatch(&devices(3), OperationClass::Command, Duration::from_millis(100), |d| async move {
                match d.address.octets()[3] {
                    1 => {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(())
                    }
                    2 => panic!("device handler blew up"),
                    _ => Ok(()),
                }
            })
            .await
            .unwrap();

        assert!(matches!(
            outcomes[&Ipv4Addr::new(192, 168, 1, 1)].result,
            Err(BluosError::Timeout(_))
        ));
        assert!(outcomes[&Ipv4Addr::new(192, 168, 1, 2)].result.is_err());
        assert!(outcomes[&Ipv4Addr::new(192, 168, 1, 3)].is_success());
    }

    #[tokio::test]
    async fn duplicates_collapse_and_empty_set_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut targets = devices(2);
        targets.push(targets[0].clone());

        let counter = calls.clone();
        let outcomes = Dispatcher::new()
            .dispatch(&targets, OperationClass::Command, Duration::from_secs(1), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let err = Dispatcher::new()
            .dispatch(&[], OperationClass::Command, Duration::from_secs(1), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, BluosError::Validation(_)));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_per_class() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let targets: Vec<Device> = (1..=30).map(|i| Device::new(Ipv4Addr::new(10, 0, 0, i))).collect();

        let (r, p) = (running.clone(), peak.clone());
        Dispatcher::new()
            .dispatch(&targets, OperationClass::Discovery, Duration::from_secs(5), move |_| {
                let (running, peak) = (r.clone(), p.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= OperationClass::Discovery.max_concurrency());
    }
}
