use crate::broadcast::LsdpScanner;
use crate::error::Result;
use crate::mdns::MdnsScanner;
use crate::types::{Device, DiscoveryMethod, DiscoveryResult, DiscoverySource};
use crate::validate;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A source of discovered devices
///
/// Implementations return raw candidates; the orchestrator validates and
/// deduplicates them.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Which source this scanner represents
    fn source(&self) -> DiscoverySource;

    /// Scan the network for at most `timeout`
    async fn scan(&self, timeout: Duration) -> Result<Vec<Device>>;
}

/// Discovery orchestrator for BluOS players
///
/// Runs the configured method and normalizes the raw scanner output into one
/// consistent [`DiscoveryResult`]. In [`DiscoveryMethod::Both`] mode LSDP is a
/// strict fallback: it only runs when mDNS found nothing, and results from the
/// two sources are never merged.
///
/// # Example
///
/// ```no_run
/// use bluos_control::{Discovery, DiscoveryMethod};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let discovery = Discovery::new("_musc._tcp");
///     let result = discovery.discover(DiscoveryMethod::Both, Duration::from_secs(5)).await?;
///
///     for device in &result.devices {
///         println!("Found {} at {}", device.display_name(), device.address);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Discovery {
    mdns: Arc<dyn Scanner>,
    lsdp: Arc<dyn Scanner>,
}

impl Discovery {
    /// Create a discovery manager using the system mDNS resolver and an LSDP socket
    pub fn new(service_type: impl Into<String>) -> Self {
        Self::with_scanners(
            Arc::new(MdnsScanner::system(service_type)),
            Arc::new(LsdpScanner::new()),
        )
    }

    /// Create a discovery manager from explicit scanners
    pub fn with_scanners(mdns: Arc<dyn Scanner>, lsdp: Arc<dyn Scanner>) -> Self {
        Self { mdns, lsdp }
    }

    /// Run one discovery pass
    ///
    /// An empty result is not an error; the caller decides whether to fall
    /// back to a cached set.
    pub async fn discover(&self, method: DiscoveryMethod, timeout: Duration) -> Result<DiscoveryResult> {
        let timeout = validate::validate_timeout(timeout)?;
        tracing::info!("Scanning network ({:?}) [{}]", timeout, method);

        let result = match method {
            DiscoveryMethod::Mdns => self.run(&self.mdns, timeout).await,
            DiscoveryMethod::Lsdp => self.run(&self.lsdp, timeout).await,
            DiscoveryMethod::Both => {
                let mdns = self.run(&self.mdns, timeout).await;
                if mdns.is_empty() {
                    tracing::info!("mDNS found no devices, falling back to LSDP");
                    self.run(&self.lsdp, timeout).await
                } else {
                    mdns
                }
            }
        };

        if result.is_empty() {
            tracing::warn!("No valid devices found via discovery");
        } else {
            tracing::info!("Discovered {} device(s) via {:?}", result.len(), result.source);
        }
        Ok(result)
    }

    async fn run(&self, scanner: &Arc<dyn Scanner>, timeout: Duration) -> DiscoveryResult {
        let source = scanner.source();
        let raw = match scanner.scan(timeout).await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!("{:?} discovery failed: {}", source, e);
                Vec::new()
            }
        };

        let admitted: Vec<Device> = raw
            .into_iter()
            .filter(|device| {
                let ok = validate::is_device_address(device.address);
                if !ok {
                    tracing::debug!("Discarding {} from {:?}: not a device address", device.address, source);
                }
                ok
            })
            .collect();

        DiscoveryResult::new(admitted, source)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::BluosError;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scanner returning a fixed answer and counting invocations
    pub(crate) struct FixedScanner {
        source: DiscoverySource,
        devices: Vec<Device>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedScanner {
        pub(crate) fn new(source: DiscoverySource, addrs: &[Ipv4Addr]) -> Arc<Self> {
            Arc::new(Self {
                source,
                devices: addrs.iter().map(|a| Device::new(*a)).collect(),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn failing(source: DiscoverySource) -> Arc<Self> {
            Arc::new(Self {
                source,
                devices: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Scanner for FixedScanner {
        fn source(&self) -> DiscoverySource {
            self.source
        }

        async fn scan(&self, _timeout: Duration) -> Result<Vec<Device>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BluosError::Resolver("scanner offline".into()));
            }
            Ok(self.devices.clone())
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, last)
    }

    #[tokio::test]
    async fn both_falls_through_to_lsdp_when_mdns_is_empty() {
        let mdns = FixedScanner::new(DiscoverySource::Mdns, &[]);
        let lsdp = FixedScanner::new(DiscoverySource::Lsdp, &[addr(20), addr(21)]);
        let discovery = Discovery::with_scanners(mdns.clone(), lsdp.clone());

        let result = discovery.discover(DiscoveryMethod::Both, TIMEOUT).await.unwrap();
        assert_eq!(result.source, DiscoverySource::Lsdp);
        assert_eq!(result.addresses(), vec![addr(20), addr(21)]);
        assert_eq!(mdns.calls(), 1);
        assert_eq!(lsdp.calls(), 1);
    }

    #[tokio::test]
    async fn both_never_invokes_lsdp_when_mdns_finds_devices() {
        let mdns = FixedScanner::new(DiscoverySource::Mdns, &[addr(10)]);
        let lsdp = FixedScanner::new(DiscoverySource::Lsdp, &[addr(20)]);
        let discovery = Discovery::with_scanners(mdns.clone(), lsdp.clone());

        let result = discovery.discover(DiscoveryMethod::Both, TIMEOUT).await.unwrap();
        assert_eq!(result.source, DiscoverySource::Mdns);
        assert_eq!(result.addresses(), vec![addr(10)]);
        assert_eq!(lsdp.calls(), 0);
    }

    #[tokio::test]
    async fn failing_mdns_counts_as_empty() {
        let mdns = FixedScanner::failing(DiscoverySource::Mdns);
        let lsdp = FixedScanner::new(DiscoverySource::Lsdp, &[addr(30)]);
        let discovery = Discovery::with_scanners(mdns, lsdp);

        let result = discovery.discover(DiscoveryMethod::Both, TIMEOUT).await.unwrap();
        assert_eq!(result.addresses(), vec![addr(30)]);
    }

    #[tokio::test]
    async fn single_methods_use_only_their_scanner() {
        let mdns = FixedScanner::new(DiscoverySource::Mdns, &[]);
        let lsdp = FixedScanner::new(DiscoverySource::Lsdp, &[addr(40)]);
        let discovery = Discovery::with_scanners(mdns.clone(), lsdp.clone());

        let result = discovery.discover(DiscoveryMethod::Mdns, TIMEOUT).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(lsdp.calls(), 0);

        let result = discovery.discover(DiscoveryMethod::Lsdp, TIMEOUT).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(mdns.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_addresses_are_never_admitted() {
        let mdns = FixedScanner::new(
            DiscoverySource::Mdns,
            &[Ipv4Addr::LOCALHOST, Ipv4Addr::new(169, 254, 1, 1), addr(50), addr(50)],
        );
        let discovery = Discovery::with_scanners(mdns, FixedScanner::new(DiscoverySource::Lsdp, &[]));
        let result = discovery.discover(DiscoveryMethod::Mdns, TIMEOUT).await.unwrap();
        assert_eq!(result.addresses(), vec![addr(50)]);
    }

    #[tokio::test]
    async fn empty_everywhere_is_not_an_error() {
        let discovery = Discovery::with_scanners(
            FixedScanner::failing(DiscoverySource::Mdns),
            FixedScanner::failing(DiscoverySource::Lsdp),
        );
        let result = discovery.discover(DiscoveryMethod::Both, TIMEOUT).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn rejects_out_of_range_timeout() {
        let discovery = Discovery::with_scanners(
            FixedScanner::new(DiscoverySource::Mdns, &[]),
            FixedScanner::new(DiscoverySource::Lsdp, &[]),
        );
        let err = discovery
            .discover(DiscoveryMethod::Mdns, Duration::from_secs(120))
            .await
            .unwrap_err();
        assert!(matches!(err, BluosError::Validation(_)));
    }
}
