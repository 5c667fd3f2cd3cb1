use crate::cache::DeviceCache;
use crate::collaborators::{EmptySecretStore, NetworkStats, SecretStore};
use crate::config::Settings;
use crate::discovery::Discovery;
use crate::dispatch::{CommandOutcome, Dispatcher, OperationClass};
use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::player::Player;
use crate::types::{Device, DeviceSet, Freshness, NetworkStatsEntry, StatusSnapshot};
use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Controller for BluOS players on the local network
///
/// The `Controller` owns everything a session needs: settings, the discovery
/// sources, the device cache, and the request executor whose rate limiter is
/// shared by every [`Player`] it hands out.
pub struct Controller {
    settings: Settings,
    discovery: Discovery,
    cache: DeviceCache,
    executor: RequestExecutor,
    dispatcher: Dispatcher,
    network_stats: Option<Arc<dyn NetworkStats>>,
    secrets: Arc<dyn SecretStore>,
}

impl Controller {
    /// Create a controller using system discovery and the HTTP transport
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bluos_control::{Controller, Settings};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let controller = Controller::new(Settings::default())?;
    ///     let set = controller.devices(false).await?;
    ///     for device in set.devices() {
    ///         println!("{} ({:?})", device.display_name(), set.freshness);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn new(settings: Settings) -> Result<Self> {
        let settings = settings.validated();
        let discovery = Discovery::new(settings.service_type.clone());
        let executor = RequestExecutor::http(settings.executor_config())?;
        Ok(Self::with_parts(settings, discovery, executor))
    }

    /// Create a controller from explicit discovery sources and executor
    pub fn with_parts(settings: Settings, discovery: Discovery, executor: RequestExecutor) -> Self {
        let settings = settings.validated();
        let cache = DeviceCache::new(settings.cache_path.clone(), settings.cache_ttl());
        Self {
            settings,
            discovery,
            cache,
            executor,
            dispatcher: Dispatcher::new(),
            network_stats: None,
            secrets: Arc::new(EmptySecretStore),
        }
    }

    /// Attach a network statistics source
    pub fn with_network_stats(mut self, stats: Arc<dyn NetworkStats>) -> Self {
        self.network_stats = Some(stats);
        self
    }

    /// Attach a credential store
    pub fn with_secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &DeviceCache {
        &self.cache
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Get the current device set
    ///
    /// An unexpired cache entry is returned without touching the network
    /// unless `force_refresh` is set. Otherwise discovery runs; a non-empty
    /// result replaces the cache. When discovery finds nothing the last known
    /// set is returned flagged [`Freshness::Stale`].
    pub async fn devices(&self, force_refresh: bool) -> Result<DeviceSet> {
        if !force_refresh {
            match self.cache.get() {
                Ok(Some(result)) => {
                    tracing::debug!("Using {} cached device(s)", result.len());
                    return Ok(DeviceSet {
                        result: Some(result),
                        freshness: Freshness::Cached,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Ignoring unreadable cache, rediscovering: {}", e),
            }
        }

        let result = self
            .discovery
            .discover(self.settings.discovery_method, self.settings.discovery_timeout())
            .await?;

        if !result.is_empty() {
            if let Err(e) = self.cache.put(&result) {
                tracing::warn!("Failed to write discovery cache: {}", e);
            }
            return Ok(DeviceSet {
                result: Some(result),
                freshness: Freshness::Fresh,
            });
        }

        match self.cache.get_stale() {
            Ok(Some(stale)) => {
                tracing::warn!("Discovery found nothing, using stale cache from {}", stale.timestamp);
                Ok(DeviceSet {
                    result: Some(stale),
                    freshness: Freshness::Stale,
                })
            }
            Ok(None) => Ok(DeviceSet {
                result: None,
                freshness: Freshness::Empty,
            }),
            Err(e) => {
                tracing::warn!("No usable cache to fall back on: {}", e);
                Ok(DeviceSet {
                    result: None,
                    freshness: Freshness::Empty,
                })
            }
        }
    }

    /// Get a `Player` for a device
    pub fn player(&self, device: Device) -> Player {
        Player::new(
            device,
            self.executor.clone(),
            self.settings.request_timeout(),
            self.settings.safe_volume,
        )
    }

    /// Get `Player` handles for every device in the current set
    pub async fn players(&self, force_refresh: bool) -> Result<Vec<Player>> {
        let set = self.devices(force_refresh).await?;
        Ok(set.devices().iter().cloned().map(|d| self.player(d)).collect())
    }

    /// Run `operation` against many players concurrently
    ///
    /// Returns one outcome per unique device; failures stay in their outcome.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use bluos_control::{Controller, OperationClass, Settings};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let controller = Controller::new(Settings::default())?;
    /// let set = controller.devices(false).await?;
    /// let outcomes = controller
    ///     .dispatch(set.devices(), OperationClass::Command, |player| async move { player.pause().await })
    ///     .await?;
    /// for (address, outcome) in &outcomes {
    ///     if let Err(e) = &outcome.result {
    ///         eprintln!("{} failed: {}", address, e);
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn dispatch<T, F, Fut>(
        &self,
        devices: &[Device],
        class: OperationClass,
        operation: F,
    ) -> Result<HashMap<Ipv4Addr, CommandOutcome<T>>>
    where
        T: Send + 'static,
        F: Fn(Player) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let executor = self.executor.clone();
        let timeout = self.settings.request_timeout();
        let safe_volume = self.settings.safe_volume;
        self.dispatcher
            .dispatch(devices, class, self.settings.per_device_timeout(), move |device| {
                operation(Player::new(device, executor.clone(), timeout, safe_volume))
            })
            .await
    }

    /// Fetch status from many players concurrently
    pub async fn statuses(&self, devices: &[Device]) -> Result<HashMap<Ipv4Addr, CommandOutcome<StatusSnapshot>>> {
        self.dispatch(devices, OperationClass::Status, |player| async move { player.status().await })
            .await
    }

    /// Network statistics for `addresses`, if enabled and available
    ///
    /// Any collaborator failure yields `None`.
    pub async fn network_stats(&self, addresses: &[Ipv4Addr]) -> Option<HashMap<Ipv4Addr, NetworkStatsEntry>> {
        if !self.settings.network_stats_enabled {
            return None;
        }
        let stats = self.network_stats.as_ref()?;
        match stats.fetch(addresses).await {
            Ok(map) => Some(map),
            Err(e) => {
                tracing::warn!("Network statistics unavailable: {}", e);
                None
            }
        }
    }

    /// Resolved credential for `name`, or an empty string
    pub fn credential(&self, name: &str) -> String {
        self.secrets.credential(name)
    }
}
