//! Rust library for discovering and controlling BluOS multi-room audio players
//!
//! This library provides an async API for finding BluOS players on the local
//! network and sending them commands. It supports:
//!
//! - Discovery via multicast DNS (`_musc._tcp`) and the LSDP broadcast protocol
//! - A persistent, time-bounded cache of discovered devices with stale fallback
//! - Playback, volume, queue, input, preset, grouping and reboot control
//! - Concurrent dispatch to many players with per-device failure isolation
//! - Per-device rate limiting, retry with exponential backoff and an optional
//!   circuit breaker
//! - Bounded decoding of device XML payloads
//!
//! # Quick Start
//!
//! ```no_run
//! use bluos_control::{Controller, OperationClass, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = Controller::new(Settings::default())?;
//!
//!     // Cached devices are used while fresh; otherwise the network is scanned
//!     let set = controller.devices(false).await?;
//!     if set.is_stale() {
//!         println!("Discovery found nothing, showing last known devices");
//!     }
//!
//!     // Query every player at once
//!     let outcomes = controller.statuses(set.devices()).await?;
//!     for (address, outcome) in &outcomes {
//!         match &outcome.result {
//!             Ok(status) => println!("{}: {} - {}", address, status.artist, status.title),
//!             Err(e) => println!("{}: {}", address, e),
//!         }
//!     }
//!
//!     // Pause everything
//!     controller
//!         .dispatch(set.devices(), OperationClass::Command, |p| async move { p.pause().await })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Direct Control
//!
//! If you know the address of a player, you can control it directly:
//!
//! ```no_run
//! use bluos_control::{Controller, Device, Settings};
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = Controller::new(Settings::default())?;
//!     let player = controller.player(Device::new(Ipv4Addr::new(192, 168, 1, 100)));
//!     player.set_volume(20).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Controller**: Session context owning settings, cache and executor
//! - **Player**: Typed per-device operations
//! - **Dispatch**: Fan-out of one operation to many devices
//! - **Executor**: Rate limiting, timeouts, retry and circuit breaking
//! - **Discovery**: mDNS and LSDP scanners with hybrid fallback
//! - **Lsdp / Xml**: Wire codec and response decoder

mod broadcast;
mod cache;
mod circuit_breaker;
mod client;
mod collaborators;
mod config;
mod connection;
mod discovery;
mod dispatch;
mod error;
mod executor;
pub mod lsdp;
mod mdns;
mod player;
mod protocol;
mod rate_limiter;
mod retry;
mod types;
pub mod validate;
pub mod xml;

// Public exports
pub use broadcast::{AnnounceCollector, LsdpScanner};
pub use cache::{default_cache_path, DeviceCache, DEFAULT_TTL};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::Controller;
pub use collaborators::{EmptySecretStore, NetworkStats, SecretStore};
pub use config::{Settings, DEFAULT_SAFE_VOLUME};
pub use connection::{HttpTransport, Transport};
pub use discovery::{Discovery, Scanner};
pub use dispatch::{CommandOutcome, Dispatcher, OperationClass};
pub use error::{BluosError, ErrorKind, Result, RetryClass};
pub use executor::{ExecutorConfig, RequestExecutor, DEFAULT_MAX_RESPONSE_BYTES};
pub use mdns::{
    DnsSdBrowser, DscacheutilResolver, HostResolver, MdnsScanner, ServiceBrowser, SystemResolver,
    DEFAULT_SERVICE_TYPE,
};
pub use player::Player;
pub use protocol::{DeviceRequest, Endpoint, Method, RawResponse, Response};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use types::{
    AudioInput, BluetoothMode, Device, DeviceClass, DeviceId, DeviceSet, DiscoveryMethod,
    DiscoveryResult, DiscoverySource, Freshness, NetworkStatsEntry, PlayState, Preset, QueueItem,
    StatusSnapshot, SyncRole, SyncStatus, Volume, BLUOS_PORT,
};
