//! Multicast DNS discovery through the operating system's resolver

use crate::discovery::Scanner;
use crate::error::{BluosError, Result};
use crate::types::{Device, DiscoverySource};
use crate::validate;
use async_trait::async_trait;
use futures_util::future::join_all;
use regex::Regex;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};

/// Default service type advertised by BluOS players
pub const DEFAULT_SERVICE_TYPE: &str = "_musc._tcp";

/// Most resolver output retained from one browse
pub const MAX_RESOLVER_OUTPUT: usize = 256 * 1024;

/// Lists the SRV targets advertised for a service type
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Browse for `service_type` until `timeout` elapses and return raw output
    async fn browse(&self, service_type: &str, timeout: Duration) -> Result<String>;
}

/// Resolves a host name to IPv4 addresses
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Result<Vec<Ipv4Addr>>;
}

/// `dns-sd -Z <service> local`, killed when the timeout elapses
#[derive(Debug, Default, Clone)]
pub struct DnsSdBrowser;

#[async_trait]
impl ServiceBrowser for DnsSdBrowser {
    async fn browse(&self, service_type: &str, timeout: Duration) -> Result<String> {
        validate::validate_service_type(service_type)?;
        let mut cmd = Command::new("dns-sd");
        cmd.args(["-Z", service_type, "local"]);
        run_capped(cmd, timeout).await
    }
}

/// `dscacheutil -q host -a name <host>` (macOS)
#[derive(Debug, Default, Clone)]
pub struct DscacheutilResolver {
    timeout: Option<Duration>,
}

impl DscacheutilResolver {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout) }
    }
}

#[async_trait]
impl HostResolver for DscacheutilResolver {
    async fn resolve(&self, hostname: &str) -> Result<Vec<Ipv4Addr>> {
        validate::validate_hostname(hostname)?;
        let mut cmd = Command::new("dscacheutil");
        cmd.args(["-q", "host", "-a", "name", hostname]);
        let output = run_capped(cmd, self.timeout.unwrap_or(Duration::from_secs(5))).await?;
        Ok(parse_dscacheutil(&output))
    }
}

/// Resolution through the system resolver (`getaddrinfo`)
#[derive(Debug, Default, Clone)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> Result<Vec<Ipv4Addr>> {
        validate::validate_hostname(hostname)?;
        let addrs = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| BluosError::Resolver(format!("{}: {}", hostname, e)))?;
        Ok(addrs
            .filter_map(|a| match a.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect())
    }
}

/// mDNS scanner combining a service browser with a host resolver
pub struct MdnsScanner {
    service_type: String,
    browser: Arc<dyn ServiceBrowser>,
    resolver: Arc<dyn HostResolver>,
}

impl MdnsScanner {
    /// Scanner backed by the platform's resolver tools
    pub fn system(service_type: impl Into<String>) -> Self {
        #[cfg(target_os = "macos")]
        let resolver: Arc<dyn HostResolver> = Arc::new(DscacheutilResolver::default());
        #[cfg(not(target_os = "macos"))]
        let resolver: Arc<dyn HostResolver> = Arc::new(SystemResolver);

        Self::new(service_type, Arc::new(DnsSdBrowser), resolver)
    }

    pub fn new(
        service_type: impl Into<String>,
        browser: Arc<dyn ServiceBrowser>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            browser,
            resolver,
        }
    }

    async fn resolve_one(&self, host: String, deadline: Instant) -> Option<Device> {
        let addrs = match timeout_at(deadline, self.resolver.resolve(&host)).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                tracing::debug!("Failed to resolve {}: {}", host, e);
                return None;
            }
            Err(_) => {
                tracing::debug!("Resolution of {} ran out of time", host);
                return None;
            }
        };

        let address = addrs.into_iter().find(|a| validate::is_device_address(*a))?;
        let name = host.strip_suffix(".local").unwrap_or(&host).to_string();
        Some(Device::new(address).with_name(name))
    }
}

#[async_trait]
impl Scanner for MdnsScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Mdns
    }

    async fn scan(&self, timeout: Duration) -> Result<Vec<Device>> {
        validate::validate_service_type(&self.service_type)?;
        let deadline = Instant::now() + timeout;

        let output = self.browser.browse(&self.service_type, timeout).await?;
        let hosts = parse_srv_targets(&output);
        tracing::debug!("mDNS browse returned {} candidate host(s)", hosts.len());

        // Resolution gets a little grace past the browse window
        let deadline = deadline.max(Instant::now()) + Duration::from_secs(2);
        let devices = join_all(hosts.into_iter().map(|host| self.resolve_one(host, deadline))).await;
        Ok(devices.into_iter().flatten().collect())
    }
}

fn srv_regex() -> &'static Regex {
    static SRV: OnceLock<Regex> = OnceLock::new();
    SRV.get_or_init(|| Regex::new(r"SRV\s+\d+\s+\d+\s+\d+\s+(\S+)").expect("static regex"))
}

/// Extract validated SRV target host names from resolver output
///
/// Targets that fail hostname validation are dropped.
pub fn parse_srv_targets(output: &str) -> Vec<String> {
    let mut hosts = BTreeSet::new();
    for line in output.lines() {
        let Some(caps) = srv_regex().captures(line) else { continue };
        let host = caps[1].trim_end_matches('.');
        match validate::validate_hostname(host) {
            Ok(()) => {
                hosts.insert(host.to_string());
            }
            Err(e) => tracing::debug!("Skipping SRV target: {}", e),
        }
    }
    hosts.into_iter().collect()
}

/// Extract IPv4 addresses from `dscacheutil` output
pub fn parse_dscacheutil(output: &str) -> Vec<Ipv4Addr> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ip_address:"))
        .filter_map(|value| value.trim().parse().ok())
        .collect()
}

/// Run a process, collecting at most [`MAX_RESOLVER_OUTPUT`] bytes of stdout
///
/// The child is killed once the timeout elapses; output gathered so far is kept.
async fn run_capped(mut cmd: Command, timeout: Duration) -> Result<String> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| BluosError::Resolver(format!("failed to start resolver: {}", e)))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| BluosError::Resolver("resolver stdout unavailable".into()))?;

    let deadline = Instant::now() + timeout;
    let mut output = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match timeout_at(deadline, stdout.read(&mut chunk)).await {
            Err(_) | Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let room = MAX_RESOLVER_OUTPUT - output.len();
                output.extend_from_slice(&chunk[..n.min(room)]);
                if output.len() >= MAX_RESOLVER_OUTPUT {
                    tracing::warn!("Resolver output exceeded {} bytes, truncating", MAX_RESOLVER_OUTPUT);
                    break;
                }
            }
            Ok(Err(e)) => return Err(BluosError::Resolver(e.to_string())),
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!("Resolver already exited: {}", e);
    }
    if let Err(e) = child.wait().await {
        tracing::debug!("Failed to reap resolver process: {}", e);
    }

    Ok(String::from_utf8_lossy(&output).into_owned())
}
