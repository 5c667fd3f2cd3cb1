//! Optional external collaborators

use crate::error::Result;
use crate::types::NetworkStatsEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Source of per-device network statistics (switch port, AP, traffic)
///
/// Only consulted when enabled. Any failure is treated as "unavailable".
#[async_trait]
pub trait NetworkStats: Send + Sync {
    async fn fetch(&self, addresses: &[Ipv4Addr]) -> Result<HashMap<Ipv4Addr, NetworkStatsEntry>>;
}

/// Supplies resolved credentials
pub trait SecretStore: Send + Sync {
    /// The credential for `name`, or an empty string when none is stored
    fn credential(&self, name: &str) -> String;
}

/// Store with no credentials
#[derive(Debug, Default, Clone)]
pub struct EmptySecretStore;

impl SecretStore for EmptySecretStore {
    fn credential(&self, _name: &str) -> String {
        String::new()
    }
}
