//! Persistent cache of the last discovery result
//!
//! The cache file holds a single [`DiscoveryResult`] as JSON. Writes go to a
//! temporary file in the same directory that is then renamed over the old one,
//! so readers only ever see a complete file.

use crate::error::{BluosError, Result};
use crate::types::{Device, DiscoveryResult};
use crate::validate;
use chrono::{DateTime, Utc};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Default time a discovery result stays fresh
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Longest accepted TTL
pub const MAX_TTL: Duration = Duration::from_secs(3600);

/// Location of the cache file under the user's config directory
pub fn default_cache_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("bluesound-controller")
        .join("cache")
        .join("discovery.json")
}

#[derive(Debug, Clone)]
pub struct DeviceCache {
    path: PathBuf,
    ttl: Duration,
}

impl DeviceCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl: ttl.min(MAX_TTL),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The stored result if it has not expired
    pub fn get(&self) -> Result<Option<DiscoveryResult>> {
        self.get_at(Utc::now())
    }

    pub(crate) fn get_at(&self, now: DateTime<Utc>) -> Result<Option<DiscoveryResult>> {
        let Some(result) = self.load()? else {
            return Ok(None);
        };
        if self.is_fresh(&result, now) {
            Ok(Some(result))
        } else {
            tracing::debug!("Cache entry from {} expired", result.timestamp);
            Ok(None)
        }
    }

    /// The stored result regardless of age
    pub fn get_stale(&self) -> Result<Option<DiscoveryResult>> {
        self.load()
    }

    /// Atomically replace the stored result
    pub fn put(&self, result: &DiscoveryResult) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| BluosError::Cache(format!("cache path {} has no parent", self.path.display())))?;
        // Only a directory created here is made private
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            restrict_dir(dir)?;
        }

        let json = serde_json::to_vec_pretty(result)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        restrict_file(tmp.path())?;
        tmp.persist(&self.path)
            .map_err(|e| BluosError::Cache(format!("failed to replace {}: {}", self.path.display(), e.error)))?;

        tracing::debug!("Cached {} device(s) to {}", result.len(), self.path.display());
        Ok(())
    }

    /// Remove the cache file if present
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_fresh(&self, result: &DiscoveryResult, now: DateTime<Utc>) -> bool {
        if result.timestamp > now {
            return false;
        }
        match (now - result.timestamp).to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => false,
        }
    }

    fn load(&self) -> Result<Option<DiscoveryResult>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BluosError::Cache(format!("cannot read {}: {}", self.path.display(), e))),
        };

        let stored: DiscoveryResult = serde_json::from_slice(&data)
            .map_err(|e| BluosError::Cache(format!("corrupt cache file {}: {}", self.path.display(), e)))?;

        let total = stored.devices.len();
        let valid: Vec<Device> = stored
            .devices
            .into_iter()
            .filter(|d| validate::is_device_address(d.address))
            .collect();
        if valid.len() < total {
            tracing::warn!("Dropped {} invalid cached address(es)", total - valid.len());
        }
        let result = DiscoveryResult::captured_at(valid, stored.source, stored.timestamp);
        if result.is_empty() {
            return Ok(None);
        }
        Ok(Some(result))
    }
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> Result<()> {
    Ok(())
}
