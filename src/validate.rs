//! Input validation applied before any I/O

use crate::error::{BluosError, Result};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Longest hostname accepted (RFC 1035)
pub const MAX_HOSTNAME_LENGTH: usize = 253;

pub const MIN_VOLUME: u8 = 0;
pub const MAX_VOLUME: u8 = 100;

pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);

const SHELL_METACHARS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', ' ', '\t', '\n', '\r', '\0'];

/// Whether an address may be admitted as a device
///
/// Loopback, multicast, reserved (240.0.0.0/4, including broadcast), link-local
/// and the unspecified address are rejected.
pub fn is_device_address(addr: Ipv4Addr) -> bool {
    let reserved = addr.octets()[0] >= 240;
    !(addr.is_unspecified()
        || addr.is_loopback()
        || addr.is_multicast()
        || addr.is_link_local()
        || reserved)
}

/// Parse and validate a device address from untrusted text
pub fn parse_device_address(input: &str) -> Result<Ipv4Addr> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.len() > 15 {
        return Err(BluosError::validation(format!("invalid address length: {:?}", input)));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(BluosError::validation("address contains control characters"));
    }
    let addr: Ipv4Addr = trimmed
        .parse()
        .map_err(|_| BluosError::validation(format!("not an IPv4 address: {:?}", trimmed)))?;
    check_device_address(addr)?;
    Ok(addr)
}

/// Reject addresses outside the device range
pub fn check_device_address(addr: Ipv4Addr) -> Result<()> {
    if is_device_address(addr) {
        Ok(())
    } else {
        Err(BluosError::validation(format!("address {} is not a device address", addr)))
    }
}

/// Validate a hostname before it is handed to a resolver process
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LENGTH {
        return Err(BluosError::validation("hostname length out of range"));
    }
    if hostname.contains(SHELL_METACHARS) {
        return Err(BluosError::validation(format!("hostname contains unsafe characters: {:?}", hostname)));
    }
    for label in hostname.split('.') {
        let bytes = label.as_bytes();
        let valid = !bytes.is_empty()
            && bytes.len() <= 63
            && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
            && bytes[0] != b'-'
            && bytes[bytes.len() - 1] != b'-';
        if !valid {
            return Err(BluosError::validation(format!("invalid hostname label in {:?}", hostname)));
        }
    }
    Ok(())
}

/// Validate an mDNS service type such as `_musc._tcp`
pub fn validate_service_type(service: &str) -> Result<()> {
    let ok = !service.is_empty()
        && service.len() <= MAX_HOSTNAME_LENGTH
        && service
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if ok {
        Ok(())
    } else {
        Err(BluosError::validation(format!("invalid service type: {:?}", service)))
    }
}

/// Validate a volume level (0-100)
pub fn validate_volume(level: i32) -> Result<u8> {
    if (MIN_VOLUME as i32..=MAX_VOLUME as i32).contains(&level) {
        Ok(level as u8)
    } else {
        Err(BluosError::validation(format!("volume {} outside 0-100", level)))
    }
}

/// Clamp a volume computed from a relative adjustment into range
pub fn clamp_volume(level: i32) -> u8 {
    level.clamp(MIN_VOLUME as i32, MAX_VOLUME as i32) as u8
}

/// Validate a network call timeout (1-60 seconds)
pub fn validate_timeout(timeout: Duration) -> Result<Duration> {
    if (MIN_TIMEOUT..=MAX_TIMEOUT).contains(&timeout) {
        Ok(timeout)
    } else {
        Err(BluosError::validation(format!("timeout {:?} outside 1-60s", timeout)))
    }
}
