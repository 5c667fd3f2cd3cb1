use crate::error::BluosError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Default BluOS REST API port
pub const BLUOS_PORT: u16 = 11000;

/// Device identifier (identity is the network address)
pub type DeviceId = Ipv4Addr;

/// Volume level (0-100)
pub type Volume = u8;

/// Class of a BluOS device as announced over LSDP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Player,
    Server,
    Hub,
    SecondaryZone,
    /// Class id not known to this library
    Unknown(u16),
}

impl DeviceClass {
    pub const PLAYER_ID: u16 = 0x0001;
    pub const SERVER_ID: u16 = 0x0002;
    pub const SECONDARY_ID: u16 = 0x0003;
    pub const PAIR_SLAVE_ID: u16 = 0x0006;
    pub const HUB_ID: u16 = 0x0008;
    pub const ALL_ID: u16 = 0xFFFF;

    /// Map a wire class id to a class
    pub fn from_id(id: u16) -> Self {
        match id {
            Self::PLAYER_ID => DeviceClass::Player,
            Self::SERVER_ID => DeviceClass::Server,
            Self::SECONDARY_ID | Self::PAIR_SLAVE_ID => DeviceClass::SecondaryZone,
            Self::HUB_ID => DeviceClass::Hub,
            other => DeviceClass::Unknown(other),
        }
    }

    /// Wire class id for this class
    pub fn id(&self) -> u16 {
        match self {
            DeviceClass::Player => Self::PLAYER_ID,
            DeviceClass::Server => Self::SERVER_ID,
            DeviceClass::SecondaryZone => Self::SECONDARY_ID,
            DeviceClass::Hub => Self::HUB_ID,
            DeviceClass::Unknown(id) => *id,
        }
    }
}

/// Which discovery source produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    Mdns,
    Lsdp,
}

/// Configured discovery method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    #[default]
    Mdns,
    Lsdp,
    /// mDNS first, LSDP only if mDNS finds nothing
    Both,
}

impl FromStr for DiscoveryMethod {
    type Err = BluosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mdns" => Ok(DiscoveryMethod::Mdns),
            "lsdp" => Ok(DiscoveryMethod::Lsdp),
            "both" => Ok(DiscoveryMethod::Both),
            other => Err(BluosError::Validation(format!("unknown discovery method: {}", other))),
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveryMethod::Mdns => "mdns",
            DiscoveryMethod::Lsdp => "lsdp",
            DiscoveryMethod::Both => "both",
        };
        f.write_str(s)
    }
}

/// A discovered BluOS device
///
/// Devices are immutable snapshots; a later discovery pass produces new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub address: Ipv4Addr,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub brand: String,

    pub class: DeviceClass,

    #[serde(default)]
    pub mac: Option<String>,

    /// REST API port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    BLUOS_PORT
}

impl Device {
    /// Create a player device known only by address
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address,
            name: String::new(),
            model: String::new(),
            brand: String::new(),
            class: DeviceClass::Player,
            mac: None,
            port: BLUOS_PORT,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the device class
    pub fn with_class(mut self, class: DeviceClass) -> Self {
        self.class = class;
        self
    }

    /// Get the device identity
    pub fn id(&self) -> DeviceId {
        self.address
    }

    /// Name to show to a user, falling back to the address
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.address.to_string()
        } else {
            self.name.clone()
        }
    }
}

/// Devices found by one discovery pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub devices: Vec<Device>,
    pub source: DiscoverySource,
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryResult {
    /// Build a result, deduplicating by address (last occurrence wins) and sorting
    pub fn new(devices: Vec<Device>, source: DiscoverySource) -> Self {
        Self::captured_at(devices, source, Utc::now())
    }

    pub(crate) fn captured_at(devices: Vec<Device>, source: DiscoverySource, timestamp: DateTime<Utc>) -> Self {
        let mut unique: BTreeMap<Ipv4Addr, Device> = BTreeMap::new();
        for device in devices {
            unique.insert(device.address, device);
        }
        Self {
            devices: unique.into_values().collect(),
            source,
            timestamp,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Addresses in this result, sorted
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.devices.iter().map(|d| d.address).collect()
    }

    /// Find a device by address
    pub fn get(&self, address: Ipv4Addr) -> Option<&Device> {
        self.devices.iter().find(|d| d.address == address)
    }

    /// Devices whose name contains `pattern`, case-insensitively
    pub fn matching(&self, pattern: &str) -> Vec<Device> {
        let needle = pattern.to_lowercase();
        self.devices
            .iter()
            .filter(|d| needle.is_empty() || d.name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

/// How current a device set handed to a caller is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served from an unexpired cache entry
    Cached,
    /// Produced by a discovery pass just now
    Fresh,
    /// Discovery found nothing; this is the last known set past its TTL
    Stale,
    /// Discovery found nothing and no earlier set exists
    Empty,
}

/// A device set together with its freshness
#[derive(Debug, Clone)]
pub struct DeviceSet {
    pub result: Option<DiscoveryResult>,
    pub freshness: Freshness,
}

impl DeviceSet {
    pub fn devices(&self) -> &[Device] {
        self.result.as_ref().map(|r| r.devices.as_slice()).unwrap_or(&[])
    }

    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// Playback state reported by `/Status`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Play,
    Pause,
    #[default]
    Stop,
    Stream,
    Connecting,
    Other(String),
}

impl PlayState {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "play" => PlayState::Play,
            "pause" => PlayState::Pause,
            "stop" | "" => PlayState::Stop,
            "stream" => PlayState::Stream,
            "connecting" => PlayState::Connecting,
            other => PlayState::Other(other.to_string()),
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlayState::Play | PlayState::Stream)
    }
}

/// Membership in a multi-room group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncRole {
    #[default]
    Standalone,
    /// Leads a group with these followers
    Master { slaves: Vec<Ipv4Addr> },
    /// Follows the given master
    Slave { master: Ipv4Addr },
}

/// Playback status snapshot decoded from `/Status`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub volume: Volume,
    pub mute: bool,
    pub state: PlayState,
    pub service: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub sync_role: SyncRole,

    /// Child elements this library does not model
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Group and identity information decoded from `/SyncStatus`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub name: String,
    pub model: String,
    pub brand: String,
    /// Wireless signal strength as reported (dB)
    pub db: String,
    pub version: String,
    pub battery: Option<String>,
    pub role: SyncRole,

    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl SyncStatus {
    /// Model name prefixed with the brand unless already included
    pub fn full_model(&self) -> String {
        if !self.brand.is_empty() && !self.model.contains(&self.brand) {
            format!("{} {}", self.brand, self.model)
        } else {
            self.model.clone()
        }
    }
}

/// One entry of the play queue
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueItem {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub image: String,
    pub service: String,
}

/// Saved preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub image: String,
}

/// Audio input source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInput {
    pub name: String,
    pub input_type: String,
    pub selected: bool,
}

/// Bluetooth autoplay mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BluetoothMode {
    Manual,
    Automatic,
    Guest,
    Disabled,
}

impl BluetoothMode {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(BluetoothMode::Manual),
            "1" => Some(BluetoothMode::Automatic),
            "2" => Some(BluetoothMode::Guest),
            "3" => Some(BluetoothMode::Disabled),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            BluetoothMode::Manual => 0,
            BluetoothMode::Automatic => 1,
            BluetoothMode::Guest => 2,
            BluetoothMode::Disabled => 3,
        }
    }
}

/// Network statistics for a device from an optional external collaborator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkStatsEntry {
    pub mac: String,
    pub is_wired: bool,
    pub uplink: String,
    pub port_info: String,
    pub down_total: u64,
    pub up_total: u64,
    pub down_rate: u64,
    pub up_rate: u64,
    pub uptime: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ids_round_trip_known_values() {
        assert_eq!(DeviceClass::from_id(1), DeviceClass::Player);
        assert_eq!(DeviceClass::from_id(2), DeviceClass::Server);
        assert_eq!(DeviceClass::from_id(3), DeviceClass::SecondaryZone);
        assert_eq!(DeviceClass::from_id(6), DeviceClass::SecondaryZone);
        assert_eq!(DeviceClass::from_id(8), DeviceClass::Hub);
        assert_eq!(DeviceClass::from_id(0x42), DeviceClass::Unknown(0x42));
        assert_eq!(DeviceClass::Unknown(0x42).id(), 0x42);
    }

    #[test]
    fn discovery_result_is_unique_by_address() {
        let a = Ipv4Addr::new(192, 168, 1, 10);
        let b = Ipv4Addr::new(192, 168, 1, 5);
        let result = DiscoveryResult::new(
            vec![
                Device::new(a).with_name("Kitchen"),
                Device::new(b).with_name("Office"),
                Device::new(a).with_name("Kitchen Node"),
            ],
            DiscoverySource::Lsdp,
        );
        assert_eq!(result.addresses(), vec![b, a]);
        assert_eq!(result.get(a).map(|d| d.name.as_str()), Some("Kitchen Node"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let result = DiscoveryResult::new(
            vec![
                Device::new(Ipv4Addr::new(10, 0, 0, 2)).with_name("Living Room"),
                Device::new(Ipv4Addr::new(10, 0, 0, 3)).with_name("Bedroom"),
            ],
            DiscoverySource::Mdns,
        );
        assert_eq!(result.matching("ROOM").len(), 2);
        assert_eq!(result.matching("living").len(), 1);
        assert_eq!(result.matching("").len(), 2);
    }

    #[test]
    fn discovery_method_parsing() {
        assert_eq!("BOTH".parse::<DiscoveryMethod>().unwrap(), DiscoveryMethod::Both);
        assert!("bonjour".parse::<DiscoveryMethod>().is_err());
    }

    #[test]
    fn full_model_prefixes_brand_once() {
        let mut sync = SyncStatus {
            brand: "Bluesound".into(),
            model: "NODE".into(),
            ..Default::default()
        };
        assert_eq!(sync.full_model(), "Bluesound NODE");
        sync.model = "Bluesound PULSE".into();
        assert_eq!(sync.full_model(), "Bluesound PULSE");
    }
}
