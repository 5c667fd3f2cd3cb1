use uuid::Uuid;

/// Port serving the device's web UI (reboot, diagnostics)
pub const WEB_UI_PORT: u16 = 80;

/// One call to a device endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub id: Uuid,
    pub endpoint: Endpoint,
    pub method: Method,
    pub params: Vec<(String, String)>,
    /// Whether repeating the call is harmless
    pub idempotent: bool,
}

/// BluOS endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Status,
    SyncStatus,
    Play,
    Pause,
    Stop,
    Skip,
    Back,
    Volume,
    Queue,
    AudioInputs,
    AudioInput,
    AudioModes,
    SetAudioModes,
    Presets,
    Preset,
    Sync,
    SoftReboot,
    Reboot,
    Diagnostics,
}

/// HTTP methods used by the device API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Endpoint {
    /// Request path on the device
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Status => "/Status",
            Endpoint::SyncStatus => "/SyncStatus",
            Endpoint::Play => "/Play",
            Endpoint::Pause => "/Pause",
            Endpoint::Stop => "/Stop",
            Endpoint::Skip => "/Skip",
            Endpoint::Back => "/Back",
            Endpoint::Volume => "/Volume",
            Endpoint::Queue => "/Queue",
            Endpoint::AudioInputs => "/AudioInputs",
            Endpoint::AudioInput => "/AudioInput",
            Endpoint::AudioModes => "/AudioModes",
            Endpoint::SetAudioModes => "/audiomodes",
            Endpoint::Presets => "/Presets",
            Endpoint::Preset => "/Preset",
            Endpoint::Sync => "/Sync",
            Endpoint::SoftReboot => "/Reboot",
            Endpoint::Reboot => "/reboot",
            Endpoint::Diagnostics => "/diagnostics",
        }
    }

    /// Port the endpoint is served on, given the device's API port
    pub fn port(&self, api_port: u16) -> u16 {
        match self {
            Endpoint::SoftReboot | Endpoint::Reboot | Endpoint::Diagnostics => WEB_UI_PORT,
            _ => api_port,
        }
    }
}

impl DeviceRequest {
    /// Create an idempotent GET request
    pub fn get(endpoint: Endpoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint,
            method: Method::Get,
            params: Vec::new(),
            idempotent: true,
        }
    }

    /// Create a non-idempotent POST request
    pub fn post(endpoint: Endpoint) -> Self {
        Self {
            method: Method::Post,
            idempotent: false,
            ..Self::get(endpoint)
        }
    }

    /// Add a parameter
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Mark the request as non-idempotent
    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    /// URL for this request against `address`
    pub fn url(&self, address: std::net::Ipv4Addr, api_port: u16) -> String {
        format!("http://{}:{}{}", address, self.endpoint.port(api_port), self.endpoint.path())
    }
}

impl Default for DeviceRequest {
    fn default() -> Self {
        Self::get(Endpoint::Status)
    }
}

/// Raw response from a device
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A successful response together with how it was obtained
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    /// Network attempts made, including the successful one
    pub attempts: u32,
    /// Backoff delays applied between attempts
    pub backoff: Vec<std::time::Duration>,
}

impl Response {
    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn reboot_and_diagnostics_use_web_ui_port() {
        let addr = Ipv4Addr::new(192, 168, 1, 5);
        assert_eq!(DeviceRequest::get(Endpoint::Status).url(addr, 11000), "http://192.168.1.5:11000/Status");
        assert_eq!(
            DeviceRequest::post(Endpoint::SoftReboot).url(addr, 11000),
            "http://192.168.1.5:80/Reboot"
        );
        assert_eq!(
            DeviceRequest::get(Endpoint::Diagnostics).url(addr, 11000),
            "http://192.168.1.5:80/diagnostics"
        );
    }

    #[test]
    fn post_requests_are_not_idempotent() {
        let req = DeviceRequest::post(Endpoint::Reboot).param("yes", 1);
        assert!(!req.idempotent);
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.params, vec![("yes".to_string(), "1".to_string())]);
        assert!(DeviceRequest::get(Endpoint::Volume).idempotent);
    }
}
