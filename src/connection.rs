use crate::error::{BluosError, Result};
use crate::protocol::{DeviceRequest, Method, RawResponse};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Performs a single network call to a device
///
/// Implementations do not retry or rate-limit; the executor layers those on top.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to the device at `address`
    ///
    /// Bodies larger than `max_body` bytes must be rejected with
    /// [`BluosError::ResponseTooLarge`], never truncated.
    async fn send(
        &self,
        address: Ipv4Addr,
        port: u16,
        request: &DeviceRequest,
        timeout: Duration,
        max_body: usize,
    ) -> Result<RawResponse>;
}

/// HTTP transport for devices on the local network
///
/// Players serve self-signed certificates on some firmware, so verification is
/// disabled. The client never leaves this type and is only pointed at literal,
/// already validated device addresses.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .user_agent(concat!("bluos-control/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BluosError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        address: Ipv4Addr,
        port: u16,
        request: &DeviceRequest,
        timeout: Duration,
        max_body: usize,
    ) -> Result<RawResponse> {
        let url = request.url(address, port);
        tracing::debug!("{:?} {} {:?} [{}]", request.method, url, request.params, request.id);

        let builder = match request.method {
            Method::Get => self.client.get(&url).query(&request.params),
            Method::Post => self.client.post(&url).form(&request.params),
        };

        let mut response = builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status().as_u16();
        if let Some(len) = response.content_length() {
            if len > max_body as u64 {
                return Err(BluosError::ResponseTooLarge { limit: max_body });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| map_reqwest_error(e, timeout))? {
            if body.len() + chunk.len() > max_body {
                return Err(BluosError::ResponseTooLarge { limit: max_body });
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!("{} -> HTTP {} ({} bytes)", url, status, body.len());
        Ok(RawResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> BluosError {
    if e.is_timeout() {
        BluosError::Timeout(timeout)
    } else if e.is_connect() || e.is_request() || e.is_body() {
        BluosError::Connection(e.to_string())
    } else if e.is_decode() {
        BluosError::protocol(e.to_string())
    } else {
        BluosError::Connection(e.to_string())
    }
}
