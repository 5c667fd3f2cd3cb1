use crate::discovery::Scanner;
use crate::error::Result;
use crate::lsdp::{self, Message, LSDP_PORT, MAX_PACKET_SIZE};
use crate::types::{Device, DeviceClass, DiscoverySource};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

/// LSDP discovery over a UDP broadcast socket
///
/// Sends one query and collects announcements until the timeout elapses.
pub struct LsdpScanner {
    classes: Vec<u16>,
    broadcast: Ipv4Addr,
    port: u16,
}

impl LsdpScanner {
    /// Query for players and hubs on the limited broadcast address
    pub fn new() -> Self {
        Self {
            classes: vec![DeviceClass::PLAYER_ID, DeviceClass::HUB_ID],
            broadcast: Ipv4Addr::BROADCAST,
            port: LSDP_PORT,
        }
    }

    /// Query for a different set of class ids
    pub fn with_classes(mut self, classes: Vec<u16>) -> Self {
        self.classes = classes;
        self
    }

    /// Send the query to a directed broadcast address instead
    pub fn with_broadcast_address(mut self, broadcast: Ipv4Addr) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Use a non-standard port (tests, relays)
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    async fn bind(&self) -> Result<UdpSocket> {
        // Announcements are broadcast to the LSDP port; fall back to an
        // ephemeral port if another process already holds it.
        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port)).await {
            Ok(socket) => Ok(socket),
            Err(e) => {
                tracing::debug!("LSDP port {} unavailable ({}), using ephemeral port", self.port, e);
                Ok(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?)
            }
        }
    }
}

impl Default for LsdpScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for LsdpScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Lsdp
    }

    async fn scan(&self, timeout: Duration) -> Result<Vec<Device>> {
        let query = lsdp::encode_query(&self.classes)?;
        let socket = self.bind().await?;
        socket.set_broadcast(true)?;

        if let Err(e) = socket.send_to(&query, (self.broadcast, self.port)).await {
            tracing::debug!("LSDP query send error: {}", e);
        }
        tracing::debug!("Sent LSDP query for classes {:?}", self.classes);

        let deadline = Instant::now() + timeout;
        let mut collector = AnnounceCollector::default();
        // One extra byte so oversized datagrams are detectable
        let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];

        loop {
            match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    tracing::debug!("LSDP receive error: {}", e);
                    break;
                }
                Ok(Ok((len, from))) => {
                    let SocketAddr::V4(from) = from else { continue };
                    collector.ingest(&buf[..len], *from.ip());
                }
            }
        }

        Ok(collector.into_devices())
    }
}

/// Accumulates the live device set from a stream of LSDP datagrams
///
/// Announcements add or replace a node; a delete removes the node's earlier
/// announcement from the set.
#[derive(Debug, Default)]
pub struct AnnounceCollector {
    live: BTreeMap<Vec<u8>, Device>,
    rejected: usize,
}

impl AnnounceCollector {
    /// Feed one datagram received from `source`
    pub fn ingest(&mut self, data: &[u8], source: Ipv4Addr) {
        let packet = match lsdp::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.rejected += 1;
                tracing::debug!("Ignoring LSDP datagram from {}: {}", source, e);
                return;
            }
        };

        for message in packet.messages {
            match message {
                Message::Announce(announce) => {
                    let device = announce.to_device(source);
                    tracing::debug!("LSDP announce from {} ({})", device.address, announce.node_id_hex());
                    self.live.insert(announce.node_id, device);
                }
                Message::Delete(delete) => {
                    if self.live.remove(&delete.node_id).is_some() {
                        tracing::debug!("LSDP delete for node {}", delete.node_id_hex());
                    }
                }
                Message::Query { .. } => {}
            }
        }
    }

    /// Number of datagrams that failed to decode
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn into_devices(self) -> Vec<Device> {
        self.live.into_values().collect()
    }
}
