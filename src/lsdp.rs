//! LSDP (Lenbrook Service Discovery Protocol) packet codec
//!
//! Packets start with a fixed header (header length, `"LSDP"` magic, version)
//! followed by one or more length-prefixed messages:
//!
//! ```text
//! header   := 0x06 'L' 'S' 'D' 'P' 0x01
//! message  := len:u8 kind:u8 body[len - 2]
//! query    := count:u8 class:u16*
//! announce := id_len:u8 id addr_len:u8 addr count:u8 record*
//! record   := class:u16 txt_count:u8 (klen:u8 key vlen:u8 value)*
//! delete   := id_len:u8 id count:u8 class:u16*
//! ```
//!
//! Decoding never panics: every read is bounds checked and any inconsistency
//! is reported as [`BluosError::Protocol`].

use crate::error::{BluosError, Result};
use crate::types::{Device, DeviceClass, BLUOS_PORT};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// UDP port LSDP runs on
pub const LSDP_PORT: u16 = 11430;

pub const MAGIC: &[u8; 4] = b"LSDP";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 6;

/// Largest datagram accepted for decoding
pub const MAX_PACKET_SIZE: usize = 4096;

const KIND_QUERY: u8 = b'Q';
const KIND_QUERY_UNICAST: u8 = b'R';
const KIND_ANNOUNCE: u8 = b'A';
const KIND_DELETE: u8 = b'D';

/// A decoded LSDP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub messages: Vec<Message>,
}

/// One message inside a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Query { unicast: bool, classes: Vec<u16> },
    Announce(Announce),
    Delete(Delete),
}

/// Device self-description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub node_id: Vec<u8>,
    /// Announced IPv4 address; `None` if the announcement carried another form
    pub address: Option<Ipv4Addr>,
    pub records: Vec<AnnounceRecord>,
}

/// Per-class metadata in an announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceRecord {
    pub class: DeviceClass,
    pub txt: BTreeMap<String, String>,
}

/// Device departure notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub node_id: Vec<u8>,
    pub classes: Vec<DeviceClass>,
}

impl Announce {
    /// Node id rendered as lowercase hex
    pub fn node_id_hex(&self) -> String {
        hex_string(&self.node_id)
    }

    /// Build a device record from this announcement
    ///
    /// `source` is the datagram's sender and is used when the announcement did
    /// not carry an IPv4 address. Records for known classes are preferred over
    /// unknown ones.
    pub fn to_device(&self, source: Ipv4Addr) -> Device {
        let record = self
            .records
            .iter()
            .find(|r| !matches!(r.class, DeviceClass::Unknown(_)))
            .or_else(|| self.records.first());

        let empty = BTreeMap::new();
        let txt = record.map(|r| &r.txt).unwrap_or(&empty);
        let mac = txt
            .get("mac")
            .map(|m| m.to_lowercase())
            .or_else(|| (self.node_id.len() == 6).then(|| mac_string(&self.node_id)));

        Device {
            address: self.address.unwrap_or(source),
            name: txt.get("name").cloned().unwrap_or_default(),
            model: txt.get("model").cloned().unwrap_or_default(),
            brand: txt.get("brand").cloned().unwrap_or_default(),
            class: record.map(|r| r.class).unwrap_or(DeviceClass::Player),
            mac,
            port: txt
                .get("port")
                .and_then(|p| p.parse().ok())
                .unwrap_or(BLUOS_PORT),
        }
    }
}

impl Delete {
    pub fn node_id_hex(&self) -> String {
        hex_string(&self.node_id)
    }
}

/// Build a broadcast query for the given class ids
pub fn encode_query(classes: &[u16]) -> Result<Vec<u8>> {
    let msg_len = 3 + classes.len() * 2;
    if classes.is_empty() || msg_len > u8::MAX as usize {
        return Err(BluosError::validation(format!(
            "query must carry 1-126 class ids, got {}",
            classes.len()
        )));
    }

    let mut buf = header();
    buf.push(msg_len as u8);
    buf.push(KIND_QUERY);
    buf.push(classes.len() as u8);
    for class in classes {
        buf.extend_from_slice(&class.to_be_bytes());
    }
    Ok(buf)
}

/// Build an announce packet
pub fn encode_announce(announce: &Announce) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    push_short(&mut body, &announce.node_id)?;
    match announce.address {
        Some(addr) => push_short(&mut body, &addr.octets())?,
        None => body.push(0),
    }
    body.push(checked_u8(announce.records.len())?);
    for record in &announce.records {
        body.extend_from_slice(&record.class.id().to_be_bytes());
        body.push(checked_u8(record.txt.len())?);
        for (key, value) in &record.txt {
            push_short(&mut body, key.as_bytes())?;
            push_short(&mut body, value.as_bytes())?;
        }
    }
    wrap_message(KIND_ANNOUNCE, body)
}

/// Build a delete packet
pub fn encode_delete(delete: &Delete) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    push_short(&mut body, &delete.node_id)?;
    body.push(checked_u8(delete.classes.len())?);
    for class in &delete.classes {
        body.extend_from_slice(&class.id().to_be_bytes());
    }
    wrap_message(KIND_DELETE, body)
}

/// Decode a received datagram
pub fn decode(data: &[u8]) -> Result<Packet> {
    if data.len() > MAX_PACKET_SIZE {
        return Err(BluosError::protocol(format!("packet of {} bytes exceeds limit", data.len())));
    }
    if data.len() < HEADER_LEN {
        return Err(BluosError::protocol("packet shorter than header"));
    }
    if data[0] as usize != HEADER_LEN {
        return Err(BluosError::protocol(format!("unexpected header length {}", data[0])));
    }
    if &data[1..5] != MAGIC {
        return Err(BluosError::protocol("bad magic"));
    }
    let version = data[5];
    if version != VERSION {
        return Err(BluosError::protocol(format!("unsupported version {}", version)));
    }

    // Declared message lengths must account for every received byte
    let mut messages = Vec::new();
    let mut offset = HEADER_LEN;
    while offset < data.len() {
        let declared = data[offset] as usize;
        if declared < 2 {
            return Err(BluosError::protocol(format!("message length {} too small", declared)));
        }
        let end = offset + declared;
        if end > data.len() {
            return Err(BluosError::protocol(format!(
                "message declares {} bytes but only {} remain",
                declared,
                data.len() - offset
            )));
        }
        let kind = data[offset + 1];
        let body = &data[offset + 2..end];
        match kind {
            KIND_QUERY | KIND_QUERY_UNICAST => messages.push(decode_query(body, kind == KIND_QUERY_UNICAST)?),
            KIND_ANNOUNCE => messages.push(Message::Announce(decode_announce(body)?)),
            KIND_DELETE => messages.push(Message::Delete(decode_delete(body)?)),
            other => tracing::debug!("Skipping unknown LSDP message kind 0x{:02x}", other),
        }
        offset = end;
    }

    if messages.is_empty() && offset == HEADER_LEN {
        return Err(BluosError::protocol("packet carries no messages"));
    }

    Ok(Packet { version, messages })
}

fn decode_query(body: &[u8], unicast: bool) -> Result<Message> {
    let mut r = ByteReader::new(body);
    let count = r.u8()?;
    let mut classes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        classes.push(r.u16()?);
    }
    r.finish()?;
    Ok(Message::Query { unicast, classes })
}

fn decode_announce(body: &[u8]) -> Result<Announce> {
    let mut r = ByteReader::new(body);
    let node_id = r.short_bytes()?.to_vec();
    let addr = r.short_bytes()?;
    let address = match addr.len() {
        4 => Some(Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3])),
        _ => None,
    };

    let count = r.u8()?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let class = DeviceClass::from_id(r.u16()?);
        let txt_count = r.u8()?;
        let mut txt = BTreeMap::new();
        for _ in 0..txt_count {
            let key = String::from_utf8_lossy(r.short_bytes()?).into_owned();
            let value = String::from_utf8_lossy(r.short_bytes()?).into_owned();
            txt.insert(key, value);
        }
        records.push(AnnounceRecord { class, txt });
    }
    r.finish()?;

    Ok(Announce {
        node_id,
        address,
        records,
    })
}

fn decode_delete(body: &[u8]) -> Result<Delete> {
    let mut r = ByteReader::new(body);
    let node_id = r.short_bytes()?.to_vec();
    let count = r.u8()?;
    let mut classes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        classes.push(DeviceClass::from_id(r.u16()?));
    }
    r.finish()?;
    Ok(Delete { node_id, classes })
}

/// Bounds-checked cursor over a message body
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| BluosError::protocol("truncated message"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Length-prefixed byte string
    fn short_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn finish(&self) -> Result<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(BluosError::protocol(format!(
                "{} trailing bytes in message",
                self.buf.len() - self.pos
            )))
        }
    }
}

fn header() -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    buf.push(HEADER_LEN as u8);
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf
}

fn wrap_message(kind: u8, body: Vec<u8>) -> Result<Vec<u8>> {
    let len = checked_u8(body.len() + 2)?;
    let mut buf = header();
    buf.push(len);
    buf.push(kind);
    buf.extend_from_slice(&body);
    Ok(buf)
}

fn push_short(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    buf.push(checked_u8(bytes.len())?);
    buf.extend_from_slice(bytes);
    Ok(())
}

fn checked_u8(n: usize) -> Result<u8> {
    u8::try_from(n).map_err(|_| BluosError::validation(format!("field of {} bytes does not fit LSDP message", n)))
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn mac_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_announce() -> Announce {
        let mut txt = BTreeMap::new();
        txt.insert("name".to_string(), "Kitchen".to_string());
        txt.insert("model".to_string(), "N130".to_string());
        txt.insert("port".to_string(), "11000".to_string());
        txt.insert("zs".to_string(), "0".to_string());
        Announce {
            node_id: vec![0x90, 0x56, 0x82, 0x01, 0x02, 0x03],
            address: Some(Ipv4Addr::new(192, 168, 1, 40)),
            records: vec![AnnounceRecord {
                class: DeviceClass::Player,
                txt,
            }],
        }
    }

    #[test]
    fn query_packet_layout() {
        let packet = encode_query(&[DeviceClass::PLAYER_ID, DeviceClass::HUB_ID]).unwrap();
        assert_eq!(
            packet,
            vec![6, b'L', b'S', b'D', b'P', 1, 7, b'Q', 2, 0x00, 0x01, 0x00, 0x08]
        );
        let decoded = decode(&packet).unwrap();
        assert_eq!(
            decoded.messages,
            vec![Message::Query {
                unicast: false,
                classes: vec![1, 8]
            }]
        );
    }

    #[test]
    fn query_rejects_empty_class_list() {
        assert!(encode_query(&[]).is_err());
    }

    #[test]
    fn announce_decodes_to_device_fields() {
        let packet = encode_announce(&sample_announce()).unwrap();
        let decoded = decode(&packet).unwrap();
        let Message::Announce(announce) = &decoded.messages[0] else {
            panic!("expected announce, got {:?}", decoded.messages);
        };

        let device = announce.to_device(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(device.address, Ipv4Addr::new(192, 168, 1, 40));
        assert_eq!(device.name, "Kitchen");
        assert_eq!(device.model, "N130");
        assert_eq!(device.class, DeviceClass::Player);
        assert_eq!(device.mac.as_deref(), Some("90:56:82:01:02:03"));
        assert_eq!(device.port, 11000);
        assert_eq!(announce.node_id_hex(), "905682010203");
        // unknown keys survive
        assert_eq!(announce.records[0].txt.get("zs").map(String::as_str), Some("0"));
    }

    #[test]
    fn announce_without_address_falls_back_to_source() {
        let mut announce = sample_announce();
        announce.address = None;
        let decoded = decode(&encode_announce(&announce).unwrap()).unwrap();
        let Message::Announce(announce) = &decoded.messages[0] else {
            panic!("expected announce");
        };
        let device = announce.to_device(Ipv4Addr::new(192, 168, 1, 77));
        assert_eq!(device.address, Ipv4Addr::new(192, 168, 1, 77));
    }

    #[test]
    fn unknown_class_is_not_an_error() {
        let mut announce = sample_announce();
        announce.records[0].class = DeviceClass::Unknown(0x0123);
        let decoded = decode(&encode_announce(&announce).unwrap()).unwrap();
        let Message::Announce(announce) = &decoded.messages[0] else {
            panic!("expected announce");
        };
        assert_eq!(announce.records[0].class, DeviceClass::Unknown(0x0123));
    }

    #[test]
    fn delete_round_trips() {
        let delete = Delete {
            node_id: vec![1, 2, 3, 4, 5, 6],
            classes: vec![DeviceClass::Player],
        };
        let decoded = decode(&encode_delete(&delete).unwrap()).unwrap();
        assert_eq!(decoded.messages, vec![Message::Delete(delete)]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut packet = encode_announce(&sample_announce()).unwrap();
        packet[1] = b'X';
        assert!(matches!(decode(&packet), Err(BluosError::Protocol(_))));
    }

    #[test]
    fn rejects_declared_length_mismatch() {
        let mut packet = encode_announce(&sample_announce()).unwrap();
        packet[HEADER_LEN] += 5;
        assert!(matches!(decode(&packet), Err(BluosError::Protocol(_))));

        let mut packet = encode_announce(&sample_announce()).unwrap();
        packet.push(0xAA);
        assert!(matches!(decode(&packet), Err(BluosError::Protocol(_))));
    }

    #[test]
    fn rejects_truncation_at_every_length() {
        let packet = encode_announce(&sample_announce()).unwrap();
        for len in 0..packet.len() {
            assert!(decode(&packet[..len]).is_err(), "truncated to {} bytes", len);
        }
    }

    #[test]
    fn rejects_inner_field_overrun() {
        // node id claims 200 bytes inside a 6 byte body
        let packet = vec![6, b'L', b'S', b'D', b'P', 1, 8, b'A', 200, 1, 2, 3, 4, 5];
        assert!(matches!(decode(&packet), Err(BluosError::Protocol(_))));
    }

    #[test]
    fn rejects_oversized_and_wrong_version() {
        let mut big = vec![6, b'L', b'S', b'D', b'P', 1];
        big.resize(MAX_PACKET_SIZE + 1, 0);
        assert!(decode(&big).is_err());

        let mut packet = encode_query(&[1]).unwrap();
        packet[5] = 2;
        assert!(decode(&packet).is_err());
    }

    #[test]
    fn zero_length_message_is_rejected() {
        let packet = vec![6, b'L', b'S', b'D', b'P', 1, 0, 0];
        assert!(decode(&packet).is_err());
    }

    #[test]
    fn unknown_message_kinds_are_skipped() {
        let mut packet = encode_query(&[1]).unwrap();
        packet.extend_from_slice(&[4, b'Z', 9, 9]);
        let decoded = decode(&packet).unwrap();
        assert_eq!(decoded.messages.len(), 1);
    }
}
