//! Bounded decoding of device XML payloads
//!
//! Payloads are first parsed into a bounded element tree. Any violated ceiling
//! aborts the parse with a protocol error and no partial tree. Typed decoders
//! then read the tree with defaults for missing fields.

use crate::error::{BluosError, Result};
use crate::types::{
    AudioInput, BluetoothMode, PlayState, Preset, QueueItem, StatusSnapshot, SyncRole, SyncStatus,
};
use crate::validate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

/// Parser ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_size: usize,
    /// Root element is depth 1
    pub max_depth: usize,
    pub max_elements: usize,
    pub max_attributes: usize,
    pub max_text: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_size: 1024 * 1024,
            max_depth: 20,
            max_elements: 10_000,
            max_attributes: 100,
            max_text: 100 * 1024,
        }
    }
}

/// A parsed element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the first child called `name`
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Child text if present and non-empty, else the attribute of the same name
    fn field(&self, name: &str) -> String {
        self.child_text(name)
            .filter(|t| !t.is_empty())
            .or_else(|| self.attr(name))
            .unwrap_or_default()
            .to_string()
    }
}

/// Parse with the default ceilings
pub fn parse(data: &[u8]) -> Result<Element> {
    parse_with_limits(data, &Limits::default())
}

pub fn parse_with_limits(data: &[u8], limits: &Limits) -> Result<Element> {
    if data.len() > limits.max_size {
        return Err(BluosError::protocol(format!(
            "XML document of {} bytes exceeds {} byte limit",
            data.len(),
            limits.max_size
        )));
    }

    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut elements = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            BluosError::protocol(format!("malformed XML at byte {}: {}", reader.buffer_position(), e))
        })?;

        match event {
            Event::DocType(_) => return Err(BluosError::protocol("DOCTYPE declarations are not allowed")),
            Event::Start(e) => {
                elements += 1;
                check_element(elements, stack.len() + 1, limits)?;
                stack.push(open_element(&e, limits)?);
            }
            Event::Empty(e) => {
                elements += 1;
                check_element(elements, stack.len() + 1, limits)?;
                let element = open_element(&e, limits)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| BluosError::protocol("unexpected end tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| BluosError::protocol(e.to_string()))?;
                append_text(&mut stack, &text, limits)?;
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c);
                append_text(&mut stack, &text, limits)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(BluosError::protocol("unclosed element at end of document"));
    }
    root.ok_or_else(|| BluosError::protocol("document has no root element"))
}

fn check_element(count: usize, depth: usize, limits: &Limits) -> Result<()> {
    if count > limits.max_elements {
        return Err(BluosError::protocol(format!("more than {} elements", limits.max_elements)));
    }
    if depth > limits.max_depth {
        return Err(BluosError::protocol(format!("nesting deeper than {}", limits.max_depth)));
    }
    Ok(())
}

fn open_element(start: &BytesStart<'_>, limits: &Limits) -> Result<Element> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| BluosError::protocol("element name is not UTF-8"))?
        .to_string();

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        if attributes.len() == limits.max_attributes {
            return Err(BluosError::protocol(format!(
                "<{}> has more than {} attributes",
                name, limits.max_attributes
            )));
        }
        let attr = attr.map_err(|e| BluosError::protocol(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| BluosError::protocol(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_some() {
        Err(BluosError::protocol("document has more than one root element"))
    } else {
        *root = Some(element);
        Ok(())
    }
}

fn append_text(stack: &mut [Element], text: &str, limits: &Limits) -> Result<()> {
    match stack.last_mut() {
        Some(element) => {
            if element.text.len() + text.len() > limits.max_text {
                return Err(BluosError::protocol(format!(
                    "text in <{}> exceeds {} bytes",
                    element.name, limits.max_text
                )));
            }
            element.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(BluosError::protocol("text outside the root element")),
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes")
}

/// Service reported when `/Status` names none
const DEFAULT_SERVICE: &str = "Library/Input";

const STATUS_FIELDS: &[&str] = &["volume", "mute", "state", "service", "title1", "title", "artist", "album"];

/// Decode a `/Status` payload
pub fn decode_status(data: &[u8]) -> Result<StatusSnapshot> {
    let root = parse(data)?;

    let volume = root
        .child_text("volume")
        .and_then(|v| v.trim().parse::<i32>().ok())
        .map(validate::clamp_volume)
        .unwrap_or(0);

    let mut service = root.child_text("service").unwrap_or(DEFAULT_SERVICE).to_string();
    if service == "Raat" {
        service = "Roon".to_string();
    }

    let title = root
        .child_text("title1")
        .filter(|t| !t.is_empty())
        .or_else(|| root.child_text("title"))
        .unwrap_or_default()
        .to_string();

    let mut extra = BTreeMap::new();
    for child in &root.children {
        if !STATUS_FIELDS.contains(&child.name.as_str()) {
            extra.entry(child.name.clone()).or_insert_with(|| child.text.clone());
        }
    }

    Ok(StatusSnapshot {
        volume,
        mute: root.child_text("mute").is_some_and(truthy),
        state: PlayState::parse(root.child_text("state").unwrap_or("stop")),
        service,
        title,
        artist: root.child_text("artist").unwrap_or_default().to_string(),
        album: root.child_text("album").unwrap_or_default().to_string(),
        sync_role: SyncRole::Standalone,
        extra,
    })
}

const SYNC_ATTRIBUTES: &[&str] = &["name", "modelName", "brand", "db", "version", "master"];

fn parse_member(value: &str) -> Option<Ipv4Addr> {
    match validate::parse_device_address(value) {
        Ok(addr) => Some(addr),
        Err(e) => {
            tracing::debug!("Ignoring group member: {}", e);
            None
        }
    }
}

/// Decode a `/SyncStatus` payload
pub fn decode_sync_status(data: &[u8]) -> Result<SyncStatus> {
    let root = parse(data)?;

    let master = root
        .attr("master")
        .or_else(|| root.child_text("master"))
        .filter(|m| !m.is_empty())
        .and_then(parse_member);

    let slaves: Vec<Ipv4Addr> = root
        .children_named("slave")
        .filter_map(|s| s.attr("id").or(Some(s.text.as_str())).and_then(parse_member))
        .collect();

    let role = match master {
        Some(master) => SyncRole::Slave { master },
        None if !slaves.is_empty() => SyncRole::Master { slaves },
        None => SyncRole::Standalone,
    };

    let attr = |name: &str| root.attr(name).unwrap_or_default().to_string();
    let model = root
        .attr("modelName")
        .filter(|m| !m.is_empty())
        .or_else(|| root.attr("brand"))
        .unwrap_or_default()
        .to_string();

    let extra = root
        .attributes
        .iter()
        .filter(|(key, _)| !SYNC_ATTRIBUTES.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(SyncStatus {
        name: root.attr("name").unwrap_or("Unknown").to_string(),
        model,
        brand: attr("brand"),
        db: attr("db"),
        version: attr("version"),
        battery: root.child("battery").and_then(|b| b.attr("level")).map(str::to_string),
        role,
        extra,
    })
}

/// Decode a `/Queue` payload
pub fn decode_queue(data: &[u8]) -> Result<Vec<QueueItem>> {
    let root = parse(data)?;
    Ok(root
        .children_named("item")
        .map(|item| QueueItem {
            title: item.field("title"),
            artist: item.field("artist"),
            album: item.field("album"),
            image: item.field("image"),
            service: item.field("service"),
        })
        .collect())
}

/// Decode a `/Presets` payload
pub fn decode_presets(data: &[u8]) -> Result<Vec<Preset>> {
    let root = parse(data)?;
    Ok(root
        .children_named("preset")
        .map(|preset| Preset {
            id: preset.attr("id").unwrap_or_default().to_string(),
            name: preset.field("name"),
            image: preset.field("image"),
        })
        .collect())
}

/// Decode an `/AudioInputs` payload
pub fn decode_inputs(data: &[u8]) -> Result<Vec<AudioInput>> {
    let root = parse(data)?;
    Ok(root
        .children_named("input")
        .map(|input| AudioInput {
            name: input.field("name"),
            input_type: input.field("type"),
            selected: input.attr("selected").is_some_and(truthy),
        })
        .collect())
}

/// Decode the bluetooth autoplay mode from an `/AudioModes` payload
pub fn decode_bluetooth_mode(data: &[u8]) -> Result<BluetoothMode> {
    let root = parse(data)?;
    let code = root.child_text("bluetoothAutoplay").unwrap_or_default();
    BluetoothMode::from_code(code)
        .ok_or_else(|| BluosError::Device(format!("unrecognized bluetooth mode {:?}", code)))
}

fn uptime_regex() -> &'static Regex {
    static UPTIME: OnceLock<Regex> = OnceLock::new();
    UPTIME.get_or_init(|| Regex::new(r"(?is)Uptime:</div>\s*<div[^>]*>(.*?)</div>").expect("static regex"))
}

/// Extract the uptime string from the diagnostics page
pub fn extract_uptime(html: &[u8]) -> Option<String> {
    if html.len() > Limits::default().max_size {
        return None;
    }
    let html = String::from_utf8_lossy(html);
    uptime_regex()
        .captures(&html)
        .map(|caps| caps[1].trim().to_string())
        .filter(|uptime| !uptime.is_empty())
}
