//! Agent output parser
//!
//! `bluetoothctl` interleaves prompts, ANSI colouring and carriage returns
//! with its status lines. This module cleans each line and turns it into a
//! typed [`AgentEvent`], so the scan loop and the query helpers never look at
//! raw text themselves.

use once_cell::sync::Lazy;
use regex::Regex;

use super::address::DeviceAddress;

/// Leading `[bluetooth]# ` style prompts, possibly repeated after redraws
static PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\[[^\]\r\n]*\]#\s*)+").expect("prompt regex"));

/// `[NEW]` / `[CHG]` / `[DEL]` event tags
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(NEW|CHG|DEL)\]\s*").expect("tag regex"));

/// `Device <addr> <rest>` with a 17-character colon-delimited address
static DEVICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Device\s+([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})(?:\s+(.*))?$")
        .expect("device regex")
});

/// `[CHG]` properties that carry the device name
const NAME_PROPERTIES: [&str; 2] = ["Name", "Alias"];

/// Pair/connect output that means the device object is not in the agent cache
pub const NOT_AVAILABLE_MARKER: &str = "not available";

/// Outputs that mean the radio-level connection is up
pub const CONNECTED_MARKERS: [&str; 2] = ["Connection successful", "Connected: yes"];

/// Typed view of one agent output line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A device announced itself, carrying its name when the line had one
    DeviceSeen {
        address: DeviceAddress,
        name: Option<String>,
    },
    /// Signal-strength-only update; never carries a name
    RssiUpdate { address: DeviceAddress },
    /// Any other `[CHG]` property line
    PropertyChanged {
        address: DeviceAddress,
        property: String,
        value: String,
    },
    /// Device dropped from the agent cache
    DeviceLost { address: DeviceAddress },
    /// Any other non-empty status line ("Discovery started", "Pairing successful", ...)
    CommandAck(String),
}

/// Strip ANSI sequences, carriage returns and prompts from a raw line
pub fn clean_line(raw: &str) -> String {
    let stripped = strip_ansi_escapes::strip(raw.as_bytes());
    let text = String::from_utf8_lossy(&stripped);
    // A redraw leaves the real content after the last carriage return
    let text = text.rsplit('\r').find(|s| !s.trim().is_empty()).unwrap_or("");
    PROMPT.replace(text.trim(), "").trim().to_string()
}

/// Parse a single raw output line
pub fn parse_line(raw: &str) -> Option<AgentEvent> {
    let line = clean_line(raw);
    if line.is_empty() {
        return None;
    }

    let tag = TAG.captures(&line).map(|c| c[1].to_string());
    let body = TAG.replace(&line, "");

    let Some(caps) = DEVICE.captures(&body) else {
        return Some(AgentEvent::CommandAck(line));
    };
    let address: DeviceAddress = caps[1].parse().ok()?;
    let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

    if tag.as_deref() == Some("DEL") {
        return Some(AgentEvent::DeviceLost { address });
    }
    if rest.starts_with("RSSI") {
        return Some(AgentEvent::RssiUpdate { address });
    }
    if rest.is_empty() {
        return Some(AgentEvent::DeviceSeen { address, name: None });
    }

    // A property change only names the device through a name property;
    // keys may contain spaces ("ManufacturerData Key") and values may be empty
    if tag.as_deref() == Some("CHG") {
        let (property, value) = match rest.split_once(':') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (rest, ""),
        };
        return Some(if NAME_PROPERTIES.contains(&property) {
            AgentEvent::DeviceSeen {
                address,
                name: (!value.is_empty()).then(|| value.to_string()),
            }
        } else {
            AgentEvent::PropertyChanged {
                address,
                property: property.to_string(),
                value: value.to_string(),
            }
        });
    }

    Some(AgentEvent::DeviceSeen {
        address,
        name: Some(rest.to_string()),
    })
}

/// Parse a `devices` / `paired-devices` listing into `(address, name)` pairs.
///
/// Only untagged `Device <addr> <name>` lines count: an interactive session
/// also replays `[NEW]` lines for every cached device on startup, and those
/// are not part of the listing.
pub fn parse_device_listing(output: &str) -> Vec<(DeviceAddress, String)> {
    let mut devices: Vec<(DeviceAddress, String)> = Vec::new();
    for raw in output.lines() {
        let line = clean_line(raw);
        if !line.starts_with("Device ") {
            continue;
        }
        if let Some(AgentEvent::DeviceSeen { address, name }) = parse_line(&line) {
            if !devices.iter().any(|(a, _)| *a == address) {
                devices.push((address, name.unwrap_or_default()));
            }
        }
    }
    devices
}

/// Whether an `info <addr>` output reports an active connection
pub fn reports_connected(output: &str) -> bool {
    output.lines().any(|raw| clean_line(raw) == "Connected: yes")
}

/// Whether a connect attempt's output signals success
pub fn reports_connection_success(output: &str) -> bool {
    CONNECTED_MARKERS.iter().any(|marker| output.contains(marker))
}

/// Whether a pair attempt's output says the device is not reachable
pub fn reports_not_available(output: &str) -> bool {
    output.to_lowercase().contains(NOT_AVAILABLE_MARKER)
}
