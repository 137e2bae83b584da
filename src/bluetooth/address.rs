//! Hardware addresses and discovered candidates

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of the canonical `AA:BB:CC:DD:EE:FF` form
pub const ADDRESS_TEXT_LEN: usize = 17;

/// 6-byte Bluetooth hardware address.
///
/// Parsing is case-insensitive; display is always upper-case colon-hex, so
/// two spellings of the same address compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid hardware address '{0}'")]
pub struct AddressParseError(pub String);

impl DeviceAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_string());
        if s.len() != ADDRESS_TEXT_LEN {
            return Err(err());
        }

        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(err)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(err());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }

        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

/// A discovered peripheral: hardware address plus best-effort name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateDevice {
    pub name: String,
    pub address: DeviceAddress,
}

impl CandidateDevice {
    pub fn new(name: impl Into<String>, address: DeviceAddress) -> Self {
        Self { name: name.into(), address }
    }

    /// Menu label: the name, or the address for unnamed devices
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.address.to_string()
        } else {
            self.name.clone()
        }
    }
}
