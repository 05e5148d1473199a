//! Hardware (link-layer) addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A link-layer hardware address of any length.
///
/// Ethernet uses 6 bytes, but EUI-64 and InfiniBand addresses are longer,
/// so the address is kept as a byte vector. An empty address is treated as
/// absent by every operation that requires one.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HardwareAddr(Vec<u8>);

impl HardwareAddr {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<[u8; 6]> for HardwareAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&[u8]> for HardwareAddr {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for HardwareAddr {
    type Err = Error;

    /// Parses colon- or dash-separated hex octets, e.g. `aa:bb:cc:dd:ee:ff`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let normalized = trimmed.to_lowercase().replace('-', ":");
        let mut bytes = Vec::new();
        for part in normalized.split(':') {
            let octet = !part.is_empty() && part.len() <= 2;
            if !octet || !part.bytes().all(|byte| byte.is_ascii_hexdigit()) {
                return Err(Error::InvalidHardwareAddr(s.to_string()));
            }
            let byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidHardwareAddr(s.to_string()))?;
            bytes.push(byte);
        }
        Ok(Self(bytes))
    }
}

impl Serialize for HardwareAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
