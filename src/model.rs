//! Configuration records and scope identifiers.
//!
//! Records are read-mostly values fetched from a [`Provider`](crate::Provider).
//! The core never owns their storage; it only holds them for the duration of
//! one resolution or one mutating call.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::hwaddr::HardwareAddr;

/// Attribute mapping carried by every configuration record.
///
/// Keys and values are opaque to the core.
pub type Attr = BTreeMap<String, String>;

/// Root configuration applying to every network unless overridden.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Global {
    #[serde(default)]
    pub attr: Attr,
}

/// A service instance (e.g. one DHCP server process) and the network it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub network: String,
    #[serde(default)]
    pub attr: Attr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub attr: Attr,
}

/// A hardware class, either global or local to one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Type {
    pub id: String,
    #[serde(default)]
    pub attr: Attr,
}

/// A physical or organizational device class, either global or network-local.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub attr: Attr,
}

/// Per-hardware-address overrides.
///
/// The type and device references are not checked against existing records;
/// a dangling reference simply contributes no attributes during resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mac {
    pub addr: HardwareAddr,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default)]
    pub attr: Attr,
}

impl Mac {
    /// Returns the type reference, ignoring empty strings.
    pub fn type_ref(&self) -> Option<&str> {
        self.ty.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns the device reference, ignoring empty strings.
    pub fn device_ref(&self) -> Option<&str> {
        self.device.as_deref().filter(|id| !id.is_empty())
    }
}

/// Identifies one addressable node in the configuration hierarchy.
///
/// Used in errors and log output; building one performs no I/O.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Instance(String),
    Network(String),
    Type {
        network: Option<String>,
        id: String,
    },
    Device {
        network: Option<String>,
        id: String,
    },
    Mac {
        network: Option<String>,
        addr: HardwareAddr,
    },
    Lease {
        network: String,
        ip: IpAddr,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Instance(id) => write!(f, "instance {:?}", id),
            Scope::Network(id) => write!(f, "network {:?}", id),
            Scope::Type { network: None, id } => write!(f, "type {:?}", id),
            Scope::Type {
                network: Some(network),
                id,
            } => write!(f, "type {:?} on network {:?}", id, network),
            Scope::Device { network: None, id } => write!(f, "device {:?}", id),
            Scope::Device {
                network: Some(network),
                id,
            } => write!(f, "device {:?} on network {:?}", id, network),
            Scope::Mac {
                network: None,
                addr,
            } => write!(f, "mac [{}]", addr),
            Scope::Mac {
                network: Some(network),
                addr,
            } => write!(f, "mac [{}] on network {:?}", addr, network),
            Scope::Lease { network, ip } => write!(f, "lease {} on network {:?}", ip, network),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_mac_refs_ignore_empty() {
        let mac = Mac {
            ty: Some(String::new()),
            device: Some("rack-7".to_string()),
            ..Default::default()
        };
        assert_eq!(mac.type_ref(), None);
        assert_eq!(mac.device_ref(), Some("rack-7"));
    }

    #[test]
    fn test_mac_type_field_name() {
        let json = r#"{"addr":"aa:bb:cc:dd:ee:ff","type":"phone.digium","attr":{"lease-time":"60"}}"#;
        let mac: Mac = serde_json::from_str(json).unwrap();
        assert_eq!(mac.type_ref(), Some("phone.digium"));
        assert_eq!(mac.device, None);
        assert_eq!(mac.attr.get("lease-time").map(String::as_str), Some("60"));
    }

    #[test]
    fn test_scope_display() {
        let scope = Scope::Lease {
            network: "wen".to_string(),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
        };
        assert_eq!(scope.to_string(), "lease 10.0.0.5 on network \"wen\"");
        assert_eq!(
            Scope::Type {
                network: None,
                id: "phone".to_string()
            }
            .to_string(),
            "type \"phone\""
        );
    }
}
