//! Network proximity of the two devices in a cross-device login.
//!
//! Surfaced to the second device as an anomaly signal: a scan from the
//! other side of the world is worth a warning before the user proves
//! anything. Coarse on purpose; this is a hint, not an access control.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

/// How close device 2's address is to the address device 1 used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProximity {
    /// Identical addresses.
    Same,
    /// Same /16 for IPv4, same /48 for IPv6.
    Near,
    /// Anything else, including mixed address families.
    Far,
}

impl Display for DeviceProximity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceProximity::Same => "same",
            DeviceProximity::Near => "near",
            DeviceProximity::Far => "far",
        };
        write!(f, "{s}")
    }
}

/// Classify the proximity of two addresses.
#[must_use]
pub fn classify_proximity(a: IpAddr, b: IpAddr) -> DeviceProximity {
    if a == b {
        return DeviceProximity::Same;
    }
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) if a.octets()[..2] == b.octets()[..2] => {
            DeviceProximity::Near
        }
        (IpAddr::V6(a), IpAddr::V6(b)) if a.octets()[..6] == b.octets()[..6] => {
            DeviceProximity::Near
        }
        _ => DeviceProximity::Far,
    }
}
