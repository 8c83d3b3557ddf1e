//! Controlled device descriptors, as reported by the agent server.

use serde::{Deserialize, Serialize};

/// A phone attached to the agent server.
///
/// Owned by the server; the console only references devices by `id` and
/// refreshes the list periodically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable device identifier (ADB serial or `host:port`).
    pub id: String,
    /// Human-readable model name.
    #[serde(default = "unknown_model")]
    pub model: String,
    /// Transport status as reported by ADB (e.g. "device", "offline").
    #[serde(default)]
    pub status: String,
    /// How the device is attached (e.g. "usb", "wifi", "remote").
    #[serde(default)]
    pub connection_type: String,
    /// Device kind, when the server reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Whether an agent has been initialized for this device on the server.
    #[serde(default)]
    pub is_initialized: bool,
}

fn unknown_model() -> String {
    "Unknown".to_string()
}

impl Device {
    /// Whether the device is usable for automation (ADB reports `device`).
    pub fn is_online(&self) -> bool {
        self.status == "device"
    }
}

/// Response body of `GET /api/devices`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceList {
    pub devices: Vec<Device>,
}
