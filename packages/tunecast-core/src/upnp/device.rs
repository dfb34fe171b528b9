//! Renderer device model and the deduplicating registry.
//!
//! A [`Device`] is identified by the (IP, description path, port) triple taken
//! from its SSDP `LOCATION` header. Two probes of the same renderer compare
//! equal no matter what name or capability they carry.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::Serialize;

/// Whether a device exposes a media transport control service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CanPlay {
    /// Not probed yet.
    #[default]
    Unknown,
    /// Description contains an AVTransport service with a control URL.
    Capable,
    /// Description unreachable or without an AVTransport service.
    Incapable,
}

/// Identity of a device: (IP, description path, port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceKey {
    pub ip: String,
    pub path: String,
    pub port: u16,
}

/// A playback target: a network renderer or the built-in local output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub ip: String,
    /// Description URL path without the leading `/`.
    pub path: String,
    pub port: u16,
    pub can_play: CanPlay,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    /// Normalized AVTransport control URL (`<ip>:<port>/<path>`), set once capable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,
    pub is_local: bool,
}

impl Device {
    /// Creates an unprobed device from its identity parts.
    pub fn new(ip: impl Into<String>, path: impl Into<String>, port: u16) -> Self {
        let path = path.into();
        Self {
            ip: ip.into(),
            path: path.trim_start_matches('/').to_string(),
            port,
            can_play: CanPlay::Unknown,
            friendly_name: None,
            control_url: None,
            is_local: false,
        }
    }

    /// Builds a device from an SSDP `LOCATION` value (`http://<ip>:<port>/<path>`).
    ///
    /// The port defaults to 80 when absent. Returns `None` for anything that is
    /// not an `http://` URL with a host.
    pub fn from_location(location: &str) -> Option<Self> {
        let rest = location.trim().strip_prefix("http://").or_else(|| {
            let trimmed = location.trim();
            trimmed
                .get(..7)
                .filter(|scheme| scheme.eq_ignore_ascii_case("http://"))
                .map(|_| &trimmed[7..])
        })?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (authority, 80),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, path, port))
    }

    /// Creates the built-in local playback target.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            path: String::new(),
            port: 0,
            can_play: CanPlay::Capable,
            friendly_name: Some(name.into()),
            control_url: None,
            is_local: true,
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            ip: self.ip.clone(),
            path: self.path.clone(),
            port: self.port,
        }
    }

    /// Returns the URL of the device description document.
    pub fn description_url(&self) -> String {
        format!("http://{}:{}/{}", self.ip, self.port, self.path)
    }

    /// Returns the name to show for this device.
    pub fn display_name(&self) -> &str {
        self.friendly_name
            .as_deref()
            .or(self.control_url.as_deref())
            .unwrap_or(&self.ip)
    }

    pub fn is_capable(&self) -> bool {
        self.can_play == CanPlay::Capable
    }

    /// Records a successful capability probe.
    pub fn mark_capable(&mut self, control_url: String, friendly_name: Option<String>) {
        self.friendly_name = Some(friendly_name.unwrap_or_else(|| control_url.clone()));
        self.control_url = Some(control_url);
        self.can_play = CanPlay::Capable;
    }

    /// Records a failed capability probe.
    pub fn mark_incapable(&mut self) {
        self.can_play = CanPlay::Incapable;
        self.control_url = None;
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.path == other.path && self.port == other.port
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.path.hash(state);
        self.port.hash(state);
    }
}

/// Deduplicating collection of devices keyed by identity.
///
/// Not synchronized: the owner (the network monitor) serializes access and
/// hands out copies via [`DeviceRegistry::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceKey, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the device if no equal device exists. Returns whether it was new.
    pub fn add_if_new(&mut self, device: Device) -> bool {
        let key = device.key();
        if self.devices.contains_key(&key) {
            return false;
        }
        self.devices.insert(key, device);
        true
    }

    /// Identity lookup.
    pub fn find(&self, device: &Device) -> Option<&Device> {
        self.devices.get(&device.key())
    }

    pub fn get(&self, key: &DeviceKey) -> Option<&Device> {
        self.devices.get(key)
    }

    /// Replaces the stored capability fields of an existing device.
    ///
    /// Returns `false` if the device is not in the registry.
    pub fn set_capability(&mut self, device: &Device) -> bool {
        match self.devices.get_mut(&device.key()) {
            Some(stored) => {
                stored.can_play = device.can_play;
                stored.friendly_name = device.friendly_name.clone();
                stored.control_url = device.control_url.clone();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, device: &Device) -> Option<Device> {
        self.devices.remove(&device.key())
    }

    /// Removes every device and returns them.
    pub fn clear(&mut self) -> Vec<Device> {
        let mut removed: Vec<Device> = self.devices.drain().map(|(_, d)| d).collect();
        removed.sort_by_key(Device::key);
        removed
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Returns a copy of all devices, ordered by identity.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by_key(Device::key);
        devices
    }

    /// Returns a copy of the capable devices, ordered by identity.
    pub fn capable(&self) -> Vec<Device> {
        self.snapshot()
            .into_iter()
            .filter(Device::is_capable)
            .collect()
    }

    /// Devices present in `previous` but absent from `current`, by identity.
    pub fn diff(previous: &[Device], current: &[Device]) -> Vec<Device> {
        let current: std::collections::HashSet<DeviceKey> =
            current.iter().map(Device::key).collect();
        previous
            .iter()
            .filter(|d| !current.contains(&d.key()))
            .cloned()
            .collect()
    }
}
