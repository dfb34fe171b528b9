//! Long-running services that sit above the UPnP and playback layers.

pub mod network_monitor;
pub mod network_watcher;

pub use network_monitor::{DeviceEventStream, NetworkCapabilityMonitor};
pub use network_watcher::NetworkWatcher;
