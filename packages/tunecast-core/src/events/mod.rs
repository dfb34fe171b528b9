//! Event system for playback and device notifications.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] fanning events out to any number of listeners
//! - The event types emitted by the router and the network monitor

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::upnp::Device;

/// Events broadcast to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Events republished by the playback router.
    Playback(PlaybackEvent),

    /// Events from the network capability monitor.
    Device(DeviceEvent),
}

/// Events describing what the active playback backend is doing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// The current song changed. `None` means playback ran off the end of the
    /// playlist and there is no current song.
    #[serde(rename_all = "camelCase")]
    SongIndexChanged { index: Option<usize> },

    /// Playback started or stopped.
    #[serde(rename_all = "camelCase")]
    PlayStateChanged { is_playing: bool },

    /// Periodic position report while playing.
    #[serde(rename_all = "camelCase")]
    ProgressReport { position_ms: u64, duration_ms: u64 },

    /// A render target was selected and can now be controlled.
    ControlsConnected { device: Device },
}

/// Events describing renderer availability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// Network availability changed.
    #[serde(rename_all = "camelCase")]
    NetworkState { is_up: bool },

    /// A renderer was found capable.
    NewDeviceDetected { device: Device },

    /// Renderers stopped answering, or the network went down.
    DevicesUnavailable { devices: Vec<Device> },
}

impl From<PlaybackEvent> for BroadcastEvent {
    fn from(event: PlaybackEvent) -> Self {
        BroadcastEvent::Playback(event)
    }
}

impl From<DeviceEvent> for BroadcastEvent {
    fn from(event: DeviceEvent) -> Self {
        BroadcastEvent::Device(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_event_serializes_camel_case() {
        let event = BroadcastEvent::from(PlaybackEvent::ProgressReport {
            position_ms: 1500,
            duration_ms: 180_000,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "playback");
        assert_eq!(json["type"], "progressReport");
        assert_eq!(json["positionMs"], 1500);
        assert_eq!(json["durationMs"], 180_000);
    }

    #[test]
    fn device_event_serializes_device_fields() {
        let mut device = Device::new("192.168.1.50", "desc.xml", 80);
        device.mark_capable("192.168.1.50:80/ctrl".to_string(), Some("Den".to_string()));
        let event = BroadcastEvent::from(DeviceEvent::NewDeviceDetected { device });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "device");
        assert_eq!(json["type"], "newDeviceDetected");
        assert_eq!(json["device"]["controlUrl"], "192.168.1.50:80/ctrl");
        assert_eq!(json["device"]["canPlay"], "capable");
        assert_eq!(json["device"]["isLocal"], false);
    }

    #[test]
    fn song_index_none_serializes_as_null() {
        let json =
            serde_json::to_value(PlaybackEvent::SongIndexChanged { index: None }).unwrap();
        assert!(json["index"].is_null());
    }
}
