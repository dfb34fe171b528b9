//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative sinks.

use super::{DeviceEvent, PlaybackEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn announce(&self, device: Device) {
///         self.emitter.emit_device(DeviceEvent::NewDeviceDetected { device });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a playback event republished by the router.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits a device availability event.
    fn emit_device(&self, event: DeviceEvent);
}

/// No-op emitter for tests and embedders that only use subscriptions.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_playback(&self, _event: PlaybackEvent) {}

    fn emit_device(&self, _event: DeviceEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_playback(&self, event: PlaybackEvent) {
        match &event {
            PlaybackEvent::ProgressReport { .. } => tracing::trace!(?event, "playback_event"),
            _ => tracing::debug!(?event, "playback_event"),
        }
    }

    fn emit_device(&self, event: DeviceEvent) {
        tracing::debug!(?event, "device_event");
    }
}
