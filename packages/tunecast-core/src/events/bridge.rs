//! Bridge that maps domain events onto a broadcast channel.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! and their listeners: every event goes to the broadcast channel and, if one
//! is set, to an external emitter (the daemon installs a logging emitter).

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, DeviceEvent, PlaybackEvent};

/// Bridges domain events to a `tokio::sync::broadcast` channel.
///
/// The external emitter uses `RwLock` so it can be installed after
/// construction.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    /// Optional external emitter for additional delivery.
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self::with_sender(tx)
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    pub fn with_sender(tx: broadcast::Sender<BroadcastEvent>) -> Self {
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives a copy of every event.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<BroadcastEvent> {
        &self.tx
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_playback, PlaybackEvent, Playback);
    impl_emit!(emit_device, DeviceEvent, Device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExternal(AtomicUsize);

    impl EventEmitter for CountingExternal {
        fn emit_playback(&self, _event: PlaybackEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_device(&self, _event: DeviceEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn bridge_forwards_to_subscribers_and_external() {
        let bridge = BroadcastEventBridge::new(16);
        let external = Arc::new(CountingExternal(AtomicUsize::new(0)));
        bridge.set_external_emitter(external.clone());
        let mut rx = bridge.subscribe();

        bridge.emit_device(DeviceEvent::NetworkState { is_up: true });
        bridge.emit_playback(PlaybackEvent::PlayStateChanged { is_playing: false });

        assert_eq!(
            rx.recv().await.unwrap(),
            BroadcastEvent::Device(DeviceEvent::NetworkState { is_up: true })
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            BroadcastEvent::Playback(PlaybackEvent::PlayStateChanged { is_playing: false })
        );
        assert_eq!(external.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_receivers_does_not_panic() {
        let bridge = BroadcastEventBridge::new(4);
        bridge.emit_device(DeviceEvent::NetworkState { is_up: false });
    }
}
