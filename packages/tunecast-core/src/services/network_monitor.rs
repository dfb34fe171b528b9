//! Network capability monitoring service.
//!
//! Responsibilities:
//! - Network up/down state machine
//! - Immediate scan on link-up, then periodic rescans
//! - Registry ownership and scan result commits
//! - Device availability fan-out with replay for late subscribers

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::events::{DeviceEvent, EventEmitter};
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::upnp::{Device, DeviceRegistry, RendererScanner};

/// Stream of device events returned by [`NetworkCapabilityMonitor::subscribe`].
pub type DeviceEventStream = Pin<Box<dyn Stream<Item = DeviceEvent> + Send>>;

struct MonitorState {
    is_up: bool,
    registry: DeviceRegistry,
    /// Bumped on every link-down; a scan commits only if it is unchanged.
    generation: u64,
    /// Cancels the running rescan loop.
    scan_cancel: Option<CancellationToken>,
}

/// Watches network availability and keeps the renderer registry current.
pub struct NetworkCapabilityMonitor {
    scanner: RendererScanner,
    state: Mutex<MonitorState>,
    /// Single-flight guard for scans.
    scan_lock: tokio::sync::Mutex<()>,
    events_tx: broadcast::Sender<DeviceEvent>,
    emitter: Arc<dyn EventEmitter>,
    rescan_interval: Duration,
    spawner: TokioSpawner,
    /// Parent token; cancelling it stops every loop this monitor started.
    cancel_token: CancellationToken,
}

impl NetworkCapabilityMonitor {
    pub fn new(
        scanner: RendererScanner,
        emitter: Arc<dyn EventEmitter>,
        rescan_interval: Duration,
        spawner: TokioSpawner,
        cancel_token: CancellationToken,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            scanner,
            state: Mutex::new(MonitorState {
                is_up: false,
                registry: DeviceRegistry::new(),
                generation: 0,
                scan_cancel: None,
            }),
            scan_lock: tokio::sync::Mutex::new(()),
            events_tx,
            emitter,
            rescan_interval,
            spawner,
            cancel_token,
        }
    }

    /// Returns whether the network is currently considered up.
    pub fn is_up(&self) -> bool {
        self.state.lock().is_up
    }

    /// Returns a copy of the capable devices.
    pub fn devices(&self) -> Vec<Device> {
        self.state.lock().registry.capable()
    }

    /// Sends an event to live subscribers and the emitter.
    ///
    /// Callers hold the state lock so a concurrent [`Self::subscribe`] sees
    /// either the replayed state or the live event, never both or neither.
    fn emit(&self, event: DeviceEvent) {
        self.emitter.emit_device(event.clone());
        let _ = self.events_tx.send(event);
    }

    /// Applies a network availability notification.
    ///
    /// Down to up emits `NetworkState(true)`, scans immediately and then
    /// every rescan interval. Up to down stops the loop, discards in-flight
    /// scan results, empties the registry and reports every capable device
    /// as unavailable. Repeated notifications of the current state are
    /// ignored.
    pub fn on_network_change(self: &Arc<Self>, is_up: bool) {
        let mut state = self.state.lock();
        if state.is_up == is_up {
            log::trace!("[Monitor] Network already {}", if is_up { "up" } else { "down" });
            return;
        }
        state.is_up = is_up;

        if is_up {
            log::info!("[Monitor] Network up, starting renderer scans");
            self.emit(DeviceEvent::NetworkState { is_up: true });

            let token = self.cancel_token.child_token();
            state.scan_cancel = Some(token.clone());
            drop(state);

            let this = Arc::clone(self);
            self.spawner.spawn(async move {
                this.run_scan_loop(token).await;
            });
        } else {
            log::info!("[Monitor] Network down, clearing renderers");
            if let Some(token) = state.scan_cancel.take() {
                token.cancel();
            }
            state.generation += 1;

            let lost: Vec<Device> = state
                .registry
                .clear()
                .into_iter()
                .filter(Device::is_capable)
                .collect();
            if !lost.is_empty() {
                self.emit(DeviceEvent::DevicesUnavailable { devices: lost });
            }
            self.emit(DeviceEvent::NetworkState { is_up: false });
        }
    }

    /// Scans immediately, then sleeps the rescan interval after each scan
    /// finishes, until cancelled.
    async fn run_scan_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.scan_now() => {}
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.rescan_interval) => {}
            }
        }
        log::debug!("[Monitor] Scan loop stopped");
    }

    /// Runs one serialized scan and commits its result.
    ///
    /// The scan works on a copy of the registry. Its result is dropped if the
    /// network went down (or down and up again) while it ran. Returns whether
    /// the result was committed.
    pub async fn scan_now(&self) -> bool {
        let _guard = self.scan_lock.lock().await;

        let (generation, mut working) = {
            let state = self.state.lock();
            if !state.is_up {
                log::debug!("[Monitor] Skipping scan, network down");
                return false;
            }
            (state.generation, state.registry.clone())
        };

        let before = working.snapshot();
        let pass = match self.scanner.discover_once(&mut working).await {
            Ok(pass) => pass,
            Err(e) => {
                log::warn!("[Monitor] Discovery pass failed: {}", e);
                return false;
            }
        };

        let missing = DeviceRegistry::diff(&before, &pass.seen);
        for device in &missing {
            working.remove(device);
        }

        let mut state = self.state.lock();
        if state.generation != generation || !state.is_up {
            log::debug!("[Monitor] Discarding stale scan result");
            return false;
        }
        state.registry = working;

        let lost: Vec<Device> = missing.into_iter().filter(Device::is_capable).collect();
        if !lost.is_empty() {
            log::info!("[Monitor] {} renderer(s) no longer responding", lost.len());
            self.emit(DeviceEvent::DevicesUnavailable { devices: lost });
        }
        for device in pass.newly_capable {
            log::info!("[Monitor] New renderer: {}", device.display_name());
            self.emit(DeviceEvent::NewDeviceDetected { device });
        }
        true
    }

    /// Subscribes to device events.
    ///
    /// The stream first yields the current network state and a
    /// `NewDeviceDetected` for every known capable device, then live events.
    /// Dropping the stream unsubscribes.
    pub fn subscribe(&self) -> DeviceEventStream {
        let (replay, rx) = {
            let state = self.state.lock();
            let mut replay = vec![DeviceEvent::NetworkState {
                is_up: state.is_up,
            }];
            replay.extend(
                state
                    .registry
                    .capable()
                    .into_iter()
                    .map(|device| DeviceEvent::NewDeviceDetected { device }),
            );
            (replay, self.events_tx.subscribe())
        };

        let live = BroadcastStream::new(rx).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(e) => {
                log::warn!("[Monitor] Subscriber lagged: {}", e);
                None
            }
        });
        Box::pin(tokio_stream::iter(replay).chain(live))
    }

    /// Stops the scan loop.
    pub fn shutdown(&self) {
        if let Some(token) = self.state.lock().scan_cancel.take() {
            token.cancel();
        }
    }
}
