//! Routes user commands to the one active backend.
//!
//! Both backends stay constructed. Selecting a device fully deselects the
//! current backend before the new one is bound, and selections and commands
//! are serialized so two backends are never active at once. Backend events
//! are republished only while their backend is the active one.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::backend::{BackendKind, BackendState, PlaybackBackend};
use super::playlist::PlaylistStore;
use super::PlaybackResult;
use crate::events::{EventEmitter, PlaybackEvent};
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::upnp::Device;

/// Stream of playback events returned by [`PlaybackRouter::subscribe`].
pub type PlaybackEventStream = Pin<Box<dyn Stream<Item = PlaybackEvent> + Send>>;

/// A user command forwarded to the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Resume,
    Stop,
    SeekTo(u64),
    Next,
    Previous,
    PlayIndex(usize),
}

/// Forwards events from the active backend to router subscribers.
#[derive(Clone)]
struct Republisher {
    active: Arc<RwLock<Option<BackendKind>>>,
    playlist: Arc<dyn PlaylistStore>,
    events_tx: broadcast::Sender<PlaybackEvent>,
    emitter: Arc<dyn EventEmitter>,
}

impl Republisher {
    fn publish(&self, event: PlaybackEvent) {
        self.emitter.emit_playback(event.clone());
        let _ = self.events_tx.send(event);
    }

    fn forward(&self, from: BackendKind, event: PlaybackEvent) {
        if *self.active.read() != Some(from) {
            log::trace!("[Router] Dropping {:?} event from inactive {:?}", event, from);
            return;
        }
        if let PlaybackEvent::SongIndexChanged { index } = &event {
            self.playlist.set_current_index(*index);
        }
        self.publish(event);
    }
}

pub struct PlaybackRouter {
    local: Arc<dyn PlaybackBackend>,
    remote: Arc<dyn PlaybackBackend>,
    republisher: Republisher,
    /// Serializes selections and commands.
    ops: tokio::sync::Mutex<()>,
    selected: Mutex<Option<Device>>,
    /// Set once the current selection's `ControlsConnected` reached someone.
    controls_delivered: AtomicBool,
    repeat: Arc<AtomicBool>,
    cancel_token: CancellationToken,
}

impl PlaybackRouter {
    /// Creates the router and starts forwarding both backends' events.
    ///
    /// `repeat` is the flag the backends' completion policy reads.
    pub fn new(
        local: Arc<dyn PlaybackBackend>,
        remote: Arc<dyn PlaybackBackend>,
        repeat: Arc<AtomicBool>,
        emitter: Arc<dyn EventEmitter>,
        spawner: &TokioSpawner,
        cancel_token: CancellationToken,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let republisher = Republisher {
            active: Arc::new(RwLock::new(None)),
            playlist: local.playlist(),
            events_tx,
            emitter,
        };

        for backend in [&local, &remote] {
            let kind = backend.kind();
            let mut rx = backend.subscribe();
            let republisher = republisher.clone();
            let token = cancel_token.clone();
            spawner.spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        received = rx.recv() => match received {
                            Ok(event) => republisher.forward(kind, event),
                            Err(RecvError::Lagged(n)) => {
                                log::warn!("[Router] {:?} events lagged by {}", kind, n);
                            }
                            Err(RecvError::Closed) => break,
                        },
                    }
                }
            });
        }

        Self {
            local,
            remote,
            republisher,
            ops: tokio::sync::Mutex::new(()),
            selected: Mutex::new(None),
            controls_delivered: AtomicBool::new(false),
            repeat,
            cancel_token,
        }
    }

    fn backend(&self, kind: BackendKind) -> &Arc<dyn PlaybackBackend> {
        match kind {
            BackendKind::Local => &self.local,
            BackendKind::Remote => &self.remote,
        }
    }

    /// Kind of the active backend, if any.
    pub fn active_kind(&self) -> Option<BackendKind> {
        *self.republisher.active.read()
    }

    pub fn selected_device(&self) -> Option<Device> {
        self.selected.lock().clone()
    }

    pub fn set_repeat(&self, repeat: bool) {
        log::info!("[Router] Repeat {}", if repeat { "on" } else { "off" });
        self.repeat.store(repeat, Ordering::SeqCst);
    }

    pub fn repeat(&self) -> bool {
        self.repeat.load(Ordering::SeqCst)
    }

    /// Makes `device` the render target.
    ///
    /// The previous backend is stopped, reset and unbound before the new one
    /// is bound. On failure no backend is active.
    pub async fn select_device(&self, device: Device) -> PlaybackResult<()> {
        let _ops = self.ops.lock().await;
        self.deactivate().await;

        let kind = if device.is_local {
            BackendKind::Local
        } else {
            BackendKind::Remote
        };
        if let Err(e) = self.backend(kind).select(&device).await {
            log::warn!(
                "[Router] Failed to select {}: {}",
                device.display_name(),
                e
            );
            return Err(e);
        }

        log::info!(
            "[Router] Active backend {:?} ({})",
            kind,
            device.display_name()
        );
        *self.republisher.active.write() = Some(kind);
        *self.selected.lock() = Some(device.clone());

        let delivered = self.republisher.events_tx.receiver_count() > 0;
        self.controls_delivered.store(delivered, Ordering::SeqCst);
        self.republisher
            .publish(PlaybackEvent::ControlsConnected { device });
        Ok(())
    }

    /// Deselects the active backend, leaving none active.
    pub async fn clear_selection(&self) {
        let _ops = self.ops.lock().await;
        self.deactivate().await;
    }

    /// Callers hold the ops lock.
    ///
    /// The backend's own events are dropped once it is no longer active, so
    /// the stop it reports while being deselected is published from here.
    async fn deactivate(&self) {
        let previous = self.republisher.active.write().take();
        *self.selected.lock() = None;
        let Some(kind) = previous else {
            return;
        };

        let backend = self.backend(kind);
        let was_playing = matches!(
            backend.state(),
            BackendState::Playing | BackendState::Paused | BackendState::Preparing
        );
        log::info!("[Router] Deselecting {:?} backend", kind);
        backend.deselect().await;
        if was_playing {
            self.republisher
                .publish(PlaybackEvent::PlayStateChanged { is_playing: false });
        }
    }

    /// Forwards a command to the active backend. A no-op when none is active.
    pub async fn command(&self, command: PlaybackCommand) -> PlaybackResult<()> {
        let _ops = self.ops.lock().await;
        let Some(kind) = self.active_kind() else {
            log::debug!("[Router] {:?} ignored, no active backend", command);
            return Ok(());
        };
        let backend = self.backend(kind);

        let result = match command {
            PlaybackCommand::Play => backend.play().await,
            PlaybackCommand::Pause => backend.pause().await,
            PlaybackCommand::Resume => backend.resume().await,
            PlaybackCommand::Stop => {
                backend.stop().await;
                Ok(())
            }
            PlaybackCommand::SeekTo(position_ms) => backend.seek_to(position_ms).await,
            PlaybackCommand::Next => backend.play_next().await,
            PlaybackCommand::Previous => backend.play_previous().await,
            PlaybackCommand::PlayIndex(index) => backend.play_index(index).await,
        };
        if let Err(e) = &result {
            log::warn!("[Router] {:?} on {:?} failed: {}", command, kind, e);
        }
        result
    }

    /// Subscribes to republished playback events.
    ///
    /// If a device was selected while nobody was listening, the first
    /// subscriber starts with its `ControlsConnected`.
    pub fn subscribe(&self) -> PlaybackEventStream {
        let rx = self.republisher.events_tx.subscribe();
        let replay = self.selected.lock().clone().and_then(|device| {
            (!self.controls_delivered.swap(true, Ordering::SeqCst))
                .then_some(PlaybackEvent::ControlsConnected { device })
        });

        let live = BroadcastStream::new(rx).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(e) => {
                log::warn!("[Router] Subscriber lagged: {}", e);
                None
            }
        });
        Box::pin(tokio_stream::iter(replay).chain(live))
    }

    /// Deselects the active backend and stops forwarding events.
    pub async fn shutdown(&self) {
        self.clear_selection().await;
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;

    use crate::events::NoopEventEmitter;
    use crate::playback::playlist::test_playlist;
    use crate::playback::PlaybackError;

    /// Backend that records calls into a log shared with its sibling.
    struct RecordingBackend {
        kind: BackendKind,
        log: Arc<Mutex<Vec<String>>>,
        playlist: Arc<dyn PlaylistStore>,
        events_tx: broadcast::Sender<PlaybackEvent>,
        state: Mutex<BackendState>,
        fail_select: bool,
    }

    impl RecordingBackend {
        fn new(
            kind: BackendKind,
            log: Arc<Mutex<Vec<String>>>,
            playlist: Arc<dyn PlaylistStore>,
        ) -> Self {
            let (events_tx, _) = broadcast::channel(16);
            Self {
                kind,
                log,
                playlist,
                events_tx,
                state: Mutex::new(BackendState::Idle),
                fail_select: false,
            }
        }

        fn record(&self, call: &str) {
            self.log.lock().push(format!("{:?}.{}", self.kind, call));
        }
    }

    #[async_trait]
    impl PlaybackBackend for RecordingBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn state(&self) -> BackendState {
            *self.state.lock()
        }

        fn current_index(&self) -> Option<usize> {
            None
        }

        fn playlist(&self) -> Arc<dyn PlaylistStore> {
            self.playlist.clone()
        }

        fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
            self.events_tx.subscribe()
        }

        async fn select(&self, _device: &Device) -> PlaybackResult<()> {
            // Yield so concurrent selections get a chance to interleave.
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.record("select");
            if self.fail_select {
                return Err(PlaybackError::NotSelected);
            }
            Ok(())
        }

        async fn deselect(&self) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.record("deselect");
            let previous = std::mem::replace(&mut *self.state.lock(), BackendState::Idle);
            if previous == BackendState::Playing {
                let _ = self
                    .events_tx
                    .send(PlaybackEvent::PlayStateChanged { is_playing: false });
            }
        }

        async fn play(&self) -> PlaybackResult<()> {
            self.record("play");
            *self.state.lock() = BackendState::Playing;
            let _ = self
                .events_tx
                .send(PlaybackEvent::SongIndexChanged { index: Some(2) });
            Ok(())
        }

        async fn pause(&self) -> PlaybackResult<()> {
            self.record("pause");
            Ok(())
        }

        async fn resume(&self) -> PlaybackResult<()> {
            self.record("resume");
            Ok(())
        }

        async fn stop(&self) {
            self.record("stop");
        }

        async fn reset(&self) {
            self.record("reset");
        }

        async fn seek_to(&self, position_ms: u64) -> PlaybackResult<()> {
            self.record(&format!("seek {}", position_ms));
            Ok(())
        }

        async fn play_index(&self, index: usize) -> PlaybackResult<()> {
            self.record(&format!("play_index {}", index));
            Ok(())
        }
    }

    struct Fixture {
        router: Arc<PlaybackRouter>,
        log: Arc<Mutex<Vec<String>>>,
        playlist: Arc<dyn PlaylistStore>,
    }

    fn fixture_with(fail_remote_select: bool) -> Fixture {
        let log = Arc::new(Mutex::new(Vec::new()));
        let playlist: Arc<dyn PlaylistStore> = Arc::new(test_playlist(3));
        let local = RecordingBackend::new(BackendKind::Local, log.clone(), playlist.clone());
        let mut remote = RecordingBackend::new(BackendKind::Remote, log.clone(), playlist.clone());
        remote.fail_select = fail_remote_select;

        let router = PlaybackRouter::new(
            Arc::new(local),
            Arc::new(remote),
            Arc::new(AtomicBool::new(false)),
            Arc::new(NoopEventEmitter),
            &TokioSpawner::current(),
            CancellationToken::new(),
        );
        Fixture {
            router: Arc::new(router),
            log,
            playlist,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(false)
    }

    fn renderer() -> Device {
        let mut device = Device::new("192.168.1.50", "desc.xml", 80);
        device.mark_capable("192.168.1.50:80/ctrl".to_string(), None);
        device
    }

    async fn next(stream: &mut PlaybackEventStream) -> PlaybackEvent {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("event within timeout")
            .expect("stream open")
    }

    #[tokio::test]
    async fn commands_without_backend_are_noops() {
        let f = fixture();
        f.router.command(PlaybackCommand::Play).await.unwrap();
        f.router.command(PlaybackCommand::Next).await.unwrap();
        assert!(f.log.lock().is_empty());
    }

    #[tokio::test]
    async fn switching_deselects_before_selecting() {
        let f = fixture();
        f.router.select_device(Device::local("Here")).await.unwrap();
        f.router.select_device(renderer()).await.unwrap();
        f.router.select_device(Device::local("Here")).await.unwrap();

        assert_eq!(
            *f.log.lock(),
            vec![
                "Local.select",
                "Local.deselect",
                "Remote.select",
                "Remote.deselect",
                "Local.select"
            ]
        );
        assert_eq!(f.router.active_kind(), Some(BackendKind::Local));
    }

    #[tokio::test]
    async fn concurrent_selects_leave_one_backend_active() {
        let f = fixture();
        let (a, b) = (f.router.clone(), f.router.clone());
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.select_device(Device::local("Here")).await }),
            tokio::spawn(async move { b.select_device(renderer()).await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let log = f.log.lock().clone();
        assert_eq!(log.len(), 3);
        // The second selection always deselects the first before binding.
        assert!(log[1].ends_with(".deselect"));
        assert_eq!(log[0].split('.').next(), log[1].split('.').next());
        let active = f.router.active_kind().unwrap();
        assert_eq!(log[2], format!("{:?}.select", active));
    }

    #[tokio::test]
    async fn failed_select_leaves_no_active_backend() {
        let f = fixture_with(true);
        f.router.select_device(Device::local("Here")).await.unwrap();
        assert!(f.router.select_device(renderer()).await.is_err());

        assert_eq!(f.router.active_kind(), None);
        assert_eq!(f.router.selected_device(), None);
        f.router.command(PlaybackCommand::Pause).await.unwrap();
        assert!(!f.log.lock().contains(&"Local.pause".to_string()));
    }

    #[tokio::test]
    async fn commands_reach_active_backend() {
        let f = fixture();
        f.router.select_device(renderer()).await.unwrap();
        f.router.command(PlaybackCommand::SeekTo(42)).await.unwrap();
        f.router.command(PlaybackCommand::PlayIndex(1)).await.unwrap();
        f.router.command(PlaybackCommand::Stop).await.unwrap();

        assert_eq!(
            f.log.lock()[1..],
            ["Remote.seek 42", "Remote.play_index 1", "Remote.stop"].map(String::from)
        );
    }

    #[tokio::test]
    async fn republishes_and_writes_index_through() {
        let f = fixture();
        let mut events = f.router.subscribe();
        f.router.select_device(Device::local("Here")).await.unwrap();
        assert!(matches!(
            next(&mut events).await,
            PlaybackEvent::ControlsConnected { .. }
        ));

        f.router.command(PlaybackCommand::Play).await.unwrap();

        assert_eq!(
            next(&mut events).await,
            PlaybackEvent::SongIndexChanged { index: Some(2) }
        );
        assert_eq!(f.playlist.current_index(), Some(2));
    }

    #[tokio::test]
    async fn inactive_backend_events_are_dropped() {
        let f = fixture();
        f.router.select_device(Device::local("Here")).await.unwrap();
        let mut events = f.router.subscribe();
        events.next().await;

        // The inactive backend announces a song change on its own.
        f.router.remote.play().await.unwrap();

        assert!(
            tokio::time::timeout(Duration::from_millis(100), events.next())
                .await
                .is_err()
        );
        assert_eq!(f.playlist.current_index(), None);
    }

    #[tokio::test]
    async fn switching_away_from_playing_backend_publishes_stop() {
        let f = fixture();
        let mut events = f.router.subscribe();
        f.router.select_device(Device::local("Here")).await.unwrap();
        next(&mut events).await;
        f.router.command(PlaybackCommand::Play).await.unwrap();
        next(&mut events).await;

        f.router.select_device(renderer()).await.unwrap();

        assert_eq!(
            next(&mut events).await,
            PlaybackEvent::PlayStateChanged { is_playing: false }
        );
        match next(&mut events).await {
            PlaybackEvent::ControlsConnected { device } => assert_eq!(device, renderer()),
            other => panic!("unexpected event: {:?}", other),
        }
        // The deselected backend's own stop is not forwarded a second time.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), events.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn switching_away_from_idle_backend_stays_quiet() {
        let f = fixture();
        let mut events = f.router.subscribe();
        f.router.select_device(Device::local("Here")).await.unwrap();
        next(&mut events).await;

        f.router.select_device(renderer()).await.unwrap();

        assert!(matches!(
            next(&mut events).await,
            PlaybackEvent::ControlsConnected { .. }
        ));
    }

    #[tokio::test]
    async fn late_subscriber_gets_controls_once() {
        let f = fixture();
        f.router.select_device(renderer()).await.unwrap();

        let mut first = f.router.subscribe();
        match next(&mut first).await {
            PlaybackEvent::ControlsConnected { device } => assert_eq!(device, renderer()),
            other => panic!("unexpected event: {:?}", other),
        }

        let mut second = f.router.subscribe();
        assert!(
            tokio::time::timeout(Duration::from_millis(100), second.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn repeat_flag_is_shared() {
        let f = fixture();
        assert!(!f.router.repeat());
        f.router.set_repeat(true);
        assert!(f.router.repeat());
    }
}
