//! The playback backend contract and the state both backends share.
//!
//! States run `Idle → Preparing → Playing ⇄ Paused`; `stop`/`reset` return
//! to `Idle` from anywhere. Commands and track completion on one backend are
//! serialized through [`BackendCore::lock_ops`]. Every start, pause and stop
//! bumps the generation so in-flight ticks can tell they are stale.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use super::playlist::{completion_advance, next_wrapping, previous_wrapping, PlaylistStore, Song};
use super::ticker::PositionTicker;
use super::wake::WakeLock;
use super::{PlaybackError, PlaybackResult};
use crate::events::PlaybackEvent;
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::runtime::TokioSpawner;
use crate::upnp::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendState {
    Idle,
    Preparing,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendKind {
    Local,
    Remote,
}

/// Collaborators both backends are built from.
#[derive(Clone)]
pub struct PlaybackShared {
    pub playlist: Arc<dyn PlaylistStore>,
    pub wake: Arc<dyn WakeLock>,
    /// Repeat flag read by the completion policy; toggled by the router.
    pub repeat: Arc<AtomicBool>,
    pub poll_interval: Duration,
    pub spawner: TokioSpawner,
}

/// A render target the router can forward commands to.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn state(&self) -> BackendState;

    /// Index of the song being played, or last played.
    fn current_index(&self) -> Option<usize>;

    fn playlist(&self) -> Arc<dyn PlaylistStore>;

    /// Returns a receiver for this backend's events.
    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent>;

    /// Binds the backend to a device.
    async fn select(&self, device: &Device) -> PlaybackResult<()>;

    /// Stops, resets and unbinds.
    async fn deselect(&self);

    /// Starts the current song from Idle, or resumes from Paused.
    async fn play(&self) -> PlaybackResult<()>;

    async fn pause(&self) -> PlaybackResult<()>;

    async fn resume(&self) -> PlaybackResult<()>;

    async fn stop(&self);

    /// Stops and clears per-session state. The device binding is kept.
    async fn reset(&self);

    async fn seek_to(&self, position_ms: u64) -> PlaybackResult<()>;

    async fn play_index(&self, index: usize) -> PlaybackResult<()>;

    /// Plays the next song, wrapping to the first. No-op on an empty playlist.
    async fn play_next(&self) -> PlaybackResult<()> {
        match next_wrapping(self.current_index(), self.playlist().len()) {
            Some(index) => self.play_index(index).await,
            None => Ok(()),
        }
    }

    /// Plays the previous song, wrapping to the last. No-op on an empty
    /// playlist.
    async fn play_previous(&self) -> PlaybackResult<()> {
        match previous_wrapping(self.current_index(), self.playlist().len()) {
            Some(index) => self.play_index(index).await,
            None => Ok(()),
        }
    }
}

/// State machine plumbing shared by both backends.
pub(crate) struct BackendCore {
    kind: BackendKind,
    state: Mutex<BackendState>,
    current: Mutex<Option<usize>>,
    playlist: Arc<dyn PlaylistStore>,
    wake: Arc<dyn WakeLock>,
    repeat: Arc<AtomicBool>,
    events_tx: broadcast::Sender<PlaybackEvent>,
    generation: AtomicU64,
    pub(crate) ticker: PositionTicker,
    ops: tokio::sync::Mutex<()>,
}

impl BackendCore {
    pub(crate) fn new(kind: BackendKind, shared: PlaybackShared) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            kind,
            state: Mutex::new(BackendState::Idle),
            current: Mutex::new(None),
            playlist: shared.playlist,
            wake: shared.wake,
            repeat: shared.repeat,
            events_tx,
            generation: AtomicU64::new(0),
            ticker: PositionTicker::new(shared.poll_interval, shared.spawner),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) async fn lock_ops(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.ops.lock().await
    }

    pub(crate) fn state(&self) -> BackendState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: BackendState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            log::trace!("[{:?}] {:?} -> {:?}", self.kind, previous, state);
        }
    }

    pub(crate) fn current_index(&self) -> Option<usize> {
        *self.current.lock()
    }

    pub(crate) fn playlist(&self) -> Arc<dyn PlaylistStore> {
        Arc::clone(&self.playlist)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: PlaybackEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Starts a new generation and returns it.
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn invalid(&self, action: &'static str) -> PlaybackError {
        PlaybackError::InvalidTransition {
            action,
            state: self.state(),
        }
    }

    /// Picks up the persisted index when binding to a device.
    pub(crate) fn sync_index_from_store(&self) {
        *self.current.lock() = self.playlist.current_index();
    }

    /// Index `play` starts from: the current song if valid, else the first.
    pub(crate) fn start_index(&self) -> Option<usize> {
        let len = self.playlist.len();
        if len == 0 {
            return None;
        }
        Some(self.current_index().filter(|&i| i < len).unwrap_or(0))
    }

    pub(crate) fn song(&self, index: usize) -> PlaybackResult<Song> {
        self.playlist.song(index).ok_or(PlaybackError::NoSong)
    }

    /// Index the completion policy continues with.
    pub(crate) fn completion_target(&self) -> Option<usize> {
        completion_advance(
            self.current_index(),
            self.playlist.len(),
            self.repeat.load(Ordering::SeqCst),
        )
    }

    /// Prepares for a new song: stops ticking and starts a new generation.
    pub(crate) fn begin_preparing(&self) -> u64 {
        self.ticker.stop();
        self.set_state(BackendState::Preparing);
        self.next_generation()
    }

    /// Enters Playing on `index` and announces it.
    pub(crate) fn enter_playing(&self, index: usize) {
        self.set_state(BackendState::Playing);
        *self.current.lock() = Some(index);
        self.wake.acquire(self.kind);
        self.emit(PlaybackEvent::SongIndexChanged { index: Some(index) });
        self.emit(PlaybackEvent::PlayStateChanged { is_playing: true });
    }

    /// Enters Playing again after a pause.
    pub(crate) fn enter_resumed(&self) -> u64 {
        self.set_state(BackendState::Playing);
        self.wake.acquire(self.kind);
        self.emit(PlaybackEvent::PlayStateChanged { is_playing: true });
        self.next_generation()
    }

    pub(crate) fn enter_paused(&self) {
        self.ticker.stop();
        self.next_generation();
        self.set_state(BackendState::Paused);
        self.wake.release(self.kind);
        self.emit(PlaybackEvent::PlayStateChanged { is_playing: false });
    }

    /// Returns to Idle from any state and releases the wake resource.
    pub(crate) fn enter_idle(&self) {
        self.ticker.stop();
        self.next_generation();
        let was_playing = matches!(
            self.state(),
            BackendState::Playing | BackendState::Paused | BackendState::Preparing
        );
        self.set_state(BackendState::Idle);
        self.wake.release(self.kind);
        if was_playing {
            self.emit(PlaybackEvent::PlayStateChanged { is_playing: false });
        }
    }

    /// Ran off the end of the playlist: Idle with no current song.
    pub(crate) fn finish_playlist(&self) {
        log::info!("[{:?}] End of playlist", self.kind);
        self.enter_idle();
        *self.current.lock() = None;
        self.emit(PlaybackEvent::SongIndexChanged { index: None });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::playback::playlist::test_playlist;
    use crate::playback::wake::SharedWakeLock;

    fn core(songs: usize) -> (BackendCore, Arc<SharedWakeLock>) {
        let wake = Arc::new(SharedWakeLock::new());
        let shared = PlaybackShared {
            playlist: Arc::new(test_playlist(songs)),
            wake: wake.clone(),
            repeat: Arc::new(AtomicBool::new(false)),
            poll_interval: Duration::from_secs(1),
            spawner: TokioSpawner::current(),
        };
        (BackendCore::new(BackendKind::Local, shared), wake)
    }

    #[tokio::test]
    async fn playing_holds_wake_until_idle() {
        let (core, wake) = core(2);
        let mut events = core.subscribe();

        core.begin_preparing();
        core.enter_playing(1);
        assert_eq!(wake.holder(), Some(BackendKind::Local));
        assert_eq!(core.current_index(), Some(1));

        core.enter_idle();
        assert_eq!(core.state(), BackendState::Idle);
        assert_eq!(wake.holder(), None);

        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::SongIndexChanged { index: Some(1) }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::PlayStateChanged { is_playing: true }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::PlayStateChanged { is_playing: false }
        );
    }

    #[tokio::test]
    async fn generations_invalidate_older_work() {
        let (core, _) = core(1);
        let first = core.begin_preparing();
        assert!(core.is_current(first));
        core.enter_paused();
        assert!(!core.is_current(first));
    }

    #[tokio::test]
    async fn start_index_falls_back_to_first_song() {
        let (three, _) = core(3);
        assert_eq!(three.start_index(), Some(0));
        three.playlist.set_current_index(Some(2));
        three.sync_index_from_store();
        assert_eq!(three.start_index(), Some(2));
        three.playlist.set_current_index(Some(9));
        three.sync_index_from_store();
        assert_eq!(three.start_index(), Some(0));

        let (empty, _) = core(0);
        assert_eq!(empty.start_index(), None);
    }
}
