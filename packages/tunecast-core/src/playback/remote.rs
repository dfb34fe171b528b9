//! Playback on a UPnP renderer through AVTransport.
//!
//! The renderer pulls audio over HTTP, either from the song source's own
//! base URL or from our static file server. Position is polled once per tick
//! with `GetPositionInfo` and fed to the [`EndOfTrackDetector`], since
//! renderers never report completion themselves.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::backend::{BackendCore, BackendKind, BackendState, PlaybackBackend, PlaybackShared};
use super::end_of_track::{EndOfTrackDetector, TrackEndDecision};
use super::playlist::{PlaylistStore, Song};
use super::ticker::TickFlow;
use super::{PlaybackError, PlaybackResult};
use crate::context::{join_url, NetworkContext};
use crate::events::PlaybackEvent;
use crate::state::EndOfTrackConfig;
use crate::upnp::{AvTransport, Device, TrackMetadata};

pub struct RemoteBackend {
    core: BackendCore,
    transport: Arc<dyn AvTransport>,
    network: NetworkContext,
    control_url: Mutex<Option<String>>,
    detector: Mutex<EndOfTrackDetector>,
    weak_self: Weak<Self>,
}

impl RemoteBackend {
    pub fn new(
        transport: Arc<dyn AvTransport>,
        network: NetworkContext,
        end_of_track: EndOfTrackConfig,
        shared: PlaybackShared,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BackendCore::new(BackendKind::Remote, shared),
            transport,
            network,
            control_url: Mutex::new(None),
            detector: Mutex::new(EndOfTrackDetector::new(end_of_track)),
            weak_self: weak_self.clone(),
        })
    }

    /// Control URL of the bound renderer.
    pub fn control_url(&self) -> Option<String> {
        self.control_url.lock().clone()
    }

    fn require_control_url(&self) -> PlaybackResult<String> {
        self.control_url().ok_or(PlaybackError::NotSelected)
    }

    /// URL the renderer fetches the song from.
    fn playable_url(&self, song: &Song) -> PlaybackResult<String> {
        let url = match &song.source.remote_base_url {
            Some(base) => join_url(base, &song.path)?,
            None => self.network.media_url(&song.path)?,
        };
        Ok(url)
    }

    /// Loads and starts `index`. Callers hold the ops lock.
    async fn start_song(&self, index: usize) -> PlaybackResult<()> {
        let control_url = self.require_control_url()?;
        let song = self.core.song(index)?;
        let url = self.playable_url(&song)?;

        self.core.begin_preparing();
        self.detector.lock().reset();
        log::info!("[Remote] Loading song {} ({}) on {}", index, url, control_url);

        let track = TrackMetadata {
            title: &song.title,
            artist: &song.artist,
        };
        let started = async {
            self.transport
                .set_av_transport_uri(&control_url, &url, track)
                .await?;
            self.transport.play(&control_url).await
        }
        .await;

        if let Err(e) = started {
            log::warn!("[Remote] Failed to start song {}: {}", index, e);
            self.core.enter_idle();
            return Err(e.into());
        }

        self.core.enter_playing(index);
        let generation = self.core.next_generation();
        self.start_ticker(generation);
        Ok(())
    }

    fn start_ticker(&self, generation: u64) {
        let weak = self.weak_self.clone();
        self.core.ticker.start(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(this) => this.on_tick(generation).await,
                    None => TickFlow::Stop,
                }
            }
        });
    }

    /// One position poll. Results from an older generation are dropped.
    async fn on_tick(&self, generation: u64) -> TickFlow {
        let Some(control_url) = self.control_url() else {
            return TickFlow::Stop;
        };

        let polled = self.transport.get_position_info(&control_url).await;

        let _ops = self.core.lock_ops().await;
        if !self.core.is_current(generation) {
            log::debug!("[Remote] Dropping stale position sample");
            return TickFlow::Stop;
        }

        let info = match polled {
            Ok(info) => info,
            Err(e) => {
                log::warn!("[Remote] Position poll failed: {}", e);
                return TickFlow::Continue;
            }
        };

        self.core.emit(PlaybackEvent::ProgressReport {
            position_ms: info.position_ms,
            duration_ms: info.duration_ms,
        });

        let decision = self
            .detector
            .lock()
            .observe(info.duration_ms, info.position_ms);
        match decision {
            TrackEndDecision::Continue => TickFlow::Continue,
            TrackEndDecision::Deferred => {
                log::debug!("[Remote] Track nearly done, deciding next tick");
                TickFlow::Continue
            }
            TrackEndDecision::Ended => {
                log::info!(
                    "[Remote] Track ended at {} of {}",
                    info.rel_time,
                    info.track_duration
                );
                self.core.ticker.stop();
                self.complete_track().await;
                TickFlow::Stop
            }
        }
    }

    /// Applies the completion policy. Callers hold the ops lock.
    async fn complete_track(&self) {
        match self.core.completion_target() {
            Some(next) => {
                if let Err(e) = self.start_song(next).await {
                    log::warn!("[Remote] Could not advance to song {}: {}", next, e);
                }
            }
            None => self.core.finish_playlist(),
        }
    }

    async fn resume_locked(&self) -> PlaybackResult<()> {
        if self.core.state() != BackendState::Paused {
            return Err(self.core.invalid("resume"));
        }
        let control_url = self.require_control_url()?;
        self.transport.play(&control_url).await.map_err(|e| {
            log::warn!("[Remote] Resume failed: {}", e);
            PlaybackError::from(e)
        })?;
        let generation = self.core.enter_resumed();
        self.start_ticker(generation);
        Ok(())
    }

    async fn stop_locked(&self) {
        if self.core.state() != BackendState::Idle {
            if let Some(control_url) = self.control_url() {
                if let Err(e) = self.transport.stop(&control_url).await {
                    log::warn!("[Remote] Stop failed: {}", e);
                }
            }
        }
        self.core.enter_idle();
    }
}

#[async_trait]
impl PlaybackBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn state(&self) -> BackendState {
        self.core.state()
    }

    fn current_index(&self) -> Option<usize> {
        self.core.current_index()
    }

    fn playlist(&self) -> Arc<dyn PlaylistStore> {
        self.core.playlist()
    }

    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.core.subscribe()
    }

    async fn select(&self, device: &Device) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        let control_url = device.control_url.clone().ok_or_else(|| {
            log::warn!("[Remote] {} has no control URL", device.display_name());
            PlaybackError::NotSelected
        })?;
        log::info!(
            "[Remote] Selected {} ({})",
            device.display_name(),
            control_url
        );
        *self.control_url.lock() = Some(control_url);
        self.core.sync_index_from_store();
        Ok(())
    }

    async fn deselect(&self) {
        let _ops = self.core.lock_ops().await;
        self.stop_locked().await;
        self.detector.lock().reset();
        if let Some(control_url) = self.control_url.lock().take() {
            log::info!("[Remote] Deselected {}", control_url);
        }
    }

    async fn play(&self) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        match self.core.state() {
            BackendState::Idle => {
                let index = self.core.start_index().ok_or(PlaybackError::NoSong)?;
                self.start_song(index).await
            }
            BackendState::Paused => self.resume_locked().await,
            BackendState::Playing | BackendState::Preparing => Err(self.core.invalid("play")),
        }
    }

    async fn pause(&self) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        if self.core.state() != BackendState::Playing {
            return Err(self.core.invalid("pause"));
        }
        let control_url = self.require_control_url()?;
        self.transport.pause(&control_url).await.map_err(|e| {
            log::warn!("[Remote] Pause failed: {}", e);
            PlaybackError::from(e)
        })?;
        self.core.enter_paused();
        Ok(())
    }

    async fn resume(&self) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        self.resume_locked().await
    }

    async fn stop(&self) {
        let _ops = self.core.lock_ops().await;
        self.stop_locked().await;
    }

    async fn reset(&self) {
        let _ops = self.core.lock_ops().await;
        self.stop_locked().await;
        self.detector.lock().reset();
    }

    async fn seek_to(&self, _position_ms: u64) -> PlaybackResult<()> {
        Err(PlaybackError::Unsupported("seek"))
    }

    async fn play_index(&self, index: usize) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        self.start_song(index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use crate::playback::playlist::{test_playlist, InMemoryPlaylist, Source};
    use crate::playback::wake::{SharedWakeLock, WakeLock};
    use crate::runtime::TokioSpawner;
    use crate::upnp::{PositionInfo, SoapError, SoapResult};

    const CONTROL_URL: &str = "192.168.1.50:80/ctrl";

    /// Records every call; position samples are served from a script.
    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<String>>,
        positions: Mutex<VecDeque<(u64, u64)>>,
        fail_set_uri: AtomicBool,
    }

    impl MockTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }
    }

    #[async_trait]
    impl AvTransport for MockTransport {
        async fn set_av_transport_uri(
            &self,
            _control_url: &str,
            uri: &str,
            track: TrackMetadata<'_>,
        ) -> SoapResult<()> {
            self.record(format!("SetAVTransportURI {} {}", uri, track.title));
            if self.fail_set_uri.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(SoapError::HttpStatus(500, "boom".to_string()));
            }
            Ok(())
        }

        async fn play(&self, _control_url: &str) -> SoapResult<()> {
            self.record("Play".to_string());
            Ok(())
        }

        async fn pause(&self, _control_url: &str) -> SoapResult<()> {
            self.record("Pause".to_string());
            Ok(())
        }

        async fn stop(&self, _control_url: &str) -> SoapResult<()> {
            self.record("Stop".to_string());
            Ok(())
        }

        async fn get_position_info(&self, _control_url: &str) -> SoapResult<PositionInfo> {
            self.record("GetPositionInfo".to_string());
            let (duration_ms, position_ms) =
                self.positions.lock().pop_front().unwrap_or((180_000, 1_000));
            Ok(PositionInfo {
                duration_ms,
                position_ms,
                ..Default::default()
            })
        }
    }

    struct Fixture {
        backend: Arc<RemoteBackend>,
        transport: Arc<MockTransport>,
        wake: Arc<SharedWakeLock>,
        playlist: Arc<InMemoryPlaylist>,
    }

    fn fixture_with(playlist: InMemoryPlaylist, repeat: bool) -> Fixture {
        let transport = Arc::new(MockTransport::default());
        let wake = Arc::new(SharedWakeLock::new());
        let playlist = Arc::new(playlist);
        let shared = PlaybackShared {
            playlist: playlist.clone(),
            wake: wake.clone(),
            repeat: Arc::new(AtomicBool::new(repeat)),
            poll_interval: Duration::from_secs(1),
            spawner: TokioSpawner::current(),
        };
        let network = NetworkContext::explicit(8080, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
        let backend = RemoteBackend::new(
            transport.clone(),
            network,
            EndOfTrackConfig::default(),
            shared,
        );
        Fixture {
            backend,
            transport,
            wake,
            playlist,
        }
    }

    fn renderer() -> Device {
        let mut device = Device::new("192.168.1.50", "desc.xml", 80);
        device.mark_capable(CONTROL_URL.to_string(), Some("Den".to_string()));
        device
    }

    async fn selected(songs: usize, repeat: bool) -> Fixture {
        let fixture = fixture_with(test_playlist(songs), repeat);
        fixture.backend.select(&renderer()).await.unwrap();
        fixture
    }

    #[tokio::test(start_paused = true)]
    async fn play_loads_uri_from_file_server_then_plays() {
        let f = selected(2, false).await;
        let mut events = f.backend.subscribe();

        f.backend.play().await.unwrap();

        assert_eq!(
            f.transport.calls(),
            vec![
                "SetAVTransportURI http://192.168.1.10:8080/song0.mp3 Song 0",
                "Play"
            ]
        );
        assert_eq!(f.backend.state(), BackendState::Playing);
        assert_eq!(f.wake.holder(), Some(BackendKind::Remote));
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::SongIndexChanged { index: Some(0) }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::PlayStateChanged { is_playing: true }
        );

        // Playing again is rejected without touching the renderer.
        assert!(matches!(
            f.backend.play().await,
            Err(PlaybackError::InvalidTransition { .. })
        ));
        assert_eq!(f.transport.calls().len(), 2);
        f.backend.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn remote_base_url_takes_precedence() {
        let playlist = InMemoryPlaylist::from_m3u(
            "albums/one.flac\n",
            Source {
                local_root: None,
                remote_base_url: Some("http://nas.local:8200/music/".to_string()),
            },
        );
        let f = fixture_with(playlist, false);
        f.backend.select(&renderer()).await.unwrap();

        f.backend.play().await.unwrap();
        assert_eq!(
            f.transport.calls()[0],
            "SetAVTransportURI http://nas.local:8200/music/albums/one.flac one"
        );
        f.backend.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_prepare_stays_idle_without_wake() {
        let f = selected(1, false).await;
        f.transport
            .fail_set_uri
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let result = f.backend.play().await;

        assert!(matches!(result, Err(PlaybackError::Soap(_))));
        assert_eq!(f.backend.state(), BackendState::Idle);
        assert_eq!(f.wake.holder(), None);
        assert!(!f.transport.calls().contains(&"Play".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn unselected_backend_refuses_to_play() {
        let f = fixture_with(test_playlist(1), false);
        assert!(matches!(
            f.backend.play().await,
            Err(PlaybackError::NotSelected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_resume_stop_cycle() {
        let f = selected(1, false).await;
        f.backend.play().await.unwrap();

        f.backend.pause().await.unwrap();
        assert_eq!(f.backend.state(), BackendState::Paused);
        assert_eq!(f.wake.holder(), None);
        assert!(matches!(
            f.backend.pause().await,
            Err(PlaybackError::InvalidTransition { .. })
        ));

        f.backend.play().await.unwrap();
        assert_eq!(f.backend.state(), BackendState::Playing);
        assert_eq!(f.wake.holder(), Some(BackendKind::Remote));

        f.backend.stop().await;
        assert_eq!(f.backend.state(), BackendState::Idle);
        assert_eq!(f.wake.holder(), None);
        assert_eq!(
            f.transport.calls()[2..],
            ["Pause", "Play", "Stop"].map(String::from)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn seek_is_unsupported() {
        let f = selected(1, false).await;
        assert!(matches!(
            f.backend.seek_to(1_000).await,
            Err(PlaybackError::Unsupported("seek"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn next_and_previous_wrap() {
        let f = selected(3, false).await;
        f.backend.play_index(2).await.unwrap();
        f.backend.play_next().await.unwrap();
        assert_eq!(f.backend.current_index(), Some(0));
        f.backend.play_previous().await.unwrap();
        assert_eq!(f.backend.current_index(), Some(2));
        f.backend.stop().await;

        let empty = selected(0, false).await;
        empty.backend.play_next().await.unwrap();
        empty.backend.play_previous().await.unwrap();
        assert!(empty.transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn select_restores_persisted_index() {
        let f = fixture_with(test_playlist(3), false);
        f.playlist.set_current_index(Some(1));
        f.backend.select(&renderer()).await.unwrap();
        f.backend.play().await.unwrap();
        assert_eq!(f.backend.current_index(), Some(1));
        f.backend.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_reports_progress_and_advances_at_track_end() {
        let f = selected(2, false).await;
        f.transport
            .positions
            .lock()
            .extend([(180_000, 60_000), (180_000, 179_900)]);
        let mut events = f.backend.subscribe();
        f.backend.play().await.unwrap();
        events.recv().await.unwrap();
        events.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::ProgressReport {
                position_ms: 60_000,
                duration_ms: 180_000
            }
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        events.recv().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            PlaybackEvent::SongIndexChanged { index: Some(1) }
        );
        assert_eq!(f.backend.current_index(), Some(1));
        assert_eq!(f.backend.state(), BackendState::Playing);
        f.backend.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn last_track_end_without_repeat_goes_idle() {
        let f = selected(1, false).await;
        f.transport.positions.lock().push_back((180_000, 179_900));
        let mut events = f.backend.subscribe();
        f.backend.play().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen[seen.len() - 2..],
            [
                PlaybackEvent::PlayStateChanged { is_playing: false },
                PlaybackEvent::SongIndexChanged { index: None },
            ]
        );
        assert_eq!(f.backend.state(), BackendState::Idle);
        assert_eq!(f.backend.current_index(), None);
        assert_eq!(f.wake.holder(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn last_track_end_with_repeat_wraps() {
        let f = selected(2, true).await;
        f.backend.play_index(1).await.unwrap();
        f.transport.positions.lock().push_back((180_000, 179_900));

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(f.backend.current_index(), Some(0));
        assert_eq!(f.backend.state(), BackendState::Playing);
        f.backend.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_polling() {
        let f = selected(1, false).await;
        f.backend.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        f.backend.stop().await;
        let polls = |calls: Vec<String>| calls.iter().filter(|c| *c == "GetPositionInfo").count();
        let before = polls(f.transport.calls());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(polls(f.transport.calls()), before);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sample_after_pause_is_dropped() {
        let f = selected(1, false).await;
        f.backend.play().await.unwrap();

        // A tick started before the pause answers after it.
        let stale = f.backend.core.next_generation();
        f.backend.pause().await.unwrap();
        let mut events = f.backend.subscribe();

        assert_eq!(f.backend.on_tick(stale).await, TickFlow::Stop);
        assert!(events.try_recv().is_err());
        assert_eq!(f.backend.state(), BackendState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn deselect_unbinds_and_releases() {
        let f = selected(1, false).await;
        f.backend.play().await.unwrap();
        f.backend.deselect().await;
        assert_eq!(f.backend.control_url(), None);
        assert_eq!(f.backend.state(), BackendState::Idle);
        assert_eq!(f.wake.holder(), None);
    }
}
