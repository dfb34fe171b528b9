//! Playback on this host through a [`MediaEngine`].

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::backend::{BackendCore, BackendKind, BackendState, PlaybackBackend, PlaybackShared};
use super::engine::MediaEngine;
use super::playlist::PlaylistStore;
use super::ticker::TickFlow;
use super::{PlaybackError, PlaybackResult};
use crate::events::PlaybackEvent;
use crate::upnp::Device;

pub struct LocalBackend {
    core: BackendCore,
    engine: Arc<dyn MediaEngine>,
    weak_self: Weak<Self>,
}

impl LocalBackend {
    pub fn new(engine: Arc<dyn MediaEngine>, shared: PlaybackShared) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core: BackendCore::new(BackendKind::Local, shared),
            engine,
            weak_self: weak_self.clone(),
        })
    }

    /// Opens and starts `index`. Callers hold the ops lock.
    async fn start_song(&self, index: usize) -> PlaybackResult<()> {
        let song = self.core.song(index)?;
        let path = song.local_path();

        self.core.begin_preparing();
        log::info!("[Local] Playing song {} ({})", index, path.display());

        let started = match self.engine.open(&path).await {
            Ok(()) => self.engine.start(),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            log::warn!("[Local] Failed to start song {}: {}", index, e);
            self.engine.stop();
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

    async fn on_tick(&self, generation: u64) -> TickFlow {
        let _ops = self.core.lock_ops().await;
        if !self.core.is_current(generation) {
            return TickFlow::Stop;
        }

        self.core.emit(PlaybackEvent::ProgressReport {
            position_ms: self.engine.position_ms(),
            duration_ms: self.engine.duration_ms(),
        });

        if !self.engine.is_finished() {
            return TickFlow::Continue;
        }

        log::debug!("[Local] Track finished");
        self.core.ticker.stop();
        match self.core.completion_target() {
            Some(next) => {
                if let Err(e) = self.start_song(next).await {
                    log::warn!("[Local] Could not advance to song {}: {}", next, e);
                }
            }
            None => {
                self.engine.stop();
                self.core.finish_playlist();
            }
        }
        TickFlow::Stop
    }

    fn resume_locked(&self) -> PlaybackResult<()> {
        if self.core.state() != BackendState::Paused {
            return Err(self.core.invalid("resume"));
        }
        self.engine.resume();
        let generation = self.core.enter_resumed();
        self.start_ticker(generation);
        Ok(())
    }

    fn stop_locked(&self) {
        self.engine.stop();
        self.core.enter_idle();
    }
}

#[async_trait]
impl PlaybackBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
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
        if !device.is_local {
            return Err(PlaybackError::Unsupported("remote device"));
        }
        let _ops = self.core.lock_ops().await;
        log::info!("[Local] Selected {}", device.display_name());
        self.core.sync_index_from_store();
        Ok(())
    }

    async fn deselect(&self) {
        let _ops = self.core.lock_ops().await;
        self.stop_locked();
        log::info!("[Local] Deselected");
    }

    async fn play(&self) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        match self.core.state() {
            BackendState::Idle => {
                let index = self.core.start_index().ok_or(PlaybackError::NoSong)?;
                self.start_song(index).await
            }
            BackendState::Paused => self.resume_locked(),
            BackendState::Playing | BackendState::Preparing => Err(self.core.invalid("play")),
        }
    }

    async fn pause(&self) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        if self.core.state() != BackendState::Playing {
            return Err(self.core.invalid("pause"));
        }
        self.engine.pause();
        self.core.enter_paused();
        Ok(())
    }

    async fn resume(&self) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        self.resume_locked()
    }

    async fn stop(&self) {
        let _ops = self.core.lock_ops().await;
        self.stop_locked();
    }

    async fn reset(&self) {
        let _ops = self.core.lock_ops().await;
        self.stop_locked();
    }

    async fn seek_to(&self, position_ms: u64) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        match self.core.state() {
            BackendState::Playing | BackendState::Paused => {
                self.engine.seek(position_ms)?;
                self.core.emit(PlaybackEvent::ProgressReport {
                    position_ms: self.engine.position_ms(),
                    duration_ms: self.engine.duration_ms(),
                });
                Ok(())
            }
            _ => Err(self.core.invalid("seek")),
        }
    }

    async fn play_index(&self, index: usize) -> PlaybackResult<()> {
        let _ops = self.core.lock_ops().await;
        self.start_song(index).await
    }
}
