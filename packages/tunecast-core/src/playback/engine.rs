//! Media engine seam for local playback.
//!
//! The daemon plays through [`CpalEngine`](super::output::CpalEngine). Tests
//! use `NullSinkEngine`, which measures the file with symphonia and then
//! advances a play clock without touching an audio device.

use std::path::Path;

use async_trait::async_trait;
#[cfg(test)]
use parking_lot::Mutex;
use symphonia::core::codecs::{CodecParameters, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatReader;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::probe::Hint;
use thiserror::Error;
#[cfg(test)]
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot open {0}")]
    Open(String),

    #[error("Cannot decode media: {0}")]
    Decode(String),

    #[error("No media loaded")]
    NotLoaded,

    #[error("Audio output unavailable: {0}")]
    Output(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Decoder and output for local playback.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Loads a file, replacing whatever was loaded.
    async fn open(&self, path: &Path) -> EngineResult<()>;

    fn start(&self) -> EngineResult<()>;

    fn pause(&self);

    fn resume(&self);

    /// Unloads the current file.
    fn stop(&self);

    fn seek(&self, position_ms: u64) -> EngineResult<()>;

    fn position_ms(&self) -> u64;

    fn duration_ms(&self) -> u64;

    /// Returns true once a started file has played to its end.
    fn is_finished(&self) -> bool;
}

#[cfg(test)]
#[derive(Debug, Default)]
struct PlayClock {
    /// Duration of the loaded file, `None` when nothing is loaded.
    loaded: Option<u64>,
    /// Position accumulated before the current run.
    base_ms: u64,
    /// Set while the clock runs.
    started_at: Option<Instant>,
}

#[cfg(test)]
impl PlayClock {
    fn position_ms(&self) -> u64 {
        let Some(duration) = self.loaded else {
            return 0;
        };
        let running = self
            .started_at
            .map_or(0, |at| at.elapsed().as_millis() as u64);
        (self.base_ms + running).min(duration)
    }
}

/// Engine that plays into a null sink.
///
/// Files whose duration cannot be determined count as finished as soon as
/// they start.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct NullSinkEngine {
    clock: Mutex<PlayClock>,
}

#[cfg(test)]
impl NullSinkEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl MediaEngine for NullSinkEngine {
    async fn open(&self, path: &Path) -> EngineResult<()> {
        let owned = path.to_path_buf();
        let duration = tokio::task::spawn_blocking(move || open_track(&owned))
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))??
            .duration_ms;

        log::debug!("[Local] Opened {} ({} ms)", path.display(), duration);
        *self.clock.lock() = PlayClock {
            loaded: Some(duration),
            base_ms: 0,
            started_at: None,
        };
        Ok(())
    }

    fn start(&self) -> EngineResult<()> {
        let mut clock = self.clock.lock();
        if clock.loaded.is_none() {
            return Err(EngineError::NotLoaded);
        }
        clock.base_ms = 0;
        clock.started_at = Some(Instant::now());
        Ok(())
    }

    fn pause(&self) {
        let mut clock = self.clock.lock();
        if clock.started_at.is_some() {
            clock.base_ms = clock.position_ms();
            clock.started_at = None;
        }
    }

    fn resume(&self) {
        let mut clock = self.clock.lock();
        if clock.loaded.is_some() && clock.started_at.is_none() {
            clock.started_at = Some(Instant::now());
        }
    }

    fn stop(&self) {
        *self.clock.lock() = PlayClock::default();
    }

    fn seek(&self, position_ms: u64) -> EngineResult<()> {
        let mut clock = self.clock.lock();
        let duration = clock.loaded.ok_or(EngineError::NotLoaded)?;
        clock.base_ms = position_ms.min(duration);
        if clock.started_at.is_some() {
            clock.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn position_ms(&self) -> u64 {
        self.clock.lock().position_ms()
    }

    fn duration_ms(&self) -> u64 {
        self.clock.lock().loaded.unwrap_or(0)
    }

    fn is_finished(&self) -> bool {
        let clock = self.clock.lock();
        match clock.loaded {
            Some(duration) => {
                let started = clock.started_at.is_some() || clock.base_ms > 0;
                started && clock.position_ms() >= duration
            }
            None => false,
        }
    }
}

/// A file opened for decoding, positioned on its first audio track.
pub(crate) struct OpenedTrack {
    pub format: Box<dyn FormatReader>,
    pub track_id: u32,
    pub params: CodecParameters,
    /// Zero when the container does not say.
    pub duration_ms: u64,
}

/// Probes the container and picks the first track with a known codec.
pub(crate) fn open_track(path: &Path) -> EngineResult<OpenedTrack> {
    let file = std::fs::File::open(path)
        .map_err(|e| EngineError::Open(format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &Default::default(), &Default::default())
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EngineError::Decode("no audio track".to_string()))?;

    let params = track.codec_params.clone();
    let track_id = track.id;
    let duration_ms = match (params.time_base, params.n_frames) {
        (Some(tb), Some(frames)) => {
            let t = tb.calc_time(frames);
            t.seconds * 1000 + (t.frac * 1000.0) as u64
        }
        _ => {
            log::debug!("[Local] No duration for {}", path.display());
            0
        }
    };

    Ok(OpenedTrack {
        format: probed.format,
        track_id,
        params,
        duration_ms,
    })
}

#[cfg(test)]
pub(crate) fn write_test_wav(path: &Path, duration_ms: u32) {
    const RATE: u32 = 8000;
    let data_len = RATE / 1000 * duration_ms * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&RATE.to_le_bytes());
    bytes.extend_from_slice(&(RATE * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);

    std::fs::write(path, bytes).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn clock_follows_start_pause_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 1000);

        let engine = NullSinkEngine::new();
        engine.open(&path).await.unwrap();
        assert_eq!(engine.duration_ms(), 1000);
        assert!(!engine.is_finished());

        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(engine.position_ms(), 400);

        engine.pause();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.position_ms(), 400);

        engine.seek(900).unwrap();
        engine.resume();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.position_ms(), 1000);
        assert!(engine.is_finished());

        engine.stop();
        assert_eq!(engine.duration_ms(), 0);
        assert!(matches!(engine.seek(0), Err(EngineError::NotLoaded)));
    }

    #[test]
    fn open_track_reads_stream_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 250);

        let track = open_track(&path).unwrap();
        assert_eq!(track.duration_ms, 250);
        assert_eq!(track.params.sample_rate, Some(8000));
        assert_eq!(track.params.channels.map(|c| c.count()), Some(1));
    }

    #[tokio::test]
    async fn missing_file_fails_to_open() {
        let engine = NullSinkEngine::new();
        let result = engine.open(Path::new("/nonexistent/tunecast.mp3")).await;
        assert!(matches!(result, Err(EngineError::Open(_))));
        assert!(matches!(engine.start(), Err(EngineError::NotLoaded)));
    }

    #[tokio::test]
    async fn garbage_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let engine = NullSinkEngine::new();
        assert!(matches!(
            engine.open(&path).await,
            Err(EngineError::Decode(_))
        ));
    }
}
