//! Local audio output.
//!
//! Each opened file gets a playback thread that owns the cpal output stream
//! and runs the symphonia decoder a little ahead of it. Decoded audio is
//! mapped onto the device layout and queued in a buffer shared with the
//! output callback; the position is counted from the frames the callback
//! actually rendered.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{SeekMode, SeekTo};
use symphonia::core::units::Time;
use tokio::sync::oneshot;

use super::engine::{open_track, EngineError, EngineResult, MediaEngine, OpenedTrack};

/// How far the decoder runs ahead of the output.
const BUFFER_AHEAD_MS: u64 = 500;

/// Decoder wait between command checks while the buffer is full.
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Layout of the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputFormat {
    sample_rate: u32,
    channels: usize,
}

/// Audio queued between the playback thread and the output callback.
#[derive(Debug, Default)]
struct SharedBuffer {
    /// Interleaved samples in the output layout.
    samples: VecDeque<f32>,
    /// Bumped on every seek. Samples decoded for an older generation are dropped.
    generation: u64,
    /// Position the rendered frames count from.
    base_ms: u64,
    rendered_frames: u64,
    end_of_stream: bool,
}

impl SharedBuffer {
    fn is_finished(&self) -> bool {
        self.end_of_stream && self.samples.is_empty()
    }
}

struct Playhead {
    buffer: Mutex<SharedBuffer>,
    playing: AtomicBool,
    started: AtomicBool,
    format: OutputFormat,
}

impl Playhead {
    fn new(format: OutputFormat) -> Self {
        Self {
            buffer: Mutex::new(SharedBuffer::default()),
            playing: AtomicBool::new(false),
            started: AtomicBool::new(false),
            format,
        }
    }

    fn position_ms(&self) -> u64 {
        let buffer = self.buffer.lock();
        buffer.base_ms + buffer.rendered_frames * 1000 / u64::from(self.format.sample_rate)
    }

    fn buffered_ms(&self) -> u64 {
        let frames = (self.buffer.lock().samples.len() / self.format.channels) as u64;
        frames * 1000 / u64::from(self.format.sample_rate)
    }

    fn is_finished(&self) -> bool {
        self.started.load(Ordering::SeqCst) && self.buffer.lock().is_finished()
    }

    /// Fills one output callback buffer. While paused the buffer is left
    /// untouched and silence is rendered.
    fn render<T: Copy>(&self, out: &mut [T], convert: fn(f32) -> T, silence: T) {
        if !self.playing.load(Ordering::Relaxed) {
            out.fill(silence);
            return;
        }

        let mut buffer = self.buffer.lock();
        let mut written = 0;
        for slot in out.iter_mut() {
            match buffer.samples.pop_front() {
                Some(sample) => {
                    *slot = convert(sample);
                    written += 1;
                }
                None => *slot = silence,
            }
        }
        buffer.rendered_frames += (written / self.format.channels) as u64;
    }

    /// Drops the queued audio and restarts the count at `position_ms`.
    /// Returns the generation the decoder must tag its samples with.
    fn restart_at(&self, position_ms: u64) -> u64 {
        let mut buffer = self.buffer.lock();
        buffer.samples.clear();
        buffer.generation += 1;
        buffer.base_ms = position_ms;
        buffer.rendered_frames = 0;
        buffer.end_of_stream = false;
        buffer.generation
    }

    /// Queues decoded samples. Returns false if a seek superseded `generation`.
    fn push(&self, generation: u64, samples: &[f32]) -> bool {
        let mut buffer = self.buffer.lock();
        if buffer.generation != generation {
            return false;
        }
        buffer.samples.extend(samples.iter().copied());
        true
    }

    fn mark_end(&self, generation: u64) {
        let mut buffer = self.buffer.lock();
        if buffer.generation == generation {
            buffer.end_of_stream = true;
        }
    }
}

/// Maps source frames onto `to` channels. Mono is copied to every output
/// channel; a mono output gets the average of the source channels.
fn remix(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == 0 {
        return Vec::new();
    }
    if from == to {
        return input.to_vec();
    }

    let mut out = Vec::with_capacity(input.len() / from * to);
    for frame in input.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            out.extend((0..to).map(|c| frame.get(c).copied().unwrap_or(0.0)));
        }
    }
    out
}

/// Converts decoded audio to the output layout: channel mapping, then
/// linear resampling when the rates differ.
///
/// The resampler carries the last frame and the fractional read position
/// across packets, so consecutive packets join without a gap.
struct Converter {
    output: OutputFormat,
    /// Read position in source frames; frame 0 is `prev`.
    pos: f64,
    prev: Vec<f32>,
}

impl Converter {
    fn new(output: OutputFormat) -> Self {
        Self {
            output,
            pos: 1.0,
            prev: vec![0.0; output.channels],
        }
    }

    fn reset(&mut self) {
        self.pos = 1.0;
        self.prev.fill(0.0);
    }

    fn convert(&mut self, input: &[f32], channels: usize, rate: u32) -> Vec<f32> {
        let mapped = remix(input, channels, self.output.channels);
        if rate == self.output.sample_rate || rate == 0 {
            return mapped;
        }
        self.resample(&mapped, rate)
    }

    fn resample(&mut self, input: &[f32], rate: u32) -> Vec<f32> {
        let ch = self.output.channels;
        let frames = input.len() / ch;
        if frames == 0 {
            return Vec::new();
        }

        let step = f64::from(rate) / f64::from(self.output.sample_rate);
        let mut out = Vec::with_capacity(((frames as f64 / step) as usize + 1) * ch);
        while self.pos < frames as f64 {
            let i = self.pos.floor() as usize;
            let frac = (self.pos - i as f64) as f32;
            for c in 0..ch {
                let a = if i == 0 {
                    self.prev[c]
                } else {
                    input[(i - 1) * ch + c]
                };
                let b = input[i * ch + c];
                out.push(a + (b - a) * frac);
            }
            self.pos += step;
        }
        self.pos -= frames as f64;
        self.prev.copy_from_slice(&input[(frames - 1) * ch..frames * ch]);
        out
    }
}

fn to_f32(sample: f32) -> f32 {
    sample.clamp(-1.0, 1.0)
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn to_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) + 1.0) * 0.5 * f32::from(u16::MAX)).round() as u16
}

enum Command {
    Seek { position_ms: u64, generation: u64 },
    Stop,
}

/// Decoder side of the playback thread.
struct Decoding {
    track: OpenedTrack,
    decoder: Box<dyn Decoder>,
    converter: Converter,
    playhead: Arc<Playhead>,
    generation: u64,
    ended: bool,
}

impl Decoding {
    fn run(mut self, commands: mpsc::Receiver<Command>) {
        let mut idle = false;
        loop {
            let command = if idle {
                match commands.recv_timeout(IDLE_WAIT) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            } else {
                match commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => return,
                }
            };

            match command {
                Some(Command::Stop) => return,
                Some(Command::Seek {
                    position_ms,
                    generation,
                }) => self.seek(position_ms, generation),
                None => {}
            }

            idle = self.ended || self.playhead.buffered_ms() >= BUFFER_AHEAD_MS;
            if idle {
                continue;
            }
            if !self.decode_next() {
                log::debug!("[Local] End of stream");
                self.ended = true;
                self.playhead.mark_end(self.generation);
            }
        }
    }

    /// Decodes one packet into the buffer. Returns false at the end of the file.
    fn decode_next(&mut self) -> bool {
        let packet = match self.track.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return false;
            }
            Err(e) => {
                log::warn!("[Local] Read failed: {}", e);
                return false;
            }
        };
        if packet.track_id() != self.track.track_id {
            return true;
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("[Local] Skipping undecodable packet: {}", e);
                return true;
            }
            Err(e) => {
                log::warn!("[Local] Decode failed: {}", e);
                return false;
            }
        };

        let spec = *decoded.spec();
        let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);
        let converted = self
            .converter
            .convert(samples.samples(), spec.channels.count(), spec.rate);
        self.playhead.push(self.generation, &converted);
        true
    }

    fn seek(&mut self, position_ms: u64, generation: u64) {
        self.generation = generation;
        self.ended = false;

        let time = Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0);
        let target = SeekTo::Time {
            time,
            track_id: Some(self.track.track_id),
        };
        if let Err(e) = self.track.format.seek(SeekMode::Coarse, target) {
            log::warn!("[Local] Seek to {} ms failed: {}", position_ms, e);
            self.ended = true;
            self.playhead.mark_end(generation);
        }
        self.decoder.reset();
        self.converter.reset();
    }
}

/// Picks a stream config that matches the source, falling back to the
/// device default.
fn choose_config(
    device: &cpal::Device,
    rate: u32,
    channels: u16,
) -> EngineResult<cpal::SupportedStreamConfig> {
    let matching = device.supported_output_configs().ok().and_then(|mut ranges| {
        ranges.find(|range| {
            range.channels() == channels
                && range.min_sample_rate().0 <= rate
                && rate <= range.max_sample_rate().0
                && matches!(
                    range.sample_format(),
                    cpal::SampleFormat::F32 | cpal::SampleFormat::I16 | cpal::SampleFormat::U16
                )
        })
    });
    match matching {
        Some(range) => Ok(range.with_sample_rate(cpal::SampleRate(rate))),
        None => device
            .default_output_config()
            .map_err(|e| EngineError::Output(e.to_string())),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    playhead: &Arc<Playhead>,
    convert: fn(f32) -> T,
    silence: T,
) -> EngineResult<cpal::Stream>
where
    T: cpal::SizedSample + Copy + Send + 'static,
{
    let playhead = Arc::clone(playhead);
    device
        .build_output_stream(
            config,
            move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
                playhead.render(out, convert, silence);
            },
            |err| log::error!("[Local] Output stream error: {}", err),
            None,
        )
        .map_err(|e| EngineError::Output(e.to_string()))
}

/// Opens the default output device for `track` and starts its stream.
/// The stream renders silence until the playhead is started.
fn open_output(track: &OpenedTrack) -> EngineResult<(cpal::Stream, Arc<Playhead>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::Output("no output device".to_string()))?;

    let rate = track.params.sample_rate.unwrap_or(44_100);
    let channels = track.params.channels.map_or(2, |c| c.count() as u16);
    let supported = choose_config(&device, rate, channels)?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();

    log::info!(
        "[Local] Output {} ({} Hz, {} ch, {:?})",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    let playhead = Arc::new(Playhead::new(OutputFormat {
        sample_rate: config.sample_rate.0,
        channels: usize::from(config.channels),
    }));
    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream(&device, &config, &playhead, to_f32, 0.0)?,
        cpal::SampleFormat::I16 => build_stream(&device, &config, &playhead, to_i16, 0)?,
        cpal::SampleFormat::U16 => {
            build_stream(&device, &config, &playhead, to_u16, u16::MAX / 2 + 1)?
        }
        other => {
            return Err(EngineError::Output(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };
    stream
        .play()
        .map_err(|e| EngineError::Output(e.to_string()))?;

    Ok((stream, playhead))
}

type Ready = EngineResult<(Arc<Playhead>, u64)>;

/// Body of the playback thread. The stream lives as long as this call.
fn run_playback(path: &Path, commands: mpsc::Receiver<Command>, ready: oneshot::Sender<Ready>) {
    let prepared = open_track(path).and_then(|track| {
        let decoder = symphonia::default::get_codecs()
            .make(&track.params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let (stream, playhead) = open_output(&track)?;
        Ok((track, decoder, stream, playhead))
    });

    let (track, decoder, _stream, playhead) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready
        .send(Ok((Arc::clone(&playhead), track.duration_ms)))
        .is_err()
    {
        return;
    }

    Decoding {
        track,
        decoder,
        converter: Converter::new(playhead.format),
        playhead,
        generation: 0,
        ended: false,
    }
    .run(commands);
}

struct Session {
    playhead: Arc<Playhead>,
    commands: mpsc::Sender<Command>,
    duration_ms: u64,
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Stop);
    }
}

/// Plays files on the default audio output device.
#[derive(Default)]
pub struct CpalEngine {
    session: Mutex<Option<Session>>,
}

impl CpalEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaEngine for CpalEngine {
    async fn open(&self, path: &Path) -> EngineResult<()> {
        self.stop();

        let (ready_tx, ready_rx) = oneshot::channel();
        let (commands, command_rx) = mpsc::channel();
        let owned = path.to_path_buf();
        thread::Builder::new()
            .name("tunecast-playback".to_string())
            .spawn(move || run_playback(&owned, command_rx, ready_tx))
            .map_err(|e| EngineError::Output(e.to_string()))?;

        let (playhead, duration_ms) = ready_rx
            .await
            .map_err(|_| EngineError::Output("playback thread exited".to_string()))??;

        log::debug!("[Local] Opened {} ({} ms)", path.display(), duration_ms);
        *self.session.lock() = Some(Session {
            playhead,
            commands,
            duration_ms,
        });
        Ok(())
    }

    fn start(&self) -> EngineResult<()> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(EngineError::NotLoaded)?;
        session.playhead.started.store(true, Ordering::SeqCst);
        session.playhead.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            session.playhead.playing.store(false, Ordering::SeqCst);
        }
    }

    fn resume(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            if session.playhead.started.load(Ordering::SeqCst) {
                session.playhead.playing.store(true, Ordering::SeqCst);
            }
        }
    }

    fn stop(&self) {
        self.session.lock().take();
    }

    fn seek(&self, position_ms: u64) -> EngineResult<()> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(EngineError::NotLoaded)?;
        let position_ms = match session.duration_ms {
            0 => position_ms,
            duration => position_ms.min(duration),
        };

        let generation = session.playhead.restart_at(position_ms);
        session
            .commands
            .send(Command::Seek {
                position_ms,
                generation,
            })
            .map_err(|_| EngineError::Output("playback thread exited".to_string()))
    }

    fn position_ms(&self) -> u64 {
        self.session.lock().as_ref().map_or(0, |session| {
            let position = session.playhead.position_ms();
            match session.duration_ms {
                0 => position,
                duration => position.min(duration),
            }
        })
    }

    fn duration_ms(&self) -> u64 {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |session| session.duration_ms)
    }

    fn is_finished(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| session.playhead.is_finished())
    }
}
