//! End-of-track detection from polled renderer positions.
//!
//! Renderers do not report track completion, so the remote backend infers it
//! from `GetPositionInfo` samples taken once per tick.

use crate::state::EndOfTrackConfig;

/// Outcome of one position sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndDecision {
    /// Keep polling.
    Continue,
    /// Close to the end; the next sample ends the track.
    Deferred,
    /// The track has ended.
    Ended,
}

#[derive(Debug, Clone)]
pub struct EndOfTrackDetector {
    config: EndOfTrackConfig,
    change_next_tick: bool,
    zero_duration_samples: u32,
}

impl EndOfTrackDetector {
    pub fn new(config: EndOfTrackConfig) -> Self {
        Self {
            config,
            change_next_tick: false,
            zero_duration_samples: 0,
        }
    }

    /// Forgets everything observed so far. Called on every (re)start.
    pub fn reset(&mut self) {
        self.change_next_tick = false;
        self.zero_duration_samples = 0;
    }

    /// Applies one sample. Rules are evaluated in order:
    ///
    /// 1. a deferral from the previous sample ends the track;
    /// 2. a zero duration counts; more than `zero_duration_limit` in a row
    ///    ends the track (renderers briefly report zero after a new URI);
    /// 3. otherwise the remaining time ends the track below
    ///    `end_threshold_ms` and defers below `defer_threshold_ms`.
    pub fn observe(&mut self, duration_ms: u64, position_ms: u64) -> TrackEndDecision {
        if self.change_next_tick {
            self.change_next_tick = false;
            return TrackEndDecision::Ended;
        }

        if duration_ms == 0 {
            self.zero_duration_samples += 1;
            if self.zero_duration_samples > self.config.zero_duration_limit {
                self.zero_duration_samples = 0;
                return TrackEndDecision::Ended;
            }
            return TrackEndDecision::Continue;
        }
        self.zero_duration_samples = 0;

        let left = duration_ms.abs_diff(position_ms);
        if left < self.config.end_threshold_ms {
            TrackEndDecision::Ended
        } else if left < self.config.defer_threshold_ms {
            self.change_next_tick = true;
            TrackEndDecision::Deferred
        } else {
            TrackEndDecision::Continue
        }
    }
}

impl Default for EndOfTrackDetector {
    fn default() -> Self {
        Self::new(EndOfTrackConfig::default())
    }
}
