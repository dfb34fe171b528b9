//! Playback backends and the router that multiplexes commands onto them.
//!
//! - [`backend`]: the [`PlaybackBackend`] contract and its shared state
//! - [`local`]: playback through a [`MediaEngine`] on this host
//! - [`output`]: the [`CpalEngine`] that decodes and plays on the audio device
//! - [`remote`]: playback on a UPnP renderer through AVTransport
//! - [`router`]: single active backend, command forwarding, event republishing

pub mod backend;
pub mod end_of_track;
pub mod engine;
pub mod local;
pub mod output;
pub mod playlist;
pub mod remote;
pub mod router;
pub mod ticker;
pub mod wake;

pub use backend::{BackendKind, BackendState, PlaybackBackend, PlaybackShared};
pub use end_of_track::{EndOfTrackDetector, TrackEndDecision};
#[cfg(test)]
pub use engine::NullSinkEngine;
pub use engine::{EngineError, EngineResult, MediaEngine};
pub use local::LocalBackend;
pub use output::CpalEngine;
pub use playlist::{InMemoryPlaylist, PlaylistStore, Song, Source};
pub use remote::RemoteBackend;
pub use router::{PlaybackCommand, PlaybackEventStream, PlaybackRouter};
pub use ticker::{PositionTicker, TickFlow};
pub use wake::{SharedWakeLock, WakeLock};

use thiserror::Error;

use crate::context::NetworkError;
use crate::upnp::SoapError;

/// Errors returned by playback commands.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The playlist has no song at the requested position.
    #[error("No song to play")]
    NoSong,

    /// The command is not valid in the backend's current state.
    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: BackendState,
    },

    /// The backend is not bound to a device.
    #[error("No device selected")]
    NotSelected,

    /// The backend does not implement the operation.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    /// A renderer control call failed.
    #[error(transparent)]
    Soap(#[from] SoapError),

    /// The media engine failed to open or decode the song.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// No playable URL could be built for the song.
    #[error(transparent)]
    Url(#[from] NetworkError),
}

/// Result type for playback commands.
pub type PlaybackResult<T> = Result<T, PlaybackError>;
