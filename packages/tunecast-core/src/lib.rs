//! Tunecast Core - renderer discovery and playback control.
//!
//! This crate finds UPnP/DLNA media renderers on the local network, drives
//! them through AVTransport, and plays the same playlist locally when no
//! renderer is selected. It is used by the headless `tunecast-server`
//! daemon.
//!
//! # Architecture
//!
//! - [`upnp`]: SSDP discovery, capability probing, AVTransport SOAP client
//! - [`services`]: network capability monitor and watcher
//! - [`playback`]: local and remote backends and the router between them
//! - [`api`]: static file server renderers pull audio from
//! - [`events`]: playback and device events, fanned out to listeners
//! - [`context`]: network configuration and URL building
//! - [`state`]: tunable configuration
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): emitting domain events
//! - [`IpDetector`](context::IpDetector): local IP detection
//! - [`AvTransport`](upnp::AvTransport) / [`DiscoveryClient`](upnp::DiscoveryClient): renderer I/O
//! - [`MediaEngine`](playback::MediaEngine): local decoding and output
//! - [`PlaylistStore`](playback::PlaylistStore): playlist storage

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod context;
pub mod error;
pub mod events;
pub mod playback;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod state;
pub mod upnp;

// Re-export commonly used types at the crate root
pub use context::{IpDetector, LocalIpDetector, NetworkContext, NetworkError};
pub use error::{ErrorCode, TunecastError, TunecastResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, DeviceEvent, EventEmitter, LoggingEventEmitter,
    NoopEventEmitter, PlaybackEvent,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Config, EndOfTrackConfig};

// Re-export UPnP types
pub use upnp::{CanPlay, Device, DeviceKey, DeviceRegistry, RendererScanner};

// Re-export playback types
pub use playback::{
    BackendKind, BackendState, CpalEngine, InMemoryPlaylist, MediaEngine, PlaybackCommand,
    PlaybackRouter, PlaylistStore, Song, Source,
};

// Re-export service types
pub use services::{NetworkCapabilityMonitor, NetworkWatcher};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, local_device, BootstrappedServices};

// Re-export API types
pub use api::{mime_type_for_path, start_file_server, FileServer, ServerError};
