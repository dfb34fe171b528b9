//! Centralized error types for the Tunecast core library.
//!
//! Each layer defines its own `thiserror` enum next to the code that raises
//! it. This module gives all of them machine-readable codes through
//! [`ErrorCode`] and folds them into [`TunecastError`] for callers that only
//! need one type.

use serde::Serialize;
use thiserror::Error;

use crate::context::NetworkError;
use crate::playback::{EngineError, PlaybackError};
use crate::upnp::{DiscoveryError, ProbeError, SoapError};

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::SendSearch(_) => "ssdp_send_failed",
            Self::NoInterfaces => "no_network_interfaces",
        }
    }
}

impl ErrorCode for ProbeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_) => "http_error_status",
            Self::MissingControlUrl => "no_transport_service",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(e) if e.is_timeout() => "soap_timeout",
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault(_) => "soap_fault",
            Self::Parse => "soap_parse_error",
        }
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Open(_) => "media_open_failed",
            Self::Decode(_) => "media_decode_failed",
            Self::NotLoaded => "media_not_loaded",
            Self::Output(_) => "audio_output_unavailable",
        }
    }
}

impl ErrorCode for PlaybackError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoSong => "no_song",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotSelected => "no_device_selected",
            Self::Unsupported(_) => "unsupported",
            Self::Soap(e) => e.code(),
            Self::Engine(e) => e.code(),
            Self::Url(_) => "invalid_media_url",
        }
    }
}

/// Application-wide error type.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum TunecastError {
    /// Renderer discovery failed (SSDP/network issues).
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Capability probe failed.
    #[error("Probe failed: {0}")]
    Probe(String),

    /// SOAP request to a renderer failed.
    #[error("SOAP request failed: {0}")]
    Soap(String),

    /// A playback command could not be carried out.
    #[error("Playback failed: {0}")]
    Playback(String),

    /// Renderer not found among the capable devices.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Network-related error (IP detection, URL building).
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error (invalid or missing settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TunecastError {
    /// Returns a machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::Probe(_) => "probe_failed",
            Self::Soap(_) => "soap_error",
            Self::Playback(_) => "playback_error",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::Network(_) => "network_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

// Re-export Result type aliases from their defining modules
pub use crate::playback::{EngineResult, PlaybackResult};
pub use crate::upnp::{DiscoveryResult, ProbeResult, SoapResult};

/// Convenient Result alias for application-wide operations.
pub type TunecastResult<T> = Result<T, TunecastError>;

impl From<DiscoveryError> for TunecastError {
    fn from(err: DiscoveryError) -> Self {
        Self::Discovery(err.to_string())
    }
}

impl From<ProbeError> for TunecastError {
    fn from(err: ProbeError) -> Self {
        Self::Probe(err.to_string())
    }
}

impl From<SoapError> for TunecastError {
    fn from(err: SoapError) -> Self {
        Self::Soap(err.to_string())
    }
}

impl From<PlaybackError> for TunecastError {
    fn from(err: PlaybackError) -> Self {
        Self::Playback(err.to_string())
    }
}

impl From<NetworkError> for TunecastError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err.to_string())
    }
}
