//! Shared types for renderer discovery and control.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during an SSDP discovery pass.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to create or bind the UDP socket.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to send the M-SEARCH datagram.
    #[error("failed to send SSDP search: {0}")]
    SendSearch(#[source] std::io::Error),

    /// No usable IPv4 interface to search from.
    #[error("no usable network interfaces found")]
    NoInterfaces,
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur while probing a device description.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Description fetch failed at the transport level (includes timeouts).
    #[error("description request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Description URL answered with a non-200 status.
    #[error("description returned HTTP {0}")]
    HttpStatus(u16),

    /// Description has no AVTransport service with a control URL.
    #[error("no AVTransport control URL in description")]
    MissingControlUrl,
}

/// Convenient Result alias for capability probes.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Outcome of a successful capability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererCapability {
    /// Normalized control URL (`<ip>:<port>/<path>`, no scheme).
    pub control_url: String,
    /// First `friendlyName` in the description, entity-decoded.
    pub friendly_name: Option<String>,
}

/// Transport position as reported by `GetPositionInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    /// Raw `TrackDuration` value.
    pub track_duration: String,
    /// Raw `RelTime` value.
    pub rel_time: String,
    pub duration_ms: u64,
    pub position_ms: u64,
}
