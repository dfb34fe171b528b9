//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (SSDP, UPnP AVTransport,
//! HTTP) and changing them would break protocol compliance. Tunable values
//! live in [`crate::state::Config`].

// ─────────────────────────────────────────────────────────────────────────────
// SSDP (Simple Service Discovery Protocol)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast address and port.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Search target used for renderer discovery.
///
/// `ssdp:all` makes every UPnP device answer; capability is decided later by
/// probing the device description.
pub const SSDP_SEARCH_TARGET: &str = "ssdp:all";

/// Multicast TTL recommended by UPnP 1.0 for SSDP.
pub const SSDP_MULTICAST_TTL: u32 = 4;

/// Receive buffer size for SSDP datagrams.
pub const SSDP_RECV_BUFFER_SIZE: usize = 2048;

// ─────────────────────────────────────────────────────────────────────────────
// UPnP AVTransport
// ─────────────────────────────────────────────────────────────────────────────

/// Marker that identifies a media transport service in a device description.
pub const AV_TRANSPORT_MARKER: &str = "AVTransport:1";

/// AVTransport instance used by every action (single-instance renderers).
pub const AV_TRANSPORT_INSTANCE_ID: &str = "0";

/// Value reported by renderers that cannot provide a time field.
pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// Fallback content type for files outside the MIME table.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in protocol data (DIDL-Lite metadata, local device name).
pub const APP_NAME: &str = "Tunecast";

/// Capacity of the domain event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
