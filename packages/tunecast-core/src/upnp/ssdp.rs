//! SSDP multicast search for media renderers.
//!
//! One discovery pass sends the M-SEARCH request a fixed number of times and
//! then reads responses until a single receive waits longer than the receive
//! timeout. Renderers reply unicast to the sending socket, so the same socket
//! is used for send and receive.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::types::{DiscoveryError, DiscoveryResult};
use super::utils::{header_value, starts_with_ignore_ascii_case};
use crate::protocol_constants::{
    SSDP_MULTICAST_ADDR, SSDP_MULTICAST_TTL, SSDP_RECV_BUFFER_SIZE, SSDP_SEARCH_TARGET,
};

/// Settings for one SSDP discovery pass.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Number of M-SEARCH datagrams to send.
    pub send_count: u32,
    /// A receive that waits longer than this ends the pass.
    pub receive_timeout: Duration,
    /// MX value (max response delay in seconds).
    pub mx_value: u64,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 2,
            receive_timeout: Duration::from_secs(2),
            mx_value: 3,
        }
    }
}

impl From<&crate::state::Config> for SsdpConfig {
    fn from(config: &crate::state::Config) -> Self {
        Self {
            send_count: config.ssdp_send_count,
            receive_timeout: config.ssdp_receive_timeout(),
            mx_value: config.ssdp_mx,
        }
    }
}

/// Builds the M-SEARCH request.
pub(crate) fn build_msearch_message(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        mx, SSDP_SEARCH_TARGET
    )
}

/// Extracts the `LOCATION` header from an SSDP response.
///
/// Returns `None` for anything that is not an HTTP response (other hosts'
/// M-SEARCH requests and NOTIFY messages arrive on the same socket) or that
/// carries no location.
pub(crate) fn parse_ssdp_response(response: &str) -> Option<String> {
    if !starts_with_ignore_ascii_case(response, "HTTP/") {
        return None;
    }
    header_value(response, "location")
        .filter(|loc| !loc.is_empty())
        .map(str::to_string)
}

/// Creates the UDP socket used for a discovery pass.
///
/// Sets up socket options for SSDP:
/// - SO_REUSEADDR for rapid restarts
/// - Multicast TTL of 4 per UPnP 1.0
fn create_socket() -> Result<UdpSocket, DiscoveryError> {
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR: {}", e);
    }

    if let Err(e) = socket.set_multicast_ttl_v4(SSDP_MULTICAST_TTL) {
        log::warn!("[SSDP] Failed to set multicast TTL: {}", e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;

    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Runs one SSDP discovery pass and returns the `LOCATION` of every response,
/// in arrival order. Duplicates are kept; the scanner deduplicates by identity.
///
/// # Errors
/// Returns an error if the socket cannot be created or no M-SEARCH could be
/// sent. A receive error ends the pass early with what was collected so far.
pub async fn search(config: &SsdpConfig) -> DiscoveryResult<Vec<String>> {
    let socket = create_socket()?;
    let msg = build_msearch_message(config.mx_value);

    let mut sent = 0;
    let mut last_send_error = None;
    for attempt in 0..config.send_count.max(1) {
        match socket.send_to(msg.as_bytes(), SSDP_MULTICAST_ADDR).await {
            Ok(_) => {
                sent += 1;
                log::trace!("[SSDP] Sent M-SEARCH (attempt {})", attempt + 1);
            }
            Err(e) => {
                log::warn!(
                    "[SSDP] Failed to send M-SEARCH (attempt {}): {}",
                    attempt + 1,
                    e
                );
                last_send_error = Some(e);
            }
        }
    }
    if sent == 0 {
        return Err(match last_send_error {
            Some(e) => DiscoveryError::SendSearch(e),
            None => DiscoveryError::NoInterfaces,
        });
    }

    let mut locations = Vec::new();
    let mut buf = [0u8; SSDP_RECV_BUFFER_SIZE];
    let start = std::time::Instant::now();

    loop {
        match timeout(config.receive_timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((amt, src))) => {
                let response = String::from_utf8_lossy(&buf[..amt]);
                match parse_ssdp_response(&response) {
                    Some(location) => {
                        log::trace!("[SSDP] Response from {}: {}", src, location);
                        locations.push(location);
                    }
                    None => log::trace!("[SSDP] Ignoring datagram from {}", src),
                }
            }
            Ok(Err(e)) => {
                log::warn!("[SSDP] Socket recv error, ending pass: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    log::debug!(
        "[SSDP] Pass complete after {}ms: {} response(s)",
        start.elapsed().as_millis(),
        locations.len()
    );

    Ok(locations)
}
