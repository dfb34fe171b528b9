//! Trait abstractions for renderer discovery and control.
//!
//! The scanner, monitor and remote backend depend on these traits rather than
//! on sockets and HTTP directly, so tests can substitute scripted fakes.

use async_trait::async_trait;

use super::device::Device;
use super::didl::TrackMetadata;
use super::soap::SoapResult;
use super::types::{DiscoveryResult, PositionInfo, ProbeResult, RendererCapability};

/// Multicast search for renderers.
#[async_trait]
pub trait SsdpSearch: Send + Sync {
    /// Runs one discovery pass and returns the `LOCATION` header of every
    /// response received before the pass ended.
    async fn search(&self) -> DiscoveryResult<Vec<String>>;
}

/// Capability probe against a device description.
#[async_trait]
pub trait DescriptionFetch: Send + Sync {
    /// Fetches the device's description and extracts its AVTransport control
    /// URL and friendly name.
    async fn probe(&self, device: &Device) -> ProbeResult<RendererCapability>;
}

/// Combined trait for everything the scanner needs.
pub trait DiscoveryClient: SsdpSearch + DescriptionFetch {}

impl<T: SsdpSearch + DescriptionFetch> DiscoveryClient for T {}

/// AVTransport control of one renderer, addressed by its control URL.
#[async_trait]
pub trait AvTransport: Send + Sync {
    /// Loads a URI and its DIDL-Lite metadata.
    async fn set_av_transport_uri(
        &self,
        control_url: &str,
        uri: &str,
        track: TrackMetadata<'_>,
    ) -> SoapResult<()>;

    async fn play(&self, control_url: &str) -> SoapResult<()>;

    async fn pause(&self, control_url: &str) -> SoapResult<()>;

    async fn stop(&self, control_url: &str) -> SoapResult<()>;

    /// Returns the current track duration and elapsed time.
    async fn get_position_info(&self, control_url: &str) -> SoapResult<PositionInfo>;
}
