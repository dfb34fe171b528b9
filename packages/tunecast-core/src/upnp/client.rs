//! Real implementations of the discovery and control traits.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::description::parse_description;
use super::device::Device;
use super::didl::TrackMetadata;
use super::soap::SoapResult;
use super::ssdp::{self, SsdpConfig};
use super::traits::{AvTransport, DescriptionFetch, SsdpSearch};
use super::transport;
use super::types::{DiscoveryResult, PositionInfo, ProbeError, ProbeResult, RendererCapability};

/// Discovery over real sockets and HTTP.
#[derive(Clone)]
pub struct UpnpDiscoveryClient {
    client: Client,
    ssdp: SsdpConfig,
    probe_timeout: Duration,
}

impl UpnpDiscoveryClient {
    pub fn new(client: Client, ssdp: SsdpConfig, probe_timeout: Duration) -> Self {
        Self {
            client,
            ssdp,
            probe_timeout,
        }
    }
}

#[async_trait]
impl SsdpSearch for UpnpDiscoveryClient {
    async fn search(&self) -> DiscoveryResult<Vec<String>> {
        ssdp::search(&self.ssdp).await
    }
}

#[async_trait]
impl DescriptionFetch for UpnpDiscoveryClient {
    async fn probe(&self, device: &Device) -> ProbeResult<RendererCapability> {
        let url = device.description_url();
        let res = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await?;

        let status = res.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProbeError::HttpStatus(status.as_u16()));
        }

        let body = res.text().await?;
        parse_description(device, &body).ok_or(ProbeError::MissingControlUrl)
    }
}

/// AVTransport control over HTTP with a fixed per-call timeout.
#[derive(Clone)]
pub struct UpnpTransportClient {
    client: Client,
    timeout: Duration,
}

impl UpnpTransportClient {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl AvTransport for UpnpTransportClient {
    async fn set_av_transport_uri(
        &self,
        control_url: &str,
        uri: &str,
        track: TrackMetadata<'_>,
    ) -> SoapResult<()> {
        transport::set_av_transport_uri(&self.client, control_url, uri, track, self.timeout).await
    }

    async fn play(&self, control_url: &str) -> SoapResult<()> {
        transport::play(&self.client, control_url, self.timeout).await
    }

    async fn pause(&self, control_url: &str) -> SoapResult<()> {
        transport::pause(&self.client, control_url, self.timeout).await
    }

    async fn stop(&self, control_url: &str) -> SoapResult<()> {
        transport::stop(&self.client, control_url, self.timeout).await
    }

    async fn get_position_info(&self, control_url: &str) -> SoapResult<PositionInfo> {
        transport::get_position_info(&self.client, control_url, self.timeout).await
    }
}
