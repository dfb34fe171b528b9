//! AVTransport commands against a renderer's control URL.
//!
//! Every call is a single attempt bounded by the caller's timeout. A failed
//! command is reported to the caller and never retried here.

use std::time::Duration;

use reqwest::Client;

use super::didl::{format_didl_lite, TrackMetadata};
use super::services::AvTransportAction;
use super::soap::{SoapRequestBuilder, SoapResult};
use super::types::PositionInfo;
use super::utils::{extract_xml_text, parse_time_to_ms};

/// Loads a media URI into the renderer's transport.
pub async fn set_av_transport_uri(
    client: &Client,
    control_url: &str,
    uri: &str,
    track: TrackMetadata<'_>,
    timeout: Duration,
) -> SoapResult<()> {
    let didl_metadata = format_didl_lite(uri, track);

    log::info!(
        "[Renderer] SetAVTransportURI: control={}, uri={}",
        control_url,
        uri
    );

    SoapRequestBuilder::new(client, control_url)
        .action(AvTransportAction::SetAVTransportURI)
        .instance_id()
        .arg("CurrentURI", uri)
        .arg("CurrentURIMetaData", didl_metadata)
        .timeout(timeout)
        .send()
        .await?;

    Ok(())
}

/// Starts or resumes playback at normal speed.
pub async fn play(client: &Client, control_url: &str, timeout: Duration) -> SoapResult<()> {
    SoapRequestBuilder::new(client, control_url)
        .action(AvTransportAction::Play)
        .instance_id()
        .arg("Speed", "1")
        .timeout(timeout)
        .send()
        .await?;
    Ok(())
}

pub async fn pause(client: &Client, control_url: &str, timeout: Duration) -> SoapResult<()> {
    SoapRequestBuilder::new(client, control_url)
        .action(AvTransportAction::Pause)
        .instance_id()
        .timeout(timeout)
        .send()
        .await?;
    Ok(())
}

pub async fn stop(client: &Client, control_url: &str, timeout: Duration) -> SoapResult<()> {
    SoapRequestBuilder::new(client, control_url)
        .action(AvTransportAction::Stop)
        .instance_id()
        .timeout(timeout)
        .send()
        .await?;
    Ok(())
}

/// Queries the current track duration and elapsed time.
///
/// `TrackDuration` and `RelTime` are `h:mm:ss` with second precision on most
/// renderers; `NOT_IMPLEMENTED` or a missing field reads as zero.
pub async fn get_position_info(
    client: &Client,
    control_url: &str,
    timeout: Duration,
) -> SoapResult<PositionInfo> {
    let response = SoapRequestBuilder::new(client, control_url)
        .action(AvTransportAction::GetPositionInfo)
        .instance_id()
        .timeout(timeout)
        .send()
        .await?;

    Ok(parse_position_info(&response))
}

pub(crate) fn parse_position_info(response: &str) -> PositionInfo {
    let track_duration = extract_xml_text(response, "TrackDuration").unwrap_or_default();
    let rel_time = extract_xml_text(response, "RelTime").unwrap_or_default();

    PositionInfo {
        duration_ms: parse_time_to_ms(&track_duration),
        position_ms: parse_time_to_ms(&rel_time),
        track_duration,
        rel_time,
    }
}
