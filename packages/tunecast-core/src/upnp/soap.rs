//! Low-level SOAP protocol implementation for AVTransport control.
//!
//! Builds the envelope, POSTs it to the renderer's control URL and maps the
//! response. For the typed actions, see `transport.rs`.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use super::services::{AvTransportAction, AV_TRANSPORT_URN};
use super::utils::{escape_xml, extract_xml_text};
use crate::protocol_constants::AV_TRANSPORT_INSTANCE_ID;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during SOAP operations with a renderer.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the renderer failed (includes the per-call timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Renderer answered with a status other than 200 and no SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Renderer returned a SOAP fault.
    #[error("SOAP fault: {0}")]
    Fault(String),

    /// Failed to build the request or parse the response.
    #[error("Failed to parse SOAP response")]
    Parse,
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    /// Returns true if the call expired on the client-side timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SoapError::Http(e) if e.is_timeout())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request/Response
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the SOAP envelope for an AVTransport action.
///
/// The envelope is a single line; some renderers reject whitespace before the
/// root element.
pub(crate) fn build_envelope(action: &str, args: &[(&str, &str)]) -> String {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{} xmlns:u="{}">"#,
        action, AV_TRANSPORT_URN
    );

    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }

    body.push_str(&format!(r#"</u:{}></s:Body></s:Envelope>"#, action));
    body
}

/// Sends a SOAP request to a renderer's AVTransport control URL.
///
/// `control_url` is the normalized `<ip>:<port>/<path>` form stored on the
/// device. Only HTTP 200 counts as success; every call is bounded by
/// `timeout` and never retried.
pub async fn send_soap_request(
    client: &Client,
    control_url: &str,
    action: AvTransportAction,
    args: &[(&str, &str)],
    timeout: Duration,
) -> SoapResult<String> {
    let url = format!("http://{}", control_url);
    let body = build_envelope(action.name(), args);

    log::info!(
        "[SOAP] {} -> {} (body: {} bytes)",
        action.name(),
        url,
        body.len()
    );
    log::debug!("[SOAP] Request body: {}", body);

    let start = std::time::Instant::now();
    let res = client
        .post(&url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", action.soap_action_header())
        .body(body)
        .timeout(timeout)
        .send()
        .await;

    log::debug!(
        "[SOAP] {} completed in {:?}: {:?}",
        action.name(),
        start.elapsed(),
        res.as_ref().map(|r| r.status())
    );

    let res = res?;
    let status = res.status();
    let response_text = res.text().await?;

    if response_text.contains(":Fault>") || response_text.contains("<Fault>") {
        let fault_msg = extract_fault_string(&response_text)
            .unwrap_or_else(|| "Unknown SOAP fault".to_string());
        return Err(SoapError::Fault(fault_msg));
    }

    if status != reqwest::StatusCode::OK {
        return Err(SoapError::HttpStatus(status.as_u16(), response_text));
    }

    Ok(response_text)
}

/// Extracts the fault description, preferring the UPnP error code detail.
fn extract_fault_string(xml: &str) -> Option<String> {
    let fault = extract_xml_text(xml, "faultstring");
    match (extract_xml_text(xml, "errorCode"), fault) {
        (Some(code), Some(fault)) => Some(format!("{} ({})", fault, code)),
        (None, fault) => fault,
        (Some(code), None) => Some(code),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for constructing and sending AVTransport requests.
///
/// # Example
/// ```ignore
/// let response = SoapRequestBuilder::new(&client, "192.168.1.50:80/ctrl")
///     .action(AvTransportAction::Play)
///     .instance_id()
///     .arg("Speed", "1")
///     .send()
///     .await?;
/// ```
pub struct SoapRequestBuilder<'a> {
    client: &'a Client,
    control_url: &'a str,
    action: Option<AvTransportAction>,
    args: Vec<(&'a str, String)>,
    timeout: Duration,
}

impl<'a> SoapRequestBuilder<'a> {
    #[must_use]
    pub fn new(client: &'a Client, control_url: &'a str) -> Self {
        Self {
            client,
            control_url,
            action: None,
            args: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn action(mut self, action: AvTransportAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Adds an argument; arguments keep insertion order in the body.
    #[must_use]
    pub fn arg(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.args.push((key, value.into()));
        self
    }

    /// Adds the `InstanceID` argument every AVTransport action carries.
    #[must_use]
    pub fn instance_id(self) -> Self {
        self.arg("InstanceID", AV_TRANSPORT_INSTANCE_ID)
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends the request and returns the response body.
    ///
    /// # Errors
    /// Returns `SoapError::Parse` if no action was set, otherwise whatever
    /// [`send_soap_request`] returns.
    pub async fn send(self) -> SoapResult<String> {
        let action = self.action.ok_or(SoapError::Parse)?;
        let args: Vec<(&str, &str)> = self.args.iter().map(|(k, v)| (*k, v.as_str())).collect();
        send_soap_request(self.client, self.control_url, action, &args, self.timeout).await
    }

    #[cfg(test)]
    pub fn into_parts(self) -> Option<(AvTransportAction, Vec<(&'a str, String)>, Duration)> {
        Some((self.action?, self.args, self.timeout))
    }
}
