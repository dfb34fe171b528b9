//! Device description parsing.
//!
//! A renderer is capable when its description lists a `<service>` whose
//! `serviceType` contains `AVTransport:1` and that service has a non-empty
//! `<controlURL>`.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::device::Device;
use super::types::RendererCapability;
use super::utils::contains_ignore_ascii_case;
use crate::protocol_constants::AV_TRANSPORT_MARKER;

/// Raw fields pulled out of a description document.
#[derive(Debug, Default, PartialEq, Eq)]
struct DescriptionFields {
    friendly_name: Option<String>,
    av_transport_control_url: Option<String>,
}

fn read_element_text(reader: &mut Reader<&[u8]>, e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    reader
        .read_text(e.name())
        .ok()
        .map(|text| html_escape::decode_html_entities(text.trim()).into_owned())
}

fn scan_description(xml: &str) -> DescriptionFields {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut fields = DescriptionFields::default();

    let mut in_service = false;
    let mut service_type: Option<String> = None;
    let mut control_url: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"friendlyName" if fields.friendly_name.is_none() => {
                    fields.friendly_name =
                        read_element_text(&mut reader, e).filter(|name| !name.is_empty());
                }
                b"service" => {
                    in_service = true;
                    service_type = None;
                    control_url = None;
                }
                b"serviceType" if in_service => {
                    service_type = read_element_text(&mut reader, e);
                }
                b"controlURL" if in_service => {
                    control_url = read_element_text(&mut reader, e);
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"service" => {
                in_service = false;
                let is_transport = service_type
                    .as_deref()
                    .is_some_and(|t| contains_ignore_ascii_case(t, AV_TRANSPORT_MARKER));
                if is_transport {
                    if let Some(url) = control_url.take().filter(|u| !u.is_empty()) {
                        fields.av_transport_control_url = Some(url);
                        if fields.friendly_name.is_some() {
                            break;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("[Probe] Description XML error: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    fields
}

/// Normalizes a control URL to `<ip>:<port>/<path>` without a scheme.
///
/// `http://` URLs have their scheme stripped; relative paths are resolved
/// against the device's address. Control calls are plain HTTP, so an
/// `https://` control URL is rejected.
pub fn normalize_control_url(device: &Device, raw: &str) -> Option<String> {
    let raw = raw.trim();
    let lower = raw.get(..8).map(str::to_ascii_lowercase).unwrap_or_default();
    if lower.starts_with("http://") {
        return Some(raw[7..].to_string());
    }
    if lower.starts_with("https://") {
        log::warn!(
            "[Probe] {} uses an https control URL, which is unsupported: {}",
            device.description_url(),
            raw
        );
        return None;
    }
    Some(format!(
        "{}:{}/{}",
        device.ip,
        device.port,
        raw.trim_start_matches('/')
    ))
}

/// Parses a description document for the given device.
///
/// Returns `None` when the document has no usable AVTransport control URL.
pub fn parse_description(device: &Device, xml: &str) -> Option<RendererCapability> {
    let fields = scan_description(xml);
    let raw = fields.av_transport_control_url?;
    Some(RendererCapability {
        control_url: normalize_control_url(device, &raw)?,
        friendly_name: fields.friendly_name,
    })
}
