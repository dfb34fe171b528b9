//! DIDL-Lite metadata sent with `SetAVTransportURI`.
//!
//! Renderers use it to show the song on their display and to pick a decoder
//! from the `protocolInfo` MIME type.

use crate::api::mime_type_for_path;
use crate::protocol_constants::APP_NAME;
use crate::upnp::utils::escape_xml;

/// Track details rendered into the metadata.
#[derive(Debug, Clone, Copy)]
pub struct TrackMetadata<'a> {
    pub title: &'a str,
    pub artist: &'a str,
}

/// Formats DIDL-Lite metadata for a single music track.
///
/// The MIME type is derived from the URL's file extension with the same table
/// the file server uses, so a renderer sees the type it will be served.
pub(crate) fn format_didl_lite(url: &str, track: TrackMetadata<'_>) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mime_type = mime_type_for_path(path);
    let title = if track.title.is_empty() {
        APP_NAME
    } else {
        track.title
    };

    log::debug!(
        "[DIDL] title={:?}, artist={:?}, mime={}",
        title,
        track.artist,
        mime_type
    );

    let mut didl = String::from(
        r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">"#,
    );
    didl.push_str(r#"<item id="1" parentID="0" restricted="1">"#);
    didl.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(title)));
    if !track.artist.is_empty() {
        didl.push_str(&format!(
            "<dc:creator>{}</dc:creator>",
            escape_xml(track.artist)
        ));
        didl.push_str(&format!(
            "<upnp:artist>{}</upnp:artist>",
            escape_xml(track.artist)
        ));
    }
    didl.push_str("<upnp:class>object.item.audioItem.musicTrack</upnp:class>");
    didl.push_str(&format!(
        r#"<res protocolInfo="http-get:*:{}:*">{}</res>"#,
        mime_type,
        escape_xml(url)
    ));
    didl.push_str("</item>");
    didl.push_str("</DIDL-Lite>");

    didl
}
