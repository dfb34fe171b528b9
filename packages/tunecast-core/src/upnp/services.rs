//! AVTransport service definition.
//!
//! Single source of truth for the service URN and the action names the
//! renderer client sends.

use serde::Serialize;

/// UPnP AVTransport service URN.
pub const AV_TRANSPORT_URN: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// AVTransport actions used to drive a renderer.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
pub enum AvTransportAction {
    /// Loads a media URI (and its DIDL-Lite metadata) into the transport.
    SetAVTransportURI,
    /// Starts or resumes playback.
    Play,
    Pause,
    Stop,
    /// Queries track duration and elapsed time.
    GetPositionInfo,
}

impl AvTransportAction {
    /// Returns the SOAP action name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetAVTransportURI => "SetAVTransportURI",
            Self::Play => "Play",
            Self::Pause => "Pause",
            Self::Stop => "Stop",
            Self::GetPositionInfo => "GetPositionInfo",
        }
    }

    /// Returns the quoted `SOAPAction` header value for this action.
    #[must_use]
    pub fn soap_action_header(&self) -> String {
        format!("\"{}#{}\"", AV_TRANSPORT_URN, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soap_action_header_is_quoted_urn_and_action() {
        assert_eq!(
            AvTransportAction::Play.soap_action_header(),
            "\"urn:schemas-upnp-org:service:AVTransport:1#Play\""
        );
        assert_eq!(
            AvTransportAction::SetAVTransportURI.name(),
            "SetAVTransportURI"
        );
    }
}
