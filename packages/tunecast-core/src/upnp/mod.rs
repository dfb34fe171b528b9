//! UPnP/DLNA renderer discovery and AVTransport control.
//!
//! - [`ssdp`]: multicast M-SEARCH passes
//! - [`description`]: capability probing of device descriptions
//! - [`scanner`]: one discovery pass against a [`DeviceRegistry`]
//! - [`soap`] / [`transport`]: AVTransport SOAP client

pub mod client;
pub mod description;
pub mod device;
pub(crate) mod didl;
pub mod scanner;
pub mod services;
pub mod soap;
pub mod ssdp;
pub mod traits;
pub mod transport;
pub mod types;
pub mod utils;

pub use client::{UpnpDiscoveryClient, UpnpTransportClient};
pub use device::{CanPlay, Device, DeviceKey, DeviceRegistry};
pub use didl::TrackMetadata;
pub use scanner::{RendererScanner, ScanPass};
pub use soap::{SoapError, SoapResult};
pub use ssdp::SsdpConfig;
pub use traits::{AvTransport, DescriptionFetch, DiscoveryClient, SsdpSearch};
pub use types::{
    DiscoveryError, DiscoveryResult, PositionInfo, ProbeError, ProbeResult, RendererCapability,
};
