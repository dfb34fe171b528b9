//! Network configuration context.
//!
//! [`NetworkContext`] bundles the address renderers use to reach the static
//! file server. It supports explicit configuration (advertise IP given on the
//! command line) and auto-detection through an [`IpDetector`].

use std::net::IpAddr;
#[cfg(test)]
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Url;

/// Network configuration shared across services.
#[derive(Clone)]
pub struct NetworkContext {
    /// File server port (0 until the server has bound, if auto-assigned).
    port: Arc<RwLock<u16>>,
    /// IP address renderers can reach us at.
    local_ip: Arc<RwLock<String>>,
    /// IP detector for checking network changes (auto-detect mode only).
    ip_detector: Option<Arc<dyn IpDetector>>,
}

impl NetworkContext {
    /// Creates a `NetworkContext` with explicit configuration.
    #[must_use]
    pub fn explicit(bind_port: u16, advertise_ip: IpAddr) -> Self {
        Self {
            port: Arc::new(RwLock::new(bind_port)),
            local_ip: Arc::new(RwLock::new(advertise_ip.to_string())),
            ip_detector: None,
        }
    }

    /// Creates a `NetworkContext` with auto-detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial IP detection fails.
    pub fn auto_detect(
        preferred_port: u16,
        ip_detector: Arc<dyn IpDetector>,
    ) -> Result<Self, NetworkError> {
        let local_ip = ip_detector.detect()?;
        Ok(Self {
            port: Arc::new(RwLock::new(preferred_port)),
            local_ip: Arc::new(RwLock::new(local_ip)),
            ip_detector: Some(ip_detector),
        })
    }

    /// Creates a `NetworkContext` for testing with a fixed IP.
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::explicit(8080, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
    }

    /// Returns the detector, if this context was created in auto-detect mode.
    pub fn ip_detector(&self) -> Option<Arc<dyn IpDetector>> {
        self.ip_detector.clone()
    }

    #[must_use]
    pub fn get_port(&self) -> u16 {
        *self.port.read()
    }

    #[must_use]
    pub fn get_local_ip(&self) -> String {
        self.local_ip.read().clone()
    }

    pub fn set_port(&self, port: u16) {
        *self.port.write() = port;
    }

    pub fn set_local_ip(&self, ip: String) {
        *self.local_ip.write() = ip;
    }

    /// Returns the URL a renderer fetches `path` from on the file server.
    ///
    /// Path segments are percent-encoded; a leading `/` is ignored.
    pub fn media_url(&self, path: &str) -> Result<String, NetworkError> {
        let base = format!("http://{}:{}/", self.get_local_ip(), self.get_port());
        join_url(&base, path)
    }
}

/// Trait for detecting the local IP address.
pub trait IpDetector: Send + Sync {
    /// Detects the local IP address. An error means no usable network.
    fn detect(&self) -> Result<String, NetworkError>;
}

/// Default IP detector using the system's network interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalIpDetector;

impl LocalIpDetector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self::new())
    }
}

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<String, NetworkError> {
        local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Could not detect local IP address.
    #[error("Failed to detect local IP: {0}")]
    Detection(String),

    /// A media URL could not be built.
    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),
}

/// Joins a relative media path onto a base URL, percent-encoding segments.
pub fn join_url(base: &str, path: &str) -> Result<String, NetworkError> {
    let mut url = Url::parse(base).map_err(|e| NetworkError::InvalidUrl(e.to_string()))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| NetworkError::InvalidUrl(format!("{} cannot be a base", base)))?;
        segments.pop_if_empty();
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url.to_string())
}
