//! Renderer scanner: one SSDP pass plus capability probing of new devices.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;

use super::device::{CanPlay, Device, DeviceKey, DeviceRegistry};
use super::traits::DiscoveryClient;
use super::types::DiscoveryResult;

/// Result of one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct ScanPass {
    /// Every device that answered this pass, ordered by identity.
    pub seen: Vec<Device>,
    /// Devices probed this pass and found capable.
    pub newly_capable: Vec<Device>,
}

/// Discovers renderers and decides, once per identity, whether each one
/// exposes an AVTransport control service.
pub struct RendererScanner {
    client: Arc<dyn DiscoveryClient>,
}

impl RendererScanner {
    pub fn new(client: Arc<dyn DiscoveryClient>) -> Self {
        Self { client }
    }

    /// Runs one discovery pass against `registry`.
    ///
    /// Devices already in the registry are reported as seen without another
    /// probe, whatever their capability. New devices are inserted as
    /// `Unknown` and probed concurrently; the pass returns once every probe
    /// has finished.
    ///
    /// # Errors
    /// Returns the discovery error if the pass could not run. The registry
    /// is left untouched in that case.
    pub async fn discover_once(&self, registry: &mut DeviceRegistry) -> DiscoveryResult<ScanPass> {
        let locations = self.client.search().await?;

        let mut seen_keys: HashSet<DeviceKey> = HashSet::new();
        let mut seen = Vec::new();
        let mut to_probe = Vec::new();

        for location in &locations {
            let Some(candidate) = Device::from_location(location) else {
                log::debug!("[Scanner] Unparseable LOCATION: {}", location);
                continue;
            };
            if !seen_keys.insert(candidate.key()) {
                continue;
            }
            match registry.find(&candidate) {
                Some(known) => seen.push(known.clone()),
                None => {
                    registry.add_if_new(candidate.clone());
                    to_probe.push(candidate);
                }
            }
        }

        if !to_probe.is_empty() {
            log::debug!("[Scanner] Probing {} new device(s)", to_probe.len());
        }

        let probed = join_all(to_probe.into_iter().map(|mut device| async move {
            self.probe_capability(&mut device).await;
            device
        }))
        .await;

        let mut newly_capable = Vec::new();
        for device in probed {
            registry.set_capability(&device);
            if device.is_capable() {
                newly_capable.push(device.clone());
            }
            seen.push(device);
        }

        seen.sort_by_key(Device::key);
        newly_capable.sort_by_key(Device::key);

        log::info!(
            "[Scanner] Pass complete: {} seen, {} newly capable",
            seen.len(),
            newly_capable.len()
        );

        Ok(ScanPass {
            seen,
            newly_capable,
        })
    }

    /// Probes one device and records the outcome on it.
    pub async fn probe_capability(&self, device: &mut Device) -> CanPlay {
        match self.client.probe(device).await {
            Ok(capability) => {
                log::info!(
                    "[Probe] {} is capable (control: {})",
                    device.description_url(),
                    capability.control_url
                );
                device.mark_capable(capability.control_url, capability.friendly_name);
            }
            Err(e) => {
                log::debug!("[Probe] {} is incapable: {}", device.description_url(), e);
                device.mark_incapable();
            }
        }
        device.can_play
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::upnp::traits::{DescriptionFetch, SsdpSearch};
    use crate::upnp::types::{DiscoveryError, ProbeError, ProbeResult, RendererCapability};

    /// Scripted discovery: each `search` returns the next batch of locations.
    struct MockDiscovery {
        batches: Mutex<Vec<Vec<String>>>,
        capable_ips: Vec<&'static str>,
        probe_count: AtomicUsize,
        fail_search: bool,
    }

    impl MockDiscovery {
        fn new(batches: Vec<Vec<&str>>, capable_ips: Vec<&'static str>) -> Self {
            Self {
                batches: Mutex::new(
                    batches
                        .into_iter()
                        .rev()
                        .map(|b| b.into_iter().map(String::from).collect())
                        .collect(),
                ),
                capable_ips,
                probe_count: AtomicUsize::new(0),
                fail_search: false,
            }
        }
    }

    #[async_trait]
    impl SsdpSearch for MockDiscovery {
        async fn search(&self) -> DiscoveryResult<Vec<String>> {
            if self.fail_search {
                return Err(DiscoveryError::NoInterfaces);
            }
            Ok(self.batches.lock().pop().unwrap_or_default())
        }
    }

    #[async_trait]
    impl DescriptionFetch for MockDiscovery {
        async fn probe(&self, device: &Device) -> ProbeResult<RendererCapability> {
            self.probe_count.fetch_add(1, Ordering::SeqCst);
            if self.capable_ips.contains(&device.ip.as_str()) {
                Ok(RendererCapability {
                    control_url: format!("{}:{}/ctrl", device.ip, device.port),
                    friendly_name: None,
                })
            } else {
                Err(ProbeError::MissingControlUrl)
            }
        }
    }

    #[tokio::test]
    async fn new_capable_device_is_probed_and_reported() {
        let mock = Arc::new(MockDiscovery::new(
            vec![vec!["http://192.168.1.50:80/desc.xml"]],
            vec!["192.168.1.50"],
        ));
        let scanner = RendererScanner::new(mock.clone());
        let mut registry = DeviceRegistry::new();

        let pass = scanner.discover_once(&mut registry).await.unwrap();

        assert_eq!(pass.newly_capable.len(), 1);
        let device = &pass.newly_capable[0];
        assert_eq!(device.can_play, CanPlay::Capable);
        assert_eq!(device.control_url.as_deref(), Some("192.168.1.50:80/ctrl"));
        assert_eq!(device.friendly_name.as_deref(), Some("192.168.1.50:80/ctrl"));
        assert_eq!(registry.capable().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_responses_probe_once() {
        let mock = Arc::new(MockDiscovery::new(
            vec![vec![
                "http://192.168.1.50:80/desc.xml",
                "http://192.168.1.50:80/desc.xml",
                "HTTP://192.168.1.50:80//desc.xml",
            ]],
            vec!["192.168.1.50"],
        ));
        let scanner = RendererScanner::new(mock.clone());
        let mut registry = DeviceRegistry::new();

        let pass = scanner.discover_once(&mut registry).await.unwrap();

        assert_eq!(mock.probe_count.load(Ordering::SeqCst), 1);
        assert_eq!(pass.seen.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn known_devices_are_never_reprobed() {
        let mock = Arc::new(MockDiscovery::new(
            vec![
                vec!["http://10.0.0.1:80/a.xml", "http://10.0.0.2:80/b.xml"],
                vec!["http://10.0.0.1:80/a.xml", "http://10.0.0.2:80/b.xml"],
            ],
            vec!["10.0.0.1"],
        ));
        let scanner = RendererScanner::new(mock.clone());
        let mut registry = DeviceRegistry::new();

        scanner.discover_once(&mut registry).await.unwrap();
        assert_eq!(mock.probe_count.load(Ordering::SeqCst), 2);

        let second = scanner.discover_once(&mut registry).await.unwrap();
        assert_eq!(mock.probe_count.load(Ordering::SeqCst), 2);
        assert_eq!(second.seen.len(), 2);
        assert!(second.newly_capable.is_empty());
        assert_eq!(
            registry
                .find(&Device::new("10.0.0.2", "b.xml", 80))
                .map(|d| d.can_play),
            Some(CanPlay::Incapable)
        );
    }

    #[tokio::test]
    async fn unparseable_locations_are_skipped() {
        let mock = Arc::new(MockDiscovery::new(
            vec![vec!["garbage", "ftp://10.0.0.3/x.xml"]],
            vec![],
        ));
        let scanner = RendererScanner::new(mock.clone());
        let mut registry = DeviceRegistry::new();

        let pass = scanner.discover_once(&mut registry).await.unwrap();
        assert!(pass.seen.is_empty());
        assert!(registry.is_empty());
        assert_eq!(mock.probe_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn search_failure_leaves_registry_untouched() {
        let mut mock = MockDiscovery::new(vec![], vec![]);
        mock.fail_search = true;
        let scanner = RendererScanner::new(Arc::new(mock));
        let mut registry = DeviceRegistry::new();
        registry.add_if_new(Device::new("10.0.0.1", "a.xml", 80));

        assert!(scanner.discover_once(&mut registry).await.is_err());
        assert_eq!(registry.len(), 1);
    }
}
