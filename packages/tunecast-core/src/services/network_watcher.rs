//! Turns host interface state into network capability transitions.
//!
//! Polls an [`IpDetector`]: a detected address means the network is up, a
//! detection error means it is down. An address change is reported as down
//! followed by up so the registry is rebuilt for the new network.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::network_monitor::NetworkCapabilityMonitor;
use crate::context::{IpDetector, NetworkContext};
use crate::runtime::{TaskSpawner, TokioSpawner};

pub struct NetworkWatcher {
    detector: Arc<dyn IpDetector>,
    monitor: Arc<NetworkCapabilityMonitor>,
    /// Updated with the new address when the context auto-detects its IP.
    network: Option<NetworkContext>,
    interval: Duration,
}

impl NetworkWatcher {
    pub fn new(
        detector: Arc<dyn IpDetector>,
        monitor: Arc<NetworkCapabilityMonitor>,
        network: Option<NetworkContext>,
        interval: Duration,
    ) -> Self {
        Self {
            detector,
            monitor,
            network,
            interval,
        }
    }

    /// Checks immediately, then every interval until cancelled.
    pub fn start(self, spawner: &TokioSpawner, cancel_token: CancellationToken) -> JoinHandle<()> {
        spawner.spawn(async move {
            let mut last_ip = None;
            loop {
                self.check(&mut last_ip);
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            log::debug!("[Network] Watcher stopped");
        })
    }

    /// Runs one detection and applies the resulting transition.
    pub fn check(&self, last_ip: &mut Option<String>) {
        let current = match self.detector.detect() {
            Ok(ip) => Some(ip),
            Err(e) => {
                if last_ip.is_some() {
                    log::warn!("[Network] Lost network: {}", e);
                }
                None
            }
        };

        match (last_ip.as_deref(), current.as_deref()) {
            (Some(old), Some(new)) if old != new => {
                log::info!("[Network] Address changed {} -> {}", old, new);
                self.monitor.on_network_change(false);
                self.update_context(new);
                self.monitor.on_network_change(true);
            }
            (_, Some(new)) => {
                self.update_context(new);
                self.monitor.on_network_change(true);
            }
            (_, None) => self.monitor.on_network_change(false),
        }

        *last_ip = current;
    }

    fn update_context(&self, ip: &str) {
        if let Some(network) = &self.network {
            if network.get_local_ip() != ip {
                network.set_local_ip(ip.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_stream::StreamExt;

    use crate::context::NetworkError;
    use crate::events::{DeviceEvent, NoopEventEmitter};
    use crate::services::network_monitor::DeviceEventStream;
    use crate::upnp::traits::{DescriptionFetch, SsdpSearch};
    use crate::upnp::types::{DiscoveryResult, ProbeError, ProbeResult, RendererCapability};
    use crate::upnp::{Device, RendererScanner};

    struct ScriptedDetector {
        answers: Mutex<VecDeque<Option<&'static str>>>,
    }

    impl ScriptedDetector {
        fn new(answers: Vec<Option<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
            })
        }
    }

    impl IpDetector for ScriptedDetector {
        fn detect(&self) -> Result<String, NetworkError> {
            match self.answers.lock().pop_front().flatten() {
                Some(ip) => Ok(ip.to_string()),
                None => Err(NetworkError::Detection("no interface".to_string())),
            }
        }
    }

    struct EmptyNetwork;

    #[async_trait]
    impl SsdpSearch for EmptyNetwork {
        async fn search(&self) -> DiscoveryResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl DescriptionFetch for EmptyNetwork {
        async fn probe(&self, _device: &Device) -> ProbeResult<RendererCapability> {
            Err(ProbeError::MissingControlUrl)
        }
    }

    fn monitor() -> Arc<NetworkCapabilityMonitor> {
        Arc::new(NetworkCapabilityMonitor::new(
            RendererScanner::new(Arc::new(EmptyNetwork)),
            Arc::new(NoopEventEmitter),
            Duration::from_secs(3600),
            TokioSpawner::current(),
            CancellationToken::new(),
        ))
    }

    async fn next(stream: &mut DeviceEventStream) -> DeviceEvent {
        tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("event within timeout")
            .expect("stream open")
    }

    #[tokio::test]
    async fn detection_drives_up_and_down() {
        let monitor = monitor();
        let watcher = NetworkWatcher::new(
            ScriptedDetector::new(vec![Some("192.168.1.10"), Some("192.168.1.10"), None]),
            monitor.clone(),
            None,
            Duration::from_secs(5),
        );
        let mut last_ip = None;

        watcher.check(&mut last_ip);
        assert!(monitor.is_up());
        watcher.check(&mut last_ip);
        assert!(monitor.is_up());
        watcher.check(&mut last_ip);
        assert!(!monitor.is_up());
        assert_eq!(last_ip, None);
    }

    #[tokio::test]
    async fn address_change_cycles_the_monitor() {
        let monitor = monitor();
        let network = NetworkContext::explicit(8080, "192.168.1.10".parse().unwrap());
        let watcher = NetworkWatcher::new(
            ScriptedDetector::new(vec![Some("192.168.1.10"), Some("10.0.0.7")]),
            monitor.clone(),
            Some(network.clone()),
            Duration::from_secs(5),
        );
        let mut last_ip = None;
        watcher.check(&mut last_ip);

        let mut events = monitor.subscribe();
        assert_eq!(next(&mut events).await, DeviceEvent::NetworkState { is_up: true });

        watcher.check(&mut last_ip);

        assert_eq!(next(&mut events).await, DeviceEvent::NetworkState { is_up: false });
        assert_eq!(next(&mut events).await, DeviceEvent::NetworkState { is_up: true });
        assert_eq!(network.get_local_ip(), "10.0.0.7");
        assert!(monitor.is_up());
    }
}
