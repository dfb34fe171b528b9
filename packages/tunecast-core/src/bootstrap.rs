//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root: the single place where all
//! services are instantiated and wired together. Embedders (the daemon, the
//! tests) provide the pieces that differ between hosts: the network
//! context, the playlist and the local media engine.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::start_file_server;
use crate::context::{LocalIpDetector, NetworkContext};
use crate::error::{TunecastError, TunecastResult};
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::playback::{
    LocalBackend, MediaEngine, PlaybackBackend, PlaybackRouter, PlaybackShared, PlaylistStore,
    RemoteBackend, SharedWakeLock, WakeLock,
};
use crate::protocol_constants::{APP_NAME, EVENT_CHANNEL_CAPACITY};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::{NetworkCapabilityMonitor, NetworkWatcher};
use crate::state::Config;
use crate::upnp::{Device, RendererScanner, SsdpConfig, UpnpDiscoveryClient, UpnpTransportClient};

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Configuration the services were built from.
    pub config: Config,
    /// Network configuration (file server port, advertised IP).
    pub network: NetworkContext,
    /// Fan-out point for every playback and device event.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Tracks network availability and the capable renderers.
    pub monitor: Arc<NetworkCapabilityMonitor>,
    /// Routes playback commands to the local or remote backend.
    pub router: Arc<PlaybackRouter>,
    /// The playlist both backends play from.
    pub playlist: Arc<dyn PlaylistStore>,
    /// Wake resource held while either backend is playing.
    pub wake: Arc<SharedWakeLock>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Starts the file server and the network watcher.
    ///
    /// The watcher brings the monitor up on its first successful IP
    /// detection, which starts periodic scanning.
    pub fn start_background_tasks(&self, media_root: PathBuf) -> Vec<JoinHandle<()>> {
        let network = self.network.clone();
        let port = self.config.file_server_port;
        let token = self.cancel_token.child_token();
        let file_server = self.spawner.spawn(async move {
            if let Err(e) = start_file_server(media_root, port, network, token).await {
                log::error!("[Bootstrap] File server failed: {}", e);
            }
        });

        // An explicit advertise IP is never overwritten; detection still
        // decides whether the network is up.
        let (detector, watched_context) = match self.network.ip_detector() {
            Some(detector) => (detector, Some(self.network.clone())),
            None => (LocalIpDetector::arc(), None),
        };
        let watcher = NetworkWatcher::new(
            detector,
            Arc::clone(&self.monitor),
            watched_context,
            self.config.network_check_interval(),
        )
        .start(&self.spawner, self.cancel_token.child_token());

        vec![file_server, watcher]
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Stop playback first so the renderer is told to stop while the
        // network is still considered up.
        self.router.shutdown().await;
        self.monitor.shutdown();
        self.cancel_token.cancel();

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// The built-in local playback target, named after this machine.
pub fn local_device() -> Device {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    Device::local(format!("{} {}", APP_NAME, hostname))
}

/// Creates the shared HTTP client for description fetches and SOAP calls.
///
/// Per-request timeouts are applied by the clients that use it.
fn create_http_client() -> TunecastResult<Client> {
    Client::builder()
        .build()
        .map_err(|e| TunecastError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client, event bridge, cancellation token)
/// 2. UPnP clients (depend on the HTTP client)
/// 3. Network capability monitor (depends on the discovery client)
/// 4. Local and remote backends (depend on playlist, wake lock, transport)
/// 5. Playback router (depends on both backends)
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the HTTP client
/// cannot be built.
pub fn bootstrap_services(
    config: &Config,
    network: NetworkContext,
    playlist: Arc<dyn PlaylistStore>,
    engine: Arc<dyn MediaEngine>,
) -> TunecastResult<BootstrappedServices> {
    config.validate().map_err(TunecastError::Configuration)?;

    let spawner = TokioSpawner::current();
    let http_client = create_http_client()?;
    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));
    let cancel_token = CancellationToken::new();

    let discovery = Arc::new(UpnpDiscoveryClient::new(
        http_client.clone(),
        SsdpConfig::from(config),
        config.probe_timeout(),
    ));
    let transport = Arc::new(UpnpTransportClient::new(
        http_client.clone(),
        config.soap_timeout(),
    ));

    let monitor = Arc::new(NetworkCapabilityMonitor::new(
        RendererScanner::new(discovery),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config.rescan_interval(),
        spawner.clone(),
        cancel_token.child_token(),
    ));

    let wake = Arc::new(SharedWakeLock::new());
    let shared = PlaybackShared {
        playlist: Arc::clone(&playlist),
        wake: Arc::clone(&wake) as Arc<dyn WakeLock>,
        repeat: Arc::new(AtomicBool::new(config.repeat)),
        poll_interval: config.position_poll_interval(),
        spawner: spawner.clone(),
    };

    let local = LocalBackend::new(engine, shared.clone());
    let remote = RemoteBackend::new(transport, network.clone(), config.end_of_track, shared.clone());

    let router = Arc::new(PlaybackRouter::new(
        local as Arc<dyn PlaybackBackend>,
        remote as Arc<dyn PlaybackBackend>,
        shared.repeat,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        &spawner,
        cancel_token.child_token(),
    ));

    Ok(BootstrappedServices {
        config: config.clone(),
        network,
        event_bridge,
        monitor,
        router,
        playlist,
        wake,
        http_client,
        spawner,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::playback::{InMemoryPlaylist, NullSinkEngine};

    #[test]
    fn local_device_is_capable_and_local() {
        let device = local_device();
        assert!(device.is_local);
        assert!(device.is_capable());
        assert!(device.display_name().starts_with(APP_NAME));
    }

    #[test]
    fn http_client_builds() {
        let client = create_http_client().unwrap();
        assert!(client.get("http://example.com").build().is_ok());
    }

    #[tokio::test]
    async fn bootstrap_starts_with_nothing_selected() {
        let services = bootstrap_services(
            &Config::default(),
            NetworkContext::for_test(),
            Arc::new(InMemoryPlaylist::new(Vec::new())),
            Arc::new(NullSinkEngine::new()),
        )
        .unwrap();

        assert_eq!(services.router.active_kind(), None);
        assert!(!services.monitor.is_up());
        assert!(services.monitor.devices().is_empty());
        assert_eq!(services.wake.holder(), None);

        services.shutdown().await;
        assert!(services.cancel_token.is_cancelled());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            ssdp_send_count: 0,
            ..Config::default()
        };
        let result = bootstrap_services(
            &config,
            NetworkContext::for_test(),
            Arc::new(InMemoryPlaylist::new(Vec::new())),
            Arc::new(NullSinkEngine::new()),
        );

        assert!(matches!(result, Err(TunecastError::Configuration(_))));
    }
}
