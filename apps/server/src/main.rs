//! Tunecast Server - headless renderer controller.
//!
//! Serves a media directory over HTTP, keeps track of the UPnP/DLNA
//! renderers on the network, and plays an M3U playlist either on a chosen
//! renderer or on this machine.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tunecast_core::{
    bootstrap_services, local_device, BootstrappedServices, CpalEngine, Device, DeviceEvent,
    EventEmitter, InMemoryPlaylist, LocalIpDetector, LoggingEventEmitter,
    NetworkCapabilityMonitor, NetworkContext, PlaybackCommand, PlaylistStore, Source,
};

use crate::config::ServerConfig;

/// Tunecast Server - play a playlist on UPnP/DLNA renderers.
#[derive(Parser, Debug)]
#[command(name = "tunecast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TUNECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// File server port (overrides config file).
    #[arg(short = 'p', long, env = "TUNECAST_BIND_PORT")]
    port: Option<u16>,

    /// Advertise IP address (overrides config file).
    #[arg(short = 'a', long, env = "TUNECAST_ADVERTISE_IP")]
    advertise_ip: Option<std::net::IpAddr>,

    /// Directory to serve to renderers.
    #[arg(short = 'm', long, env = "TUNECAST_MEDIA_ROOT")]
    media_root: Option<PathBuf>,

    /// M3U playlist to play.
    #[arg(long, env = "TUNECAST_PLAYLIST")]
    playlist: Option<PathBuf>,

    /// Renderer to play on (friendly name or IP), or `local`.
    #[arg(short = 'r', long, env = "TUNECAST_RENDERER")]
    renderer: Option<String>,

    /// Repeat the playlist.
    #[arg(long, env = "TUNECAST_REPEAT")]
    repeat: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Tunecast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }
    if let Some(media_root) = args.media_root {
        config.media_root = media_root;
    }
    if let Some(playlist) = args.playlist {
        config.playlist = Some(playlist);
    }
    if let Some(renderer) = args.renderer {
        config.renderer = Some(renderer);
    }
    if args.repeat {
        config.repeat = true;
    }

    let media_root = config
        .media_root
        .canonicalize()
        .with_context(|| format!("Media root {} does not exist", config.media_root.display()))?;

    // Resolve advertise IP: use explicit config, or fall back to auto-detection
    let network = if let Some(ip) = config.advertise_ip {
        log::info!(
            "Configuration: bind_port={}, advertise_ip={}",
            config.bind_port,
            ip
        );
        NetworkContext::explicit(config.bind_port, ip)
    } else {
        log::info!(
            "Configuration: bind_port={}, advertise_ip=auto",
            config.bind_port
        );
        NetworkContext::auto_detect(config.bind_port, LocalIpDetector::arc()).context(
            "Failed to auto-detect local IP address. \
             Please specify --advertise-ip or set TUNECAST_ADVERTISE_IP to the IP \
             address that renderers can reach.",
        )?
    };

    let playlist = load_playlist(&config, &media_root)?;
    log::info!("Playlist has {} song(s)", playlist.len());

    let core_config = config.to_core_config();
    let services = bootstrap_services(
        &core_config,
        network,
        playlist,
        Arc::new(CpalEngine::new()),
    )
    .context("Failed to bootstrap services")?;
    services
        .event_bridge
        .set_external_emitter(Arc::new(LoggingEventEmitter) as Arc<dyn EventEmitter>);

    log::info!("Services bootstrapped successfully");

    let mut tasks = services.start_background_tasks(media_root);
    tasks.push(spawn_autoplay(&services, &config));

    log::info!("Background tasks started");

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    for task in tasks {
        let _ = task.await;
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Loads the configured playlist, or an empty one when none is configured.
fn load_playlist(
    config: &ServerConfig,
    media_root: &std::path::Path,
) -> Result<Arc<dyn PlaylistStore>> {
    let source = Source {
        local_root: Some(media_root.to_path_buf()),
        remote_base_url: config.remote_base_url.clone(),
    };

    let playlist = match &config.playlist {
        Some(path) => InMemoryPlaylist::load_m3u(path, source)
            .with_context(|| format!("Failed to read playlist: {}", path.display()))?,
        None => {
            log::warn!("No playlist configured; nothing to play");
            InMemoryPlaylist::default()
        }
    };
    Ok(Arc::new(playlist))
}

/// Selects the configured target once it is available and starts playing.
fn spawn_autoplay(
    services: &BootstrappedServices,
    config: &ServerConfig,
) -> tokio::task::JoinHandle<()> {
    let router = Arc::clone(&services.router);
    let monitor = Arc::clone(&services.monitor);
    let wanted = (!config.wants_local()).then(|| config.renderer.clone()).flatten();
    let token = services.cancel_token.child_token();

    tokio::spawn(async move {
        let device = match wanted {
            None => local_device(),
            Some(name) => {
                log::info!("Waiting for renderer '{}'", name);
                match wait_for_renderer(&monitor, &name, &token).await {
                    Some(device) => device,
                    None => return,
                }
            }
        };

        log::info!("Selecting {}", device.display_name());
        if let Err(e) = router.select_device(device).await {
            log::error!("Failed to select device: {}", e);
            return;
        }
        if let Err(e) = router.command(PlaybackCommand::Play).await {
            log::error!("Failed to start playback: {}", e);
        }
    })
}

/// Waits until a capable renderer matching `name` is detected.
async fn wait_for_renderer(
    monitor: &NetworkCapabilityMonitor,
    name: &str,
    token: &CancellationToken,
) -> Option<Device> {
    let mut events = monitor.subscribe();
    loop {
        tokio::select! {
            _ = token.cancelled() => return None,
            event = events.next() => match event? {
                DeviceEvent::NewDeviceDetected { device } if matches_renderer(&device, name) => {
                    return Some(device);
                }
                _ => {}
            },
        }
    }
}

fn matches_renderer(device: &Device, name: &str) -> bool {
    device.ip == name || device.display_name().eq_ignore_ascii_case(name)
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
