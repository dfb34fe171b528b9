//! HTTP layer: the static file server renderers pull audio from.
//!
//! The server binds once, publishes the bound port to the
//! [`NetworkContext`] so media URLs can be built, and runs until the
//! cancellation token fires.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::NetworkContext;
use crate::protocol_constants::DEFAULT_CONTENT_TYPE;

pub mod media;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Returns the content type served for `path`, judged by its extension.
pub fn mime_type_for_path(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("wma") => "audio/x-ms-wma",
        Some("aif") | Some("aiff") => "audio/aiff",
        Some("m3u") | Some("m3u8") => "audio/x-mpegurl",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// A bound, not yet serving, file server.
pub struct FileServer {
    root: PathBuf,
    listener: TcpListener,
    port: u16,
}

impl FileServer {
    /// Binds `0.0.0.0:port`. Port 0 picks an ephemeral port.
    pub async fn bind(root: PathBuf, port: u16) -> Result<Self, ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            root,
            listener,
            port,
        })
    }

    /// The port actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until `cancel_token` is cancelled.
    pub async fn serve(self, cancel_token: CancellationToken) -> Result<(), ServerError> {
        log::info!(
            "[FileServer] Serving {} on http://0.0.0.0:{}",
            self.root.display(),
            self.port
        );
        let app = media::create_router(self.root);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { cancel_token.cancelled().await })
            .await?;
        log::info!("[FileServer] Stopped");
        Ok(())
    }
}

/// Binds the file server, records its port in `network`, and serves until
/// cancelled.
pub async fn start_file_server(
    root: PathBuf,
    port: u16,
    network: NetworkContext,
    cancel_token: CancellationToken,
) -> Result<(), ServerError> {
    let server = FileServer::bind(root, port).await?;
    network.set_port(server.port());
    server.serve(cancel_token).await
}
