//! Route and handler for serving media files from a root directory.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

use super::mime_type_for_path;

#[derive(Clone)]
struct MediaState {
    root: Arc<PathBuf>,
}

/// Creates the file server router. Only GET and HEAD are routed; anything
/// else gets 405 from axum.
pub fn create_router(root: PathBuf) -> Router {
    let state = MediaState {
        root: Arc::new(root),
    };
    Router::new()
        .route("/{*path}", get(serve_file).head(serve_file))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Maps a request path onto the root. `None` if it tries to leave the root.
fn resolve(root: &FsPath, request_path: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for segment in request_path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') || s.contains(':') => return None,
            s => resolved.push(s),
        }
    }
    Some(resolved)
}

async fn serve_file(
    State(state): State<MediaState>,
    method: Method,
    Path(path): Path<String>,
) -> Response {
    let Some(file_path) = resolve(&state.root, &path) else {
        log::debug!("[FileServer] Rejected path outside root: {}", path);
        return StatusCode::NOT_FOUND.into_response();
    };

    let metadata = match tokio::fs::metadata(&file_path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => {
            log::debug!("[FileServer] Not found: {}", path);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        match tokio::fs::File::open(&file_path).await {
            Ok(file) => Body::from_stream(ReaderStream::new(file)),
            Err(e) => {
                log::warn!("[FileServer] Failed to open {}: {}", file_path.display(), e);
                return StatusCode::NOT_FOUND.into_response();
            }
        }
    };

    log::debug!(
        "[FileServer] {} {} ({} bytes)",
        method,
        path,
        metadata.len()
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type_for_path(&path))
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::DATE, httpdate::fmt_http_date(SystemTime::now()));
    if let Ok(modified) = metadata.modified() {
        builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));
    }

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
