//! Development file server for the build output.
//!
//! Every request path is cleaned, joined to the output root and checked twice:
//! lexically before touching the filesystem and again after resolving
//! symlinks. Anything that fails a check is reported as a plain 404.

use std::{
    io,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use color_eyre::eyre::{Result, WrapErr, bail};
use percent_encoding::percent_decode_str;
use sitegen_core::pathsafe;
use tokio::{fs, net::TcpListener};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::shutdown::Shutdown;

/// Body of every 404 response.
pub const NOT_FOUND_BODY: &str = "404 page not found\n";

/// Body of every 500 response.
pub const INTERNAL_ERROR_BODY: &str = "internal server error\n";

/// File served for directory requests.
const INDEX_FILE: &str = "index.html";

#[derive(Debug)]
struct ServerState {
    /// Absolute, unresolved root used for the lexical check.
    root: PathBuf,
    /// Root with symlinks resolved, used for the final containment check.
    resolved_root: PathBuf,
}

/// Why a request could not be mapped to a file.
#[derive(Debug)]
enum Lookup {
    NotFound,
    Internal(io::Error),
}

impl From<io::Error> for Lookup {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::NotADirectory
            | io::ErrorKind::PermissionDenied => Self::NotFound,
            _ => Self::Internal(err),
        }
    }
}

/// Create the development server router for `root`.
///
/// Fails if `root` does not exist or is not a directory.
pub fn create_router(root: &Path) -> Result<Router> {
    let absolute = pathsafe::absolutize(root)
        .wrap_err_with(|| format!("failed to resolve server root {}", root.display()))?;

    let metadata = std::fs::metadata(&absolute)
        .wrap_err_with(|| format!("failed to stat server root {}", absolute.display()))?;
    if !metadata.is_dir() {
        bail!("server root is not a directory: {}", root.display());
    }

    let resolved_root = std::fs::canonicalize(&absolute)
        .wrap_err_with(|| format!("failed to resolve server root {}", absolute.display()))?;

    let state = Arc::new(ServerState {
        root: absolute,
        resolved_root,
    });

    Ok(Router::new().fallback(serve_request).with_state(state))
}

/// Bind the dev server listener. `host` may be a name or an IP address.
pub async fn bind(host: &str, port: u16) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind((host, port))
        .await
        .wrap_err_with(|| format!("failed to bind to {host}:{port}"))?;
    let local = listener
        .local_addr()
        .wrap_err("failed to read bound address")?;
    Ok((listener, local))
}

/// Run `router` on a bound listener until `shutdown` fires.
///
/// In-flight requests get `drain_timeout` to finish after the signal.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: Shutdown,
    drain_timeout: Duration,
) -> Result<()> {
    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled());
    let mut handle = tokio::spawn(server.into_future());

    tokio::select! {
        joined = &mut handle => {
            return joined.wrap_err("server task failed")?.wrap_err("server error");
        }
        () = shutdown.cancelled() => {}
    }

    match tokio::time::timeout(drain_timeout, &mut handle).await {
        Ok(joined) => {
            joined.wrap_err("server task failed")?.wrap_err("server error")?;
            tracing::info!("dev server stopped");
        }
        Err(_) => {
            tracing::warn!(timeout = ?drain_timeout, "dev server shutdown timed out");
            handle.abort();
        }
    }

    Ok(())
}

async fn serve_request(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let request_path = request.uri().path().to_string();

    match resolve_file(&state, &request_path).await {
        Ok(path) => match ServeFile::new(&path).oneshot(request).await {
            Ok(response) => response.map(Body::new),
            Err(err) => match err {},
        },
        Err(Lookup::NotFound) => {
            tracing::debug!(path = %request_path, "not found");
            text_response(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
        }
        Err(Lookup::Internal(err)) => {
            tracing::error!(path = %request_path, error = %err, "failed to serve request");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY)
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Decode and clean a URL path into a root-relative filesystem path.
///
/// `..` segments are folded against the URL root, so the result never
/// starts with a parent component. Returns `None` for undecodable paths.
fn clean_request_path(request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(request_path).decode_utf8().ok()?;

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let relative: PathBuf = segments.iter().collect();
    // Decoded segments may still carry platform separators or prefixes.
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return None;
    }

    Some(relative)
}

async fn resolve_file(state: &ServerState, request_path: &str) -> Result<PathBuf, Lookup> {
    let relative = clean_request_path(request_path).ok_or(Lookup::NotFound)?;
    let mut target = state.root.join(relative);

    if !pathsafe::is_within_root(&state.root, &target) {
        return Err(Lookup::NotFound);
    }

    let metadata = fs::metadata(&target).await?;
    if metadata.is_dir() {
        target.push(INDEX_FILE);
        match fs::metadata(&target).await {
            Ok(index) if index.is_file() => {}
            _ => return Err(Lookup::NotFound),
        }
    }

    let resolved = fs::canonicalize(&target).await?;
    if !resolved.starts_with(&state.resolved_root) {
        return Err(Lookup::NotFound);
    }

    Ok(resolved)
}
