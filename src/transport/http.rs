//! HTTP on the relay port.
//!
//! Every accepted TCP stream is served as HTTP/1.1 by hyper with an axum
//! router on top:
//!
//! | Request | Response |
//! |---------|----------|
//! | WebSocket upgrade, any path | connection event loop |
//! | `GET /`, `GET /index.html` | control panel page |
//! | anything else | `404 - Not Found` |
//!
//! A client that does not finish its request head within [`HEAD_TIMEOUT`]
//! is disconnected.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::relay::Router;

use super::connection;

// ============================================================================
// Constants
// ============================================================================

/// How long a client may take to send its request head.
pub(crate) const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// RelayState
// ============================================================================

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub(crate) struct RelayState {
    /// Router handed to each upgraded session.
    router: Router,
    /// Control-panel page.
    panel: PanelPage,
    /// Heartbeat period for each session.
    heartbeat_interval: Duration,
    /// Relay-wide shutdown signal.
    shutdown: watch::Receiver<bool>,
    /// Held by every upgraded session; closes once all of them end.
    live_sessions: mpsc::Sender<()>,
}

impl RelayState {
    pub(crate) fn new(
        router: Router,
        panel: PanelPage,
        heartbeat_interval: Duration,
        shutdown: watch::Receiver<bool>,
        live_sessions: mpsc::Sender<()>,
    ) -> Self {
        Self {
            router,
            panel,
            heartbeat_interval,
            shutdown,
            live_sessions,
        }
    }
}

/// Builds the HTTP routes of the relay port.
pub(crate) fn app(state: RelayState) -> axum::Router {
    axum::Router::new()
        .route("/", get(panel_or_upgrade))
        .route("/index.html", get(panel_or_upgrade))
        .fallback(not_found_or_upgrade)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves one accepted stream until it closes, upgrades, or the relay
/// shuts down.
pub(crate) async fn serve_connection<I>(
    io: I,
    addr: SocketAddr,
    app: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(addr));
        app.clone().oneshot(request)
    });

    let connection = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(HEAD_TIMEOUT)
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();
    tokio::pin!(connection);

    let served = tokio::select! {
        served = connection.as_mut() => served,
        _ = shutdown.changed() => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };

    match served {
        Ok(()) => debug!(%addr, "HTTP connection finished"),
        Err(e) if e.is_timeout() => debug!(%addr, "Client sent no request in time"),
        Err(e) => debug!(%addr, error = %e, "HTTP connection failed"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn panel_or_upgrade(
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => accept(ws, addr, state),
        Err(_) => state.panel.render().await,
    }
}

async fn not_found_or_upgrade(
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => accept(ws, addr, state),
        Err(_) => (StatusCode::NOT_FOUND, "404 - Not Found").into_response(),
    }
}

/// Completes the upgrade and runs the connection event loop on the socket.
fn accept(ws: WebSocketUpgrade, addr: SocketAddr, state: RelayState) -> Response {
    let RelayState {
        router,
        heartbeat_interval,
        shutdown,
        live_sessions,
        ..
    } = state;

    ws.on_failed_upgrade(move |e| warn!(%addr, error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let _live = live_sessions;
            connection::serve(socket, addr, router, heartbeat_interval, shutdown).await;
        })
}

// ============================================================================
// PanelPage
// ============================================================================

/// Control-panel page served at `/`.
#[derive(Debug, Clone)]
pub(crate) struct PanelPage {
    /// File to serve. `None` disables the panel.
    path: Option<PathBuf>,
}

impl PanelPage {
    pub(crate) fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Reads the page from disk on every request.
    async fn render(&self) -> Response {
        let Some(path) = &self.path else {
            return (StatusCode::NOT_FOUND, "404 - Control panel disabled").into_response();
        };

        match tokio::fs::read(path).await {
            Ok(bytes) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                bytes,
            )
                .into_response(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error reading control panel");
                (
                    StatusCode::NOT_FOUND,
                    format!("404 - Control panel not found. Please create {}", path.display()),
                )
                    .into_response()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::{Instant, timeout};

    use crate::relay::Registry;

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 50000))
    }

    fn test_app(panel: Option<PathBuf>) -> (axum::Router, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (live_tx, _live_rx) = mpsc::channel(1);
        let state = RelayState::new(
            Router::new(Arc::new(Registry::new())),
            PanelPage::new(panel),
            Duration::from_secs(30),
            shutdown_rx,
            live_tx,
        );
        (app(state), shutdown_tx)
    }

    async fn call(app: axum::Router, method: Method, path: &str) -> (StatusCode, String, String) {
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(addr()));

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_serves_panel_at_root_and_index() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<html>panel</html>").unwrap();
        let (app, _shutdown) = test_app(Some(file.path().to_path_buf()));

        for path in ["/", "/index.html"] {
            let (status, content_type, body) = call(app.clone(), Method::GET, path).await;
            assert_eq!(status, StatusCode::OK, "{path}");
            assert!(content_type.starts_with("text/html"));
            assert_eq!(body, "<html>panel</html>");
        }
    }

    #[tokio::test]
    async fn test_head_request_has_no_body() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<html>panel</html>").unwrap();
        let (app, _shutdown) = test_app(Some(file.path().to_path_buf()));

        let (status, _, body) = call(app, Method::HEAD, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_other_paths_404() {
        let (app, _shutdown) = test_app(None);
        let (status, _, body) = call(app, Method::GET, "/favicon.ico").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "404 - Not Found");
    }

    #[tokio::test]
    async fn test_missing_panel_file_404() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _shutdown) = test_app(Some(dir.path().join("missing.html")));

        let (status, _, body) = call(app, Method::GET, "/index.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Control panel not found"));
    }

    #[tokio::test]
    async fn test_disabled_panel_404() {
        let (app, _shutdown) = test_app(None);
        let (status, _, body) = call(app, Method::GET, "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("disabled"));
    }

    #[tokio::test]
    async fn test_serve_connection_over_stream() {
        let (app, shutdown) = test_app(None);
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(serve_connection(server, addr(), app, shutdown.subscribe()));

        client
            .write_all(b"GET /nope HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.ends_with("404 - Not Found"));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_is_disconnected() {
        let (app, shutdown) = test_app(None);
        let (_client, server) = tokio::io::duplex(4096);
        let started = Instant::now();

        timeout(
            HEAD_TIMEOUT * 3,
            serve_connection(server, addr(), app, shutdown.subscribe()),
        )
        .await
        .expect("silent connection should be dropped");

        assert!(started.elapsed() >= HEAD_TIMEOUT);
    }

    #[tokio::test]
    async fn test_shutdown_ends_idle_connection() {
        let (app, shutdown) = test_app(None);
        let (_client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(serve_connection(server, addr(), app, shutdown.subscribe()));

        shutdown.send(true).unwrap();
        timeout(Duration::from_secs(5), task)
            .await
            .expect("connection should close on shutdown")
            .unwrap();
    }
}
