//! Relay server.
//!
//! Binds the listening socket and runs the accept loop. Each accepted TCP
//! stream gets its own task serving HTTP; a WebSocket upgrade hands the
//! socket to the connection's event loop, anything else gets the control
//! panel or a 404.
//!
//! # Connection Flow
//!
//! 1. `RelayServer::bind` - Bind the configured address
//! 2. `RelayServer::run` - Accept until shutdown
//! 3. Peer connects and sends `register`
//! 4. Frames are routed between the two roles
//! 5. On shutdown: stop accepting, drop the listener, close every session

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::relay::{Registry, Router};

use super::http::{self, PanelPage, RelayState};

// ============================================================================
// Constants
// ============================================================================

/// How long sessions get to close after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// RelayServer
// ============================================================================

/// A bound relay, ready to serve.
///
/// # Example
///
/// ```ignore
/// use collection_relay::{RelayConfig, RelayServer};
///
/// let server = RelayServer::bind(RelayConfig::default()).await?;
/// println!("Listening on {}", server.ws_url());
/// server.run().await?;
/// ```
pub struct RelayServer {
    /// Listening socket.
    listener: TcpListener,
    /// Address actually bound.
    local_addr: SocketAddr,
    /// Configuration used for every session.
    config: RelayConfig,
    /// Role registry shared by all sessions.
    registry: Arc<Registry>,
}

impl RelayServer {
    /// Binds the configured address with a fresh registry.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the configuration is invalid
    /// - [`Error::Io`](crate::Error::Io) if binding fails
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(Registry::new())).await
    }

    /// Binds the configured address, routing through `registry`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the configuration is invalid
    /// - [`Error::Io`](crate::Error::Io) if binding fails
    pub async fn with_registry(config: RelayConfig, registry: Arc<Registry>) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.socket_addr()).await?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "Relay server bound");

        Ok(Self {
            listener,
            local_addr,
            config,
            registry,
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns a WebSocket URL for this relay.
    ///
    /// Unspecified bind addresses are reported as `127.0.0.1`.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let ip = match self.local_addr.ip() {
            ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        };
        format!("ws://{}", SocketAddr::new(ip, self.port()))
    }

    /// Returns the registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serves until ctrl-c.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; the `Result` leaves room for
    /// listener-level failures.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serves until `signal` resolves, then shuts down gracefully.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            local_addr,
            config,
            registry,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (live_tx, mut live_rx) = mpsc::channel::<()>(1);
        let app = http::app(RelayState::new(
            Router::new(Arc::clone(&registry)),
            PanelPage::new(config.panel_path.clone()),
            config.heartbeat_interval,
            shutdown_rx.clone(),
            live_tx,
        ));
        let mut tasks = JoinSet::new();

        info!(%local_addr, "Relay server started");

        tokio::pin!(signal);

        loop {
            tokio::select! {
                () = &mut signal => {
                    info!("Shutting down relay server");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!(%addr, "New TCP connection");
                            tasks.spawn(http::serve_connection(
                                stream,
                                addr,
                                app.clone(),
                                shutdown_rx.clone(),
                            ));
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                            sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        // Stop accepting before anything else
        drop(listener);

        let _ = shutdown_tx.send(true);
        let closed = registry.close_all();

        // Sessions hold clones of `live_tx` through the app state
        drop(app);

        let drained = timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
            let _ = live_rx.recv().await;
        })
        .await;

        if drained.is_err() {
            warn!(remaining = tasks.len(), "Aborting connections that did not close in time");
            tasks.shutdown().await;
        }

        info!(closed, "Relay server stopped");

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
