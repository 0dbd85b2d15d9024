//! Peer client.
//!
//! The side of the protocol a browser agent or controller implements:
//! connect, register, exchange messages, and reconnect after a fixed delay
//! whenever the relay goes away.
//!
//! # Example
//!
//! ```ignore
//! use collection_relay::{Message, PeerClient, Role};
//!
//! let (client, mut inbound) = PeerClient::connect("ws://localhost:8080", Role::Extension)?;
//!
//! while let Some(message) = inbound.recv().await {
//!     if let Message::SaveRequest { tag, .. } = message {
//!         client.send(Message::saved(tag))?;
//!     }
//! }
//! ```
//!
//! # Event Loop
//!
//! A background task owns the socket. While connected it multiplexes inbound
//! frames and outbound sends; while disconnected it waits out the reconnect
//! delay and drops any sends that slip in. Dropping the [`PeerClient`] stops
//! the task.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Message, Role};

// ============================================================================
// Constants
// ============================================================================

/// Default delay before reconnecting.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

// ============================================================================
// Types
// ============================================================================

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands for the client event loop.
enum ClientCommand {
    /// Write a text frame.
    Send(String),
    /// Close and stop reconnecting.
    Shutdown,
}

/// How a connected period ended.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Disconnected,
    Shutdown,
}

// ============================================================================
// PeerClientBuilder
// ============================================================================

/// Builder for [`PeerClient`].
#[derive(Debug, Clone)]
pub struct PeerClientBuilder {
    url: String,
    role: Role,
    reconnect_delay: Duration,
}

impl PeerClientBuilder {
    /// Sets the delay between connection attempts.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Validates the URL and starts the connection task.
    ///
    /// Returns the client and the stream of messages received from the
    /// relay. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if the URL does not parse
    /// - [`Error::Config`] if the scheme is not `ws` or `wss`
    pub fn connect(self) -> Result<(PeerClient, mpsc::UnboundedReceiver<Message>)> {
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "relay URL must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run(
            url.clone(),
            self.role,
            self.reconnect_delay,
            command_rx,
            inbound_tx,
            Arc::clone(&connected),
        ));

        let client = PeerClient {
            url,
            role: self.role,
            command_tx,
            connected,
        };

        Ok((client, inbound_rx))
    }
}

// ============================================================================
// PeerClient
// ============================================================================

/// Auto-reconnecting connection to a relay under one role.
pub struct PeerClient {
    /// Relay URL.
    url: Url,
    /// Role registered on every connect.
    role: Role,
    /// Channel to the event loop.
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    /// Whether a socket is currently open.
    connected: Arc<AtomicBool>,
}

impl PeerClient {
    /// Creates a builder with the default reconnect delay.
    #[inline]
    #[must_use]
    pub fn builder(url: impl Into<String>, role: Role) -> PeerClientBuilder {
        PeerClientBuilder {
            url: url.into(),
            role,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Connects with default settings.
    ///
    /// # Errors
    ///
    /// See [`PeerClientBuilder::connect`].
    pub fn connect(
        url: impl Into<String>,
        role: Role,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Message>)> {
        Self::builder(url, role).connect()
    }

    /// Returns the role this client registers as.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the relay URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns `true` while a socket to the relay is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends a message to the relay.
    ///
    /// Nothing is queued for later: while disconnected the message is
    /// rejected.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no socket is open
    /// - [`Error::ConnectionClosed`] if the client was shut down
    /// - [`Error::Json`] if serialization fails
    pub fn send(&self, message: Message) -> Result<()> {
        if !self.is_connected() {
            warn!(kind = %message.kind(), "Not connected, cannot send");
            return Err(Error::NotConnected);
        }

        self.command_tx
            .send(ClientCommand::Send(message.to_json()?))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the connection and stops reconnecting.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ClientCommand::Shutdown);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Connect / serve / back off, until shutdown.
async fn run(
    url: Url,
    role: Role,
    reconnect_delay: Duration,
    mut command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
) {
    loop {
        debug!(%url, %role, "Connecting to relay");

        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                info!(%url, %role, "Connected to relay");
                connected.store(true, Ordering::Release);

                let exit = drive(socket, role, &mut command_rx, &inbound_tx).await;

                connected.store(false, Ordering::Release);
                if exit == Exit::Shutdown {
                    info!(%role, "Peer client stopped");
                    return;
                }
                info!(%role, "Disconnected from relay");
            }
            Err(e) => {
                warn!(%url, error = %e, "Failed to connect to relay");
            }
        }

        info!(delay = ?reconnect_delay, "Reconnecting");

        let backoff = sleep(reconnect_delay);
        tokio::pin!(backoff);

        loop {
            tokio::select! {
                () = &mut backoff => break,
                command = command_rx.recv() => match command {
                    Some(ClientCommand::Send(_)) => {
                        warn!("Not connected, dropping message");
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        info!(%role, "Peer client stopped");
                        return;
                    }
                },
            }
        }
    }
}

/// Registers and pumps frames until the socket ends or shutdown.
async fn drive(
    socket: Socket,
    role: Role,
    command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    inbound_tx: &mpsc::UnboundedSender<Message>,
) -> Exit {
    let (mut ws_write, mut ws_read) = socket.split();

    let register = match Message::register(role).to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to encode registration");
            return Exit::Disconnected;
        }
    };

    if let Err(e) = ws_write.send(WsMessage::Text(register.into())).await {
        warn!(error = %e, "Failed to register");
        return Exit::Disconnected;
    }

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match Message::from_json(text.as_str()) {
                        Ok(message) => {
                            debug!(kind = %message.kind(), "Received from relay");
                            // Receiver may be gone; keep the connection regardless
                            let _ = inbound_tx.send(message);
                        }
                        Err(e) => {
                            warn!(error = %e, "Error parsing relay message");
                        }
                    },

                    Some(Ok(WsMessage::Close(_))) | None => return Exit::Disconnected,

                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        return Exit::Disconnected;
                    }

                    // Pings are answered by tungstenite
                    Some(Ok(_)) => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(ClientCommand::Send(text)) => {
                        if let Err(e) = ws_write.send(WsMessage::Text(text.into())).await {
                            warn!(error = %e, "Failed to send");
                            return Exit::Disconnected;
                        }
                    }

                    Some(ClientCommand::Shutdown) | None => {
                        let _ = ws_write.close().await;
                        return Exit::Shutdown;
                    }
                }
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

    use std::net::{IpAddr, Ipv4Addr};

    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use crate::config::RelayConfig;
    use crate::transport::RelayServer;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start_relay() -> (String, oneshot::Sender<()>) {
        let config = RelayConfig::new()
            .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0)
            .without_panel();
        let server = RelayServer::bind(config).await.unwrap();
        let url = server.ws_url();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.run_until(async move {
            let _ = stopped.await;
        }));
        (url, stop)
    }

    async fn next(inbound: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        timeout(WAIT, inbound.recv())
            .await
            .expect("message should arrive")
            .expect("client should be running")
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_url() {
        let err = PeerClient::connect("http://localhost:8080", Role::Extension)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config { .. }));

        let err = PeerClient::connect("not a url", Role::Extension)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        // Nothing listens on port 9 locally
        let (client, _inbound) = PeerClient::builder("ws://127.0.0.1:9", Role::Controller)
            .reconnect_delay(Duration::from_secs(60))
            .connect()
            .unwrap();

        assert!(!client.is_connected());
        assert!(matches!(
            client.send(Message::save_request("Favorites", "https://x.com/1")),
            Err(Error::NotConnected)
        ));
        client.shutdown();
    }

    #[tokio::test]
    async fn test_registers_and_exchanges_messages() {
        let (url, _stop) = start_relay().await;

        let (extension, mut ext_inbound) = PeerClient::connect(url.as_str(), Role::Extension).unwrap();
        assert_eq!(next(&mut ext_inbound).await, Message::registered(Role::Extension));
        assert!(extension.is_connected());

        let (controller, mut ctl_inbound) =
            PeerClient::connect(url.as_str(), Role::Controller).unwrap();
        assert_eq!(next(&mut ctl_inbound).await, Message::registered(Role::Controller));

        let update = Message::content_update_for("https://instagram.com/p/ABC", "t").unwrap();
        extension.send(update.clone()).unwrap();
        assert_eq!(next(&mut ctl_inbound).await, update);

        controller
            .send(Message::save_request("Favorites", "https://instagram.com/p/ABC"))
            .unwrap();
        assert_eq!(
            next(&mut ext_inbound).await,
            Message::save_request("Favorites", "https://instagram.com/p/ABC")
        );

        extension.send(Message::saved("Favorites")).unwrap();
        assert_eq!(next(&mut ctl_inbound).await, Message::saved("Favorites"));
    }

    #[tokio::test]
    async fn test_reconnects_after_relay_restart() {
        let config = RelayConfig::new()
            .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0)
            .without_panel();
        let server = RelayServer::bind(config.clone()).await.unwrap();
        let port = server.port();
        let url = server.ws_url();
        let (stop, stopped) = oneshot::channel::<()>();
        let first = tokio::spawn(server.run_until(async move {
            let _ = stopped.await;
        }));

        let (client, mut inbound) = PeerClient::builder(url, Role::Extension)
            .reconnect_delay(Duration::from_millis(100))
            .connect()
            .unwrap();
        assert_eq!(next(&mut inbound).await, Message::registered(Role::Extension));

        stop.send(()).unwrap();
        first.await.unwrap().unwrap();

        // Same port, new relay
        let server = RelayServer::bind(config.with_port(port)).await.unwrap();
        let registry = Arc::clone(server.registry());
        let (_stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.run_until(async move {
            let _ = stopped.await;
        }));

        assert_eq!(next(&mut inbound).await, Message::registered(Role::Extension));
        assert!(client.is_connected());
        assert!(registry.lookup(Role::Extension).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_stops_client() {
        let (url, _stop) = start_relay().await;
        let (client, mut inbound) = PeerClient::connect(url.as_str(), Role::Controller).unwrap();
        assert_eq!(next(&mut inbound).await, Message::registered(Role::Controller));

        client.shutdown();

        let closed = timeout(WAIT, inbound.recv()).await.expect("task should end");
        assert!(closed.is_none());
        assert!(!client.is_connected());
    }
}
