//! WebSocket connection handle and per-connection event loop.
//!
//! Each accepted WebSocket is owned by exactly one tokio task running
//! [`serve`]. Everything else in the relay talks to it through a cheap,
//! cloneable [`Connection`] handle that pushes [`Outbound`] commands onto
//! an unbounded channel, so sending never blocks the caller.
//!
//! # Event Loop
//!
//! The task multiplexes:
//!
//! - Incoming frames from the peer (handed to the [`Session`])
//! - Outbound commands (text frames, heartbeat pings, close)
//! - The relay-wide shutdown signal
//!
//! When the loop ends, for whatever reason, the session is torn down exactly
//! once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Message;
use crate::relay::{CloseReason, Router, Session};

// ============================================================================
// Outbound
// ============================================================================

/// Commands accepted by a connection's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    /// Write a text frame.
    Text(String),
    /// Write a transport-level ping.
    Ping,
    /// Close the socket and end the loop.
    Close,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to a live peer connection.
///
/// Equality is identity: two handles are equal when they refer to the same
/// accepted socket.
#[derive(Clone)]
pub struct Connection {
    /// Process-unique identity.
    id: ConnectionId,
    /// Channel to the owning event loop.
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    /// Set once a close has been requested.
    closing: Arc<AtomicBool>,
}

impl Connection {
    /// Creates a handle and the receiving end for its event loop.
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: ConnectionId::next(),
            outbound_tx,
            closing: Arc::new(AtomicBool::new(false)),
        };
        (connection, outbound_rx)
    }

    /// Returns the connection identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` while the event loop is running and no close has been
    /// requested.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && !self.outbound_tx.is_closed()
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the connection is closing or gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.push(Outbound::Text(text.into()))
    }

    /// Serializes and queues a typed message.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - [`Error::ConnectionClosed`] if the connection is closing or gone
    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.send_text(message.to_json()?)
    }

    /// Queues a heartbeat ping.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the connection is closing or gone.
    pub fn ping(&self) -> Result<()> {
        self.push(Outbound::Ping)
    }

    /// Requests a transport-level close.
    ///
    /// Only the first call has an effect. Later sends fail immediately.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        // Loop already gone means the socket is already closed.
        let _ = self.outbound_tx.send(Outbound::Close);
    }

    fn push(&self, command: Outbound) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.outbound_tx
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Drives one upgraded WebSocket until it closes.
///
/// Creates the [`Session`] (which starts the heartbeat), feeds it every
/// inbound frame, and tears it down when the socket closes, errors, is
/// closed by the relay, or the relay shuts down.
pub(crate) async fn serve(
    socket: WebSocket,
    addr: SocketAddr,
    router: Router,
    heartbeat_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let (connection, mut outbound_rx) = Connection::new();
    let id = connection.id();
    info!(connection = %id, %addr, "WebSocket connection established");

    let mut session = Session::accept(connection, router, heartbeat_interval);
    let (mut ws_write, mut ws_read) = socket.split();

    let reason = loop {
        tokio::select! {
            // Incoming frames from the peer
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        session.handle_frame(text.as_str());
                    }

                    Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            session.handle_frame(text);
                        }
                        Err(_) => {
                            warn!(connection = %id, len = bytes.len(), "Dropping non-UTF-8 binary frame");
                        }
                    },

                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(connection = %id, "WebSocket closed by remote");
                        break CloseReason::Remote;
                    }

                    Some(Err(e)) => {
                        error!(connection = %id, error = %e, "WebSocket error");
                        break CloseReason::Error;
                    }

                    Some(Ok(WsMessage::Pong(_))) => {
                        trace!(connection = %id, "Pong received");
                    }

                    // Ping replies are sent by the WebSocket layer
                    Some(Ok(_)) => {}
                }
            }

            // Commands from the router, registry and heartbeat
            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = ws_write.send(WsMessage::Text(text.into())).await {
                            warn!(connection = %id, error = %e, "Failed to write frame");
                            break CloseReason::Error;
                        }
                    }

                    Some(Outbound::Ping) => {
                        if let Err(e) = ws_write.send(WsMessage::Ping(Default::default())).await {
                            warn!(connection = %id, error = %e, "Failed to write heartbeat ping");
                            break CloseReason::Error;
                        }
                        trace!(connection = %id, "Heartbeat ping sent");
                    }

                    Some(Outbound::Close) | None => {
                        let _ = ws_write.close().await;
                        break CloseReason::Local;
                    }
                }
            }

            // Relay shutdown (a dropped sender counts as shutdown too)
            _ = shutdown.changed() => {
                let _ = ws_write.close().await;
                break CloseReason::Shutdown;
            }
        }
    };

    session.close(reason);
}

// ============================================================================
// Tests
// ============================================================================
