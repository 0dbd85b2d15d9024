//! Connection lifecycle.
//!
//! A [`Session`] is the relay-side state of one accepted connection:
//!
//! ```text
//!   accept ──► Unregistered ──register──► Registered(role)
//!                   │                           │
//!                   └──── close / error / ──────┴──► Closed
//!                         eviction / shutdown
//! ```
//!
//! | Event | Effect |
//! |-------|--------|
//! | accept | heartbeat started, `Unregistered` |
//! | parseable frame | handed to the [`Router`]; a successful `register` moves to `Registered(role)` |
//! | unparseable frame | logged and dropped, no transition |
//! | close / error / eviction / shutdown | heartbeat cancelled, unbound from the registry, `Closed` |
//!
//! `Closed` is terminal and teardown runs once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::protocol::{Envelope, Role};
use crate::transport::Connection;

use super::monitor::Heartbeat;
use super::router::{RouteOutcome, Router};

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for a valid `register`.
    Unregistered,
    /// Bound to a role.
    Registered(Role),
    /// Torn down.
    Closed,
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the socket or the stream ended.
    Remote,
    /// Transport error while reading or writing.
    Error,
    /// The relay closed it (eviction by a newer registration).
    Local,
    /// The relay is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::Error => "error",
            Self::Local => "local",
            Self::Shutdown => "shutdown",
        })
    }
}

// ============================================================================
// Session
// ============================================================================

/// Relay-side state of one connection.
#[derive(Debug)]
pub struct Session {
    connection: Connection,
    state: SessionState,
    router: Router,
    heartbeat: Heartbeat,
}

impl Session {
    /// Creates a session for a freshly accepted connection and starts its
    /// heartbeat.
    pub fn accept(connection: Connection, router: Router, heartbeat_interval: Duration) -> Self {
        let heartbeat = Heartbeat::start(connection.clone(), heartbeat_interval);
        Self {
            connection,
            state: SessionState::Unregistered,
            router,
            heartbeat,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the bound role, if registered.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self.state {
            SessionState::Registered(role) => Some(role),
            SessionState::Unregistered | SessionState::Closed => None,
        }
    }

    /// Returns the connection handle.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Handles one inbound text frame.
    ///
    /// Returns the routing outcome, or `None` if the frame could not be
    /// parsed or the session is already closed.
    pub fn handle_frame(&mut self, text: &str) -> Option<RouteOutcome> {
        if self.state == SessionState::Closed {
            return None;
        }

        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection = %self.connection.id(), error = %e, "Error parsing message");
                return None;
            }
        };

        let outcome = self.router.route(&self.connection, self.role(), &envelope);

        if let RouteOutcome::Registered { role, .. } = outcome {
            self.state = SessionState::Registered(role);
        }

        Some(outcome)
    }

    /// Tears the session down: cancels the heartbeat, releases the role if
    /// this connection still holds it, and enters `Closed`.
    ///
    /// Returns `false` if the session was already closed.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }

        self.heartbeat.cancel();
        let released = self.router.registry().unbind(&self.connection);

        let role = self.role();
        self.state = SessionState::Closed;

        info!(
            connection = %self.connection.id(),
            role = role.map(|r| r.as_str()).unwrap_or("unknown"),
            released = released.is_some(),
            %reason,
            "Client disconnected"
        );

        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close(CloseReason::Local);
    }
}

// ============================================================================
// Tests
// ============================================================================
