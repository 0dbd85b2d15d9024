//! Collection relay - two-peer WebSocket message relay.
//!
//! Relays short control messages between a browser extension that watches
//! the page the user is on and a remote controller (typically a tablet)
//! that asks the extension to save that page into a named collection.
//!
//! # Architecture
//!
//! The relay is a single always-on process:
//!
//! - **Registry**: at most one live connection per role, newer wins
//! - **Router**: forwards each message type from its one valid sender role
//!   to the opposite role, dropping everything else
//! - **Heartbeat**: periodic pings on every connection
//! - **Session**: per-connection state machine (`Unregistered → Registered → Closed`)
//!
//! Delivery is best-effort: if the peer is absent the message is dropped.
//!
//! # Quick Start
//!
//! ```no_run
//! use collection_relay::{RelayConfig, RelayServer, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = RelayServer::bind(RelayConfig::default()).await?;
//!     println!("Relay listening on {}", server.ws_url());
//!     server.run().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Auto-reconnecting peer client |
//! | [`config`] | Relay configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types, roles, platform detection |
//! | [`relay`] | Registry, router, heartbeat, session lifecycle |
//! | [`transport`] | Listener, WebSocket event loops, control-panel HTTP |

// ============================================================================
// Modules
// ============================================================================

/// Auto-reconnecting peer client.
pub mod client;

/// Relay configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol types.
pub mod protocol;

/// Relay core: registration, routing, liveness, lifecycle.
pub mod relay;

/// Sockets: listener, event loops, control-panel HTTP.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{PeerClient, PeerClientBuilder};

// Configuration
pub use config::RelayConfig;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Protocol types
pub use protocol::{ContentTracker, Envelope, Message, MessageKind, Platform, Role};

// Relay types
pub use relay::{Registry, RouteOutcome, Router, Session, SessionState};

// Transport types
pub use transport::{Connection, RelayServer};
