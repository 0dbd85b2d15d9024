//! WebSocket transport layer.
//!
//! This module owns the sockets: the listener, the per-connection event
//! loops, and the plain-HTTP control-panel responses that share the port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Extension      │         WebSocket            │                 │
//! │  (browser)      │◄────────────────────────────►│                 │
//! └─────────────────┘                              │   RelayServer   │
//! ┌─────────────────┐         WebSocket            │   0.0.0.0:8080  │
//! │  Controller     │◄────────────────────────────►│                 │
//! │  (tablet)       │   GET / → control panel      │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `RelayServer::bind` - Bind the configured address
//! 2. Accept loop serves each stream as HTTP/1.1
//! 3. Plain HTTP → control panel / 404
//! 4. WebSocket upgrade → [`Connection`] handle + event loop task
//! 5. Close, error, eviction or shutdown ends the loop and tears down
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Connection handle and event loop |
//! | `http` | HTTP routes, upgrade handling, control panel |
//! | `server` | Listener and accept loop |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection handle and event loop.
pub mod connection;

/// Plain HTTP on the relay port.
pub(crate) mod http;

/// Relay server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use server::RelayServer;
