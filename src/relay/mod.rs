//! Relay core: registration, routing, liveness and lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   frames   ┌─────────┐  route   ┌────────┐  lookup  ┌──────────────────────┐
//! │  WebSocket  │───────────►│ Session │─────────►│ Router │─────────►│       Registry       │
//! │  (per peer) │◄───────────│         │          └────────┘          │ extension │controller│
//! └─────────────┘   pings    │Heartbeat│                              └──────────────────────┘
//!                            └─────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `registry` | One connection per role, identity-checked unbind |
//! | `router` | Role/type routing rules, best-effort forwarding |
//! | `monitor` | Per-connection heartbeat pings |
//! | `session` | Per-connection state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Per-connection heartbeat.
pub mod monitor;

/// Role registry.
pub mod registry;

/// Message routing.
pub mod router;

/// Connection lifecycle state machine.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use monitor::{DEFAULT_HEARTBEAT_INTERVAL, Heartbeat};
pub use registry::{Registration, Registry};
pub use router::{DropReason, RouteOutcome, Router};
pub use session::{CloseReason, Session, SessionState};
