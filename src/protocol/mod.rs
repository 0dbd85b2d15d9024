//! Wire protocol.
//!
//! One JSON object per WebSocket frame, tagged by `type`.
//!
//! | Message Type | Direction | Fields |
//! |--------------|-----------|--------|
//! | `register` | peer → relay | `client` |
//! | `registered` | relay → peer | `client`, `message` |
//! | `content-update` | extension → controller | `url`, `platform`, `title` |
//! | `save-request` | controller → extension | `tag`, `url` |
//! | `save-confirmation` | extension → controller | `tag`, `success`, `error` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | [`Envelope`] (relay view) and [`Message`] (typed view) |
//! | `platform` | URL-based content platform detection and change tracking |
//! | `role` | The two peer roles |

// ============================================================================
// Submodules
// ============================================================================

/// Message types.
pub mod message;

/// Content platform detection.
pub mod platform;

/// Peer roles.
pub mod role;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{Envelope, Message, MessageKind, REGISTERED_TEXT, RouteRule};
pub use platform::{ContentTracker, Platform};
pub use role::Role;
